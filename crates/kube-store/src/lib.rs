//! Typed Kubernetes object store
//!
//! The PromptFoo controller reads `PromptFooConfig` resources and upserts the
//! `ConfigMap` and `CronJob` derived from them. This crate puts those calls
//! behind the [`ObjectStore`] trait so reconcilers can run against the API
//! server ([`KubeStore`]) or an in-memory store in unit tests
//! ([`MockObjectStore`], behind the `test-util` feature).
//!
//! # Example
//!
//! ```no_run
//! use kube_store::{KubeStore, ObjectKey, ObjectStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::new(client);
//!
//! let key = ObjectKey::new("default", "nightly-eval");
//! if let Some(config) = store.get_prompt_config(&key).await? {
//!     println!("schedule: {}", config.spec.schedule);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use models::*;
pub use store_trait::ObjectStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockObjectStore, MockOperation};
