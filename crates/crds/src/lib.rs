//! PromptFoo CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the PromptFoo controller.

pub mod promptfoo_config;

pub use promptfoo_config::*;
