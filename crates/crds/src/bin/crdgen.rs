//! Prints the CustomResourceDefinition manifests for all CRDs in this crate.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/promptfooconfigs.yaml`

use crds::PromptFooConfig;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&PromptFooConfig::crd())?);
    Ok(())
}
