//! Prints the Shadow CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > shadow-crd.yaml`

use crds::Shadow;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Shadow::crd())?);
    Ok(())
}
