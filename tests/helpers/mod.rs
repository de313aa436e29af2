#![allow(dead_code)]

pub mod builders;

pub use builders::{BundleBuilder, ManifestBuilder, RoleBuilder};

use std::path::PathBuf;

use rolewright::authz::loader::Substitutions;

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

/// The manifests shipped with the crate.
pub fn bundled_manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("manifests")
}

pub fn substitutions() -> Substitutions {
    Substitutions::new()
        .with("account", ACCOUNT)
        .with("region", REGION)
}
