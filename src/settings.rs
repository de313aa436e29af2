use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authz::linter::LintConfig;
use crate::authz::loader::Substitutions;
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub manifest: ManifestSource,
    /// Values for `${account}`, `${region}`, `${partition}`… in the manifest.
    #[serde(default)]
    pub substitutions: Substitutions,
    #[serde(default)]
    pub lint: LintConfig,
    #[serde(default)]
    pub output: Output,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSource {
    /// Directory holding `.kdl` / `.json` manifest files. Default: manifests
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    /// Where `compile` writes artifacts. Default: out
    pub dir: PathBuf,
    #[serde(default = "default_pretty")]
    pub pretty: bool,
}

fn default_pretty() -> bool {
    true
}

impl Default for ManifestSource {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("manifests"),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
            pretty: default_pretty(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .set_default(
                "manifest.dir",
                ManifestSource::default().dir.to_string_lossy().to_string(),
            )?
            .set_default(
                "output.dir",
                Output::default().dir.to_string_lossy().to_string(),
            )?
            .set_default("output.pretty", default_pretty())?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: ROLEWRIGHT__SUBSTITUTIONS__ACCOUNT=123456789012, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("ROLEWRIGHT").separator("__"));

        let cfg = builder.build()?;
        let mut s: Settings = cfg.try_deserialize()?;

        // Normalize paths to be relative to current dir
        if s.manifest.dir.is_relative() {
            s.manifest.dir = std::env::current_dir()?.join(&s.manifest.dir);
        }
        if s.output.dir.is_relative() {
            s.output.dir = std::env::current_dir()?.join(&s.output.dir);
        }

        Ok(s)
    }
}
