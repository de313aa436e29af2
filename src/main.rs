use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use rolewright::authz::linter::{LintReport, Severity};
use rolewright::authz::loader;
use rolewright::authz::types::{ContextValue, RequestContext};
use rolewright::authz::CompiledRoles;
use rolewright::errors::AppError;
use rolewright::settings::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "rolewright",
    version,
    about = "Least-privilege IAM role compiler"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "rolewright.toml")]
    config: String,

    /// Manifest directory (overrides `[manifest] dir`)
    #[arg(short, long)]
    manifests: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile the manifest and write policy, trust and output documents
    Compile {
        /// Output directory (overrides `[output] dir`)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Lint compiled roles and fail if findings block deployment
    Lint {
        /// Lint a single role
        #[arg(long)]
        role: Option<String>,
        /// Block on warnings too
        #[arg(long)]
        strict: bool,
    },
    /// Simulate an authorization request against a role
    Simulate {
        #[arg(long)]
        role: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        resource: String,
        /// JSON object of request context attributes
        #[arg(long)]
        context: Option<PathBuf>,
        /// Context attribute `key=value`; repeat a key for a multi-valued attribute
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
    },
    /// Simulate an assume-role request against a role's trust policy
    Assume {
        #[arg(long)]
        role: String,
        #[arg(long)]
        principal: String,
        #[arg(long)]
        context: Option<PathBuf>,
        #[arg(long = "set", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
    },
}

fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    // load settings
    let mut settings = Settings::load(&cli.config)?;
    if let Some(dir) = cli.manifests {
        settings.manifest.dir = dir;
    }
    tracing::info!(?settings, "Loaded configuration");

    let compiled = loader::load_and_compile(&settings.manifest.dir, &settings.substitutions)
        .map_err(AppError::from)?;

    match cli.command {
        Command::Compile { out } => {
            let dir = out.unwrap_or_else(|| settings.output.dir.clone());
            let artifacts = compiled.artifacts();
            artifacts
                .write_to(&dir, settings.output.pretty)
                .map_err(AppError::from)?;
            print_json(&artifacts.outputs)?;
        }
        Command::Lint { role, strict } => {
            let report = lint(&compiled, &settings, role.as_deref())?;
            print_json(&report)?;
            if report.blocks(strict || settings.lint.strict) {
                return Err(AppError::LintBlocked {
                    errors: report.count(Severity::Error),
                    warnings: report.count(Severity::Warning),
                }
                .into());
            }
        }
        Command::Simulate {
            role,
            action,
            resource,
            context,
            set,
        } => {
            let ctx = request_context(context.as_deref(), set)?;
            print_json(&compiled.evaluate(&role, &action, &resource, &ctx))?;
        }
        Command::Assume {
            role,
            principal,
            context,
            set,
        } => {
            let ctx = request_context(context.as_deref(), set)?;
            print_json(&compiled.decide_assume(&role, &principal, &ctx))?;
        }
    }
    Ok(())
}

fn lint(compiled: &CompiledRoles, settings: &Settings, role: Option<&str>) -> Result<LintReport> {
    match role {
        Some(name) => {
            let findings = compiled
                .lint(name, &settings.lint)
                .map_err(AppError::from)?;
            let mut report = LintReport::default();
            report.roles.insert(name.to_string(), findings);
            Ok(report)
        }
        None => Ok(compiled.lint_all(&settings.lint)),
    }
}

/// Context file first, then `--set` pairs on top. Repeated keys collect into
/// a multi-valued attribute.
fn request_context(file: Option<&Path>, set: Vec<(String, String)>) -> Result<RequestContext> {
    let mut ctx = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path).into_diagnostic()?;
            serde_json::from_str(&raw).map_err(AppError::from)?
        }
        None => RequestContext::new(),
    };

    let mut pairs: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in set {
        match pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => pairs.push((key, vec![value])),
        }
    }
    for (key, mut values) in pairs {
        let value = if values.len() == 1 {
            ContextValue::Single(values.remove(0))
        } else {
            ContextValue::Multi(values)
        };
        ctx.insert(key, value);
    }
    Ok(ctx)
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), AppError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(AppError::BadRequest(format!(
            "expected `key=value`, got `{raw}`"
        ))),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(AppError::from)?;
    println!("{rendered}");
    Ok(())
}
