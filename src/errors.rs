use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::CompileError;

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(rolewright::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(rolewright::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(rolewright::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error("Lint blocked deployment: {errors} error(s), {warnings} warning(s)")]
    #[diagnostic(
        code(rolewright::lint_blocked),
        help("Fix the reported bundles, or drop --strict to block on errors only")
    )]
    LintBlocked { errors: usize, warnings: usize },

    #[error("Bad request: {0}")]
    #[diagnostic(code(rolewright::bad_request))]
    BadRequest(String),
}
