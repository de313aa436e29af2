use miette::Diagnostic;
use thiserror::Error;

/// Fatal manifest defects. Any of these aborts compilation; no partial
/// role definition is emitted.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("Unknown action `{action}`")]
    #[diagnostic(
        code(rolewright::authz::unknown_action),
        help("Actions are written `service:Verb` and must be listed in a `catalog {{ service \"<name>\" {{ - \"<Verb>\" }} }}` block")
    )]
    UnknownAction { action: String },

    #[error("Malformed resource pattern `{pattern}`: {reason}")]
    #[diagnostic(
        code(rolewright::authz::malformed_resource),
        help("Resource patterns are `*` or ARN-shaped: arn:<partition>:<service>:<region>:<account>:<resource>")
    )]
    MalformedResourcePattern { pattern: String, reason: String },

    #[error("Malformed condition clause: {0}")]
    #[diagnostic(
        code(rolewright::authz::malformed_condition),
        help("Supported operators: StringEquals, StringNotEquals, StringLike, Null, optionally prefixed by ForAnyValue: or ForAllValues:. Keys use `prefix:name`")
    )]
    MalformedConditionClause(String),

    #[error("Invalid manifest: {0}")]
    #[diagnostic(
        code(rolewright::authz::invalid_manifest),
        help("Each manifest file may contain `catalog` and `role` KDL nodes")
    )]
    InvalidManifest(String),

    #[error("Unknown role `{0}`")]
    #[diagnostic(
        code(rolewright::authz::unknown_role),
        help("Role names come from the `role \"<name>\"` nodes of the compiled manifest")
    )]
    UnknownRole(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(rolewright::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("JSON manifest error: {0}")]
    #[diagnostic(code(rolewright::authz::manifest_json))]
    ManifestJson(#[from] serde_json::Error),

    #[error("Failed to load manifest file `{path}`")]
    #[diagnostic(
        code(rolewright::authz::manifest_load),
        help("Check that the file exists and is readable")
    )]
    ManifestLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render compiled artifacts: {0}")]
    #[diagnostic(code(rolewright::authz::render))]
    Render(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(rolewright::authz::io))]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub(crate) fn malformed_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        CompileError::MalformedResourcePattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
