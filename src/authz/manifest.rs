use std::collections::BTreeMap;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

use crate::authz::errors::CompileError;
use crate::authz::types::RoleKind;

/// Raw manifest: action catalog plus role descriptions, as written by the
/// author. Nothing here is validated beyond its shape; the composer does that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// service -> verbs
    #[serde(default)]
    pub catalog: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub roles: Vec<RoleManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleManifest {
    pub name: String,
    pub kind: RoleKind,
    pub trust: TrustManifest,
    #[serde(default)]
    pub permission_boundary: Option<String>,
    #[serde(default)]
    pub bundles: Vec<BundleManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustManifest {
    pub principal: String,
    #[serde(default)]
    pub conditions: Vec<ClauseManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default = "default_effect")]
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<ClauseManifest>,
}

fn default_effect() -> String {
    "allow".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseManifest {
    pub operator: String,
    pub key: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Manifest {
    /// Fold another file's contents into this one. Roles keep file order.
    pub fn merge(&mut self, other: Manifest) {
        for (service, verbs) in other.catalog {
            self.catalog.entry(service).or_default().extend(verbs);
        }
        self.roles.extend(other.roles);
    }

    pub fn from_json(source: &str) -> Result<Self, CompileError> {
        Ok(serde_json::from_str(source)?)
    }
}

/// Parse a KDL manifest document.
///
/// ```kdl
/// catalog {
///     service "iam" {
///         - "CreateRole"
///     }
/// }
///
/// role "ProvisionRole" kind="provisioning" {
///     trust "datazone.amazonaws.com" {
///         condition "StringEquals" key="aws:SourceAccount" value="${account}"
///     }
///     permission-boundary "arn:aws:iam::${account}:policy/Boundary"
///     bundle "CreateProjectRoles" effect="allow" {
///         actions {
///             - "iam:CreateRole"
///         }
///         resources {
///             - "arn:aws:iam::*:role/Project*"
///         }
///         condition "Null" key="aws:ResourceTag/Env" value="false"
///     }
/// }
/// ```
pub fn parse_kdl_document(source: &str) -> Result<Manifest, CompileError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| CompileError::KdlParse(e.to_string()))?;

    let mut manifest = Manifest::default();

    for node in doc.nodes() {
        match node.name().value() {
            "catalog" => parse_catalog(node, &mut manifest.catalog)?,
            "role" => manifest.roles.push(parse_role(node)?),
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(manifest)
}

fn parse_catalog(
    node: &KdlNode,
    catalog: &mut BTreeMap<String, Vec<String>>,
) -> Result<(), CompileError> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        match child.name().value() {
            "service" => {
                let service = first_string_arg(child).ok_or_else(|| {
                    CompileError::InvalidManifest(
                        "service node requires a string argument (e.g. service \"iam\")".into(),
                    )
                })?;
                let verbs = dash_list(child, CompileError::InvalidManifest)?;
                catalog.entry(service).or_default().extend(verbs);
            }
            other => {
                return Err(CompileError::InvalidManifest(format!(
                    "unexpected child `{other}` in catalog (expected `service`)"
                )));
            }
        }
    }
    Ok(())
}

fn parse_role(node: &KdlNode) -> Result<RoleManifest, CompileError> {
    let name = first_string_arg(node).ok_or_else(|| {
        CompileError::InvalidManifest(
            "role node requires a string argument (e.g. role \"ProvisionRole\" kind=\"provisioning\")"
                .into(),
        )
    })?;

    let kind_raw = node
        .get("kind")
        .and_then(|v| v.as_string())
        .ok_or_else(|| {
            CompileError::InvalidManifest(format!(
                "role `{name}` missing `kind` property (\"operational\" or \"provisioning\")"
            ))
        })?;
    let kind = RoleKind::parse(kind_raw).ok_or_else(|| {
        CompileError::InvalidManifest(format!(
            "role `{name}` has unknown kind `{kind_raw}` (expected \"operational\" or \"provisioning\")"
        ))
    })?;

    let mut trust = None;
    let mut permission_boundary = None;
    let mut bundles = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "trust" => {
                    if trust.is_some() {
                        return Err(CompileError::InvalidManifest(format!(
                            "role `{name}` has more than one `trust` node"
                        )));
                    }
                    let principal = first_string_arg(child).ok_or_else(|| {
                        CompileError::InvalidManifest(format!(
                            "trust in role `{name}` requires a principal argument (e.g. trust \"datazone.amazonaws.com\")"
                        ))
                    })?;
                    trust = Some(TrustManifest {
                        principal,
                        conditions: parse_conditions(child)?,
                    });
                }
                "permission-boundary" => {
                    if permission_boundary.is_some() {
                        return Err(CompileError::InvalidManifest(format!(
                            "role `{name}` has more than one `permission-boundary` node"
                        )));
                    }
                    permission_boundary = Some(first_string_arg(child).ok_or_else(|| {
                        CompileError::InvalidManifest(format!(
                            "permission-boundary in role `{name}` requires a policy ARN argument"
                        ))
                    })?);
                }
                "bundle" => bundles.push(parse_bundle(child, &name)?),
                other => {
                    return Err(CompileError::InvalidManifest(format!(
                        "unexpected child `{other}` in role `{name}` (expected `trust`, `permission-boundary` or `bundle`)"
                    )));
                }
            }
        }
    }

    let trust = trust.ok_or_else(|| {
        CompileError::InvalidManifest(format!("role `{name}` has no `trust` node"))
    })?;

    Ok(RoleManifest {
        name,
        kind,
        trust,
        permission_boundary,
        bundles,
    })
}

fn parse_bundle(node: &KdlNode, role: &str) -> Result<BundleManifest, CompileError> {
    let sid = first_string_arg(node);
    let effect = node
        .get("effect")
        .and_then(|v| v.as_string())
        .map(str::to_string)
        .unwrap_or_else(default_effect);

    let mut actions = Vec::new();
    let mut resources = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => actions.extend(dash_list(child, CompileError::InvalidManifest)?),
                "resources" => {
                    resources.extend(dash_list(child, CompileError::InvalidManifest)?)
                }
                "condition" => {}
                other => {
                    return Err(CompileError::InvalidManifest(format!(
                        "unexpected child `{other}` in bundle of role `{role}` (expected `actions`, `resources` or `condition`)"
                    )));
                }
            }
        }
    }

    Ok(BundleManifest {
        sid,
        effect,
        actions,
        resources,
        conditions: parse_conditions(node)?,
    })
}

/// Collect `condition "<operator>" key="<key>" { - "<value>" }` children.
/// A single value may be given inline as `value="<value>"`.
fn parse_conditions(node: &KdlNode) -> Result<Vec<ClauseManifest>, CompileError> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };
    let mut clauses = Vec::new();
    for child in children.nodes() {
        if child.name().value() != "condition" {
            continue;
        }
        let operator = first_string_arg(child).ok_or_else(|| {
            CompileError::MalformedConditionClause(
                "condition node requires an operator argument (e.g. condition \"StringEquals\")"
                    .into(),
            )
        })?;
        let key = child
            .get("key")
            .and_then(|v| v.as_string())
            .ok_or_else(|| {
                CompileError::MalformedConditionClause(format!(
                    "`{operator}` condition missing `key` property"
                ))
            })?
            .to_string();

        let mut values = dash_list(child, CompileError::MalformedConditionClause)?;
        if let Some(inline) = child.get("value") {
            let inline = inline.as_string().ok_or_else(|| {
                CompileError::MalformedConditionClause(format!(
                    "`{operator}` condition on `{key}` has a non-string `value` (quote it)"
                ))
            })?;
            values.insert(0, inline.to_string());
        }

        clauses.push(ClauseManifest {
            operator,
            key,
            values,
        });
    }
    Ok(clauses)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children. Every `-` item must carry a string argument;
/// anything else is reported through `invalid`.
fn dash_list(
    node: &KdlNode,
    invalid: fn(String) -> CompileError,
) -> Result<Vec<String>, CompileError> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .map(|item| {
            first_string_arg(item).ok_or_else(|| {
                invalid(format!(
                    "`-` item under `{}` must be a quoted string",
                    node.name().value()
                ))
            })
        })
        .collect()
}
