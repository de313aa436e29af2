//! Composition of manifest roles into immutable [`RoleDefinition`]s and
//! their canonical policy documents.
//!
//! Composition is pure: the same manifest and catalog always produce the same
//! definitions, and rendering a definition always produces the same bytes.
//! Bundles are validated one by one and kept in manifest order; overlapping
//! bundles are not merged.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::authz::catalog::ActionCatalog;
use crate::authz::errors::CompileError;
use crate::authz::manifest::{BundleManifest, ClauseManifest, RoleManifest};
use crate::authz::types::{
    ConditionClause, ConditionPredicate, Effect, PermissionBundle, ResourcePattern,
    RoleDefinition, TrustPredicate,
};

pub const POLICY_VERSION: &str = "2012-10-17";

const MAX_ROLE_NAME_LENGTH: usize = 64;

/// Validate one manifest role against the catalog and build its definition.
pub fn compose(role: &RoleManifest, catalog: &ActionCatalog) -> Result<RoleDefinition, CompileError> {
    validate_role_name(&role.name)?;

    let trust = compose_trust(role)?;

    let permission_boundary = match role.permission_boundary.as_deref() {
        Some("*") => {
            return Err(CompileError::malformed_pattern(
                "*",
                "a permission boundary must name a single policy",
            ));
        }
        Some(raw) => Some(ResourcePattern::parse(raw)?),
        None => None,
    };

    let bundles = role
        .bundles
        .iter()
        .enumerate()
        .map(|(index, bundle)| compose_bundle(&role.name, index, bundle, catalog))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        role = %role.name,
        kind = role.kind.as_str(),
        bundles = bundles.len(),
        "Composed role"
    );

    Ok(RoleDefinition {
        name: role.name.clone(),
        kind: role.kind,
        trust,
        bundles,
        permission_boundary,
    })
}

fn validate_role_name(name: &str) -> Result<(), CompileError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c));
    if name.is_empty() || name.len() > MAX_ROLE_NAME_LENGTH || !valid_chars {
        return Err(CompileError::InvalidManifest(format!(
            "invalid role name `{name}` (1-{MAX_ROLE_NAME_LENGTH} characters of [A-Za-z0-9+=,.@_-])"
        )));
    }
    Ok(())
}

fn compose_trust(role: &RoleManifest) -> Result<TrustPredicate, CompileError> {
    let principal = role.trust.principal.trim();
    if principal.is_empty() || principal.contains("${") || principal.contains(char::is_whitespace) {
        return Err(CompileError::InvalidManifest(format!(
            "role `{}` has an invalid trust principal `{}`",
            role.name, role.trust.principal
        )));
    }
    Ok(TrustPredicate {
        principal: principal.to_string(),
        conditions: compose_predicate(&role.trust.conditions)?,
    })
}

fn compose_bundle(
    role: &str,
    index: usize,
    bundle: &BundleManifest,
    catalog: &ActionCatalog,
) -> Result<PermissionBundle, CompileError> {
    let label = match &bundle.sid {
        Some(sid) => format!("bundle `{sid}` of role `{role}`"),
        None => format!("bundle #{index} of role `{role}`"),
    };

    let effect = Effect::parse(&bundle.effect).ok_or_else(|| {
        CompileError::InvalidManifest(format!(
            "{label} has unknown effect `{}` (expected \"allow\" or \"deny\")",
            bundle.effect
        ))
    })?;
    if bundle.actions.is_empty() {
        return Err(CompileError::InvalidManifest(format!("{label} lists no actions")));
    }
    if bundle.resources.is_empty() {
        return Err(CompileError::InvalidManifest(format!("{label} lists no resources")));
    }

    let actions = bundle
        .actions
        .iter()
        .map(|raw| catalog.normalize(raw))
        .collect::<Result<BTreeSet<_>, _>>()?;
    let resources = bundle
        .resources
        .iter()
        .map(|raw| ResourcePattern::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PermissionBundle {
        sid: bundle.sid.clone(),
        effect,
        actions,
        resources,
        conditions: compose_predicate(&bundle.conditions)?,
    })
}

fn compose_predicate(clauses: &[ClauseManifest]) -> Result<ConditionPredicate, CompileError> {
    let clauses = clauses
        .iter()
        .map(|c| ConditionClause::parse(&c.operator, &c.key, &c.values))
        .collect::<Result<Vec<_>, _>>()?;
    ConditionPredicate::from_clauses(clauses)
}

// ─── Canonical documents ────────────────────────────────────────────────

pub type ConditionBlocks = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: &'static str,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    pub action: Vec<String>,
    pub resource: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlocks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustDocument {
    pub version: &'static str,
    pub statement: Vec<TrustStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrustStatement {
    pub effect: Effect,
    /// `{"Service": …}` or `{"AWS": …}`
    pub principal: BTreeMap<&'static str, String>,
    pub action: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlocks,
}

/// One statement per bundle, in bundle order. Actions and resources are
/// sorted; conditions are grouped by operator block.
pub fn policy_document(role: &RoleDefinition) -> PolicyDocument {
    let statement = role
        .bundles()
        .iter()
        .map(|bundle| {
            let mut action: Vec<String> = bundle.actions().iter().map(|a| a.to_string()).collect();
            action.sort();
            let mut resource: Vec<String> =
                bundle.resources().iter().map(|r| r.as_str().to_string()).collect();
            resource.sort();
            resource.dedup();
            Statement {
                sid: bundle.sid().map(str::to_string),
                effect: bundle.effect(),
                action,
                resource,
                condition: bundle.conditions().to_blocks(),
            }
        })
        .collect();

    PolicyDocument {
        version: POLICY_VERSION,
        statement,
    }
}

pub fn trust_document(role: &RoleDefinition) -> TrustDocument {
    let principal = role.trust().principal();
    let principal_type = if principal.ends_with(".amazonaws.com") {
        "Service"
    } else {
        "AWS"
    };
    TrustDocument {
        version: POLICY_VERSION,
        statement: vec![TrustStatement {
            effect: Effect::Allow,
            principal: BTreeMap::from([(principal_type, principal.to_string())]),
            action: "sts:AssumeRole",
            condition: role.trust().conditions().to_blocks(),
        }],
    }
}
