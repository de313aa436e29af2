pub mod catalog;
pub mod composer;
pub mod condition;
pub mod errors;
pub mod linter;
pub mod loader;
pub mod manifest;
pub mod pattern;
pub mod simulator;
pub mod types;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;

use catalog::ActionCatalog;
use composer::{policy_document, trust_document, PolicyDocument, TrustDocument};
use errors::CompileError;
use linter::{Finding, LintConfig, LintReport, Linter};
use loader::Substitutions;
use simulator::{Decision, Evaluation, Simulator};
use types::{RequestContext, RoleDefinition, RoleKind};

/// Compiled roles with the catalog they were validated against.
/// Immutable after construction; a manifest change requires recompiling.
/// Safe to share across threads behind an `Arc`.
#[derive(Debug)]
pub struct CompiledRoles {
    catalog: ActionCatalog,
    /// Manifest order
    roles: Vec<RoleDefinition>,
    /// role name -> position in `roles`
    index: HashMap<String, usize>,
    substitutions: Substitutions,
}

impl CompiledRoles {
    pub(crate) fn new(
        catalog: ActionCatalog,
        roles: Vec<RoleDefinition>,
        substitutions: Substitutions,
    ) -> Self {
        let index = roles
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name().to_string(), i))
            .collect();
        Self {
            catalog,
            roles,
            index,
            substitutions,
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn roles(&self) -> &[RoleDefinition] {
        &self.roles
    }

    pub fn role(&self, name: &str) -> Option<&RoleDefinition> {
        self.index.get(name).map(|&i| &self.roles[i])
    }

    pub fn role_of_kind(&self, kind: RoleKind) -> Option<&RoleDefinition> {
        self.roles.iter().find(|r| r.kind() == kind)
    }

    /// `arn:{partition}:iam::{account}:role/{name}`, or the bare name when no
    /// account was substituted.
    pub fn role_identifier(&self, role: &RoleDefinition) -> String {
        match self.substitutions.account() {
            Some(account) => format!(
                "arn:{}:iam::{}:role/{}",
                self.substitutions.partition(),
                account,
                role.name()
            ),
            None => role.name().to_string(),
        }
    }

    /// Named outputs read back by the deploying pipeline.
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.roles
            .iter()
            .map(|r| (r.kind().output_name().to_string(), self.role_identifier(r)))
            .collect()
    }

    pub fn artifacts(&self) -> CompiledArtifacts {
        let roles = self
            .roles
            .iter()
            .map(|role| CompiledRole {
                name: role.name().to_string(),
                kind: role.kind(),
                identifier: self.role_identifier(role),
                permission_boundary: role.permission_boundary().map(|b| b.as_str().to_string()),
                trust_document: trust_document(role),
                policy_document: policy_document(role),
            })
            .collect();
        CompiledArtifacts {
            roles,
            outputs: self.outputs(),
        }
    }

    // ─── Simulation by role name ────────────────────────────────────────

    /// Unknown role names are not an error: nothing grants the request, so
    /// the result is `IMPLICIT_DENY`.
    pub fn evaluate(
        &self,
        role_name: &str,
        action: &str,
        resource: &str,
        context: &RequestContext,
    ) -> Evaluation {
        match self.role(role_name) {
            Some(role) => Simulator::new(&self.catalog).evaluate(role, action, resource, context),
            None => {
                tracing::warn!(role = role_name, "Simulated request against unknown role");
                Evaluation {
                    decision: Decision::ImplicitDeny,
                    matched: Vec::new(),
                }
            }
        }
    }

    pub fn decide(
        &self,
        role_name: &str,
        action: &str,
        resource: &str,
        context: &RequestContext,
    ) -> Decision {
        self.evaluate(role_name, action, resource, context).decision
    }

    pub fn decide_assume(&self, role_name: &str, principal: &str, context: &RequestContext) -> Decision {
        match self.role(role_name) {
            Some(role) => Simulator::new(&self.catalog).decide_assume(role, principal, context),
            None => {
                tracing::warn!(role = role_name, "Simulated assume-role against unknown role");
                Decision::ImplicitDeny
            }
        }
    }

    // ─── Linting ────────────────────────────────────────────────────────

    pub fn lint(&self, role_name: &str, config: &LintConfig) -> Result<Vec<Finding>, CompileError> {
        let role = self
            .role(role_name)
            .ok_or_else(|| CompileError::UnknownRole(role_name.to_string()))?;
        Ok(Linter::new(&self.catalog, config).lint(role))
    }

    pub fn lint_all(&self, config: &LintConfig) -> LintReport {
        let linter = Linter::new(&self.catalog, config);
        LintReport {
            roles: self
                .roles
                .iter()
                .map(|r| (r.name().to_string(), linter.lint(r)))
                .collect(),
        }
    }
}

/// One compiled role as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRole {
    pub name: String,
    pub kind: RoleKind,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_boundary: Option<String>,
    pub trust_document: TrustDocument,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledArtifacts {
    /// Manifest order
    pub roles: Vec<CompiledRole>,
    pub outputs: BTreeMap<String, String>,
}

impl CompiledArtifacts {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write `<role>.policy.json`, `<role>.trust.json` and `outputs.json`
    /// into `dir`, creating it if needed. Returns the written paths.
    pub fn write_to(&self, dir: &Path, pretty: bool) -> Result<Vec<PathBuf>, CompileError> {
        std::fs::create_dir_all(dir)?;

        let mut written = Vec::new();
        for role in &self.roles {
            let policy = dir.join(format!("{}.policy.json", role.name));
            std::fs::write(&policy, render(&role.policy_document, pretty)?)?;
            written.push(policy);

            let trust = dir.join(format!("{}.trust.json", role.name));
            std::fs::write(&trust, render(&role.trust_document, pretty)?)?;
            written.push(trust);
        }
        let outputs = dir.join("outputs.json");
        std::fs::write(&outputs, render(&self.outputs, pretty)?)?;
        written.push(outputs);

        tracing::info!(dir = %dir.display(), files = written.len(), "Wrote compiled artifacts");
        Ok(written)
    }
}

/// JSON with a trailing newline.
fn render<T: Serialize>(value: &T, pretty: bool) -> Result<String, CompileError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    let mut out = rendered.map_err(|e| CompileError::Render(e.to_string()))?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::manifest::parse_kdl_document;

    const MANIFEST: &str = r#"
catalog {
    service "iam" {
        - "CreateRole"
        - "GetRole"
    }
}

role "StudioRole" kind="operational" {
    trust "datazone.amazonaws.com" {
        condition "StringEquals" key="aws:SourceAccount" value="${account}"
    }
    bundle "ReadRoles" {
        actions {
            - "iam:GetRole"
        }
        resources {
            - "*"
        }
    }
}

role "ProvisionRole" kind="provisioning" {
    trust "datazone.amazonaws.com"
    bundle "CreateProjectRoles" {
        actions {
            - "iam:CreateRole"
        }
        resources {
            - "arn:aws:iam::${account}:role/DataZoneBedrockProjectRole*"
        }
    }
}
"#;

    fn compiled() -> CompiledRoles {
        let manifest = parse_kdl_document(MANIFEST).unwrap();
        let subs = Substitutions::new().with("account", "123456789012");
        loader::compile(&manifest, &subs).unwrap()
    }

    #[test]
    fn test_outputs() {
        let c = compiled();
        let outputs = c.outputs();
        assert_eq!(
            outputs["operational-role-arn"],
            "arn:aws:iam::123456789012:role/StudioRole"
        );
        assert_eq!(
            outputs["provisioning-role-arn"],
            "arn:aws:iam::123456789012:role/ProvisionRole"
        );
        assert_eq!(c.role_of_kind(RoleKind::Provisioning).unwrap().name(), "ProvisionRole");
    }

    #[test]
    fn test_identifier_without_account() {
        let manifest = parse_kdl_document(&MANIFEST.replace("${account}", "123456789012")).unwrap();
        let c = loader::compile(&manifest, &Substitutions::new()).unwrap();
        assert_eq!(c.outputs()["operational-role-arn"], "StudioRole");
    }

    #[test]
    fn test_decide_by_name() {
        let c = compiled();
        let ctx = RequestContext::new();
        assert_eq!(
            c.decide("StudioRole", "iam:GetRole", "arn:aws:iam::123456789012:role/X", &ctx),
            Decision::Allow
        );
        assert_eq!(
            c.decide("NoSuchRole", "iam:GetRole", "arn:aws:iam::123456789012:role/X", &ctx),
            Decision::ImplicitDeny
        );
        let trusted = RequestContext::new().with("aws:SourceAccount", "123456789012");
        assert_eq!(
            c.decide_assume("StudioRole", "datazone.amazonaws.com", &trusted),
            Decision::Allow
        );
    }

    #[test]
    fn test_lint_by_name() {
        let c = compiled();
        let config = LintConfig::default();
        let findings = c.lint("ProvisionRole", &config).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(matches!(
            c.lint("NoSuchRole", &config),
            Err(CompileError::UnknownRole(_))
        ));
        let report = c.lint_all(&config);
        assert_eq!(report.roles.len(), 2);
        assert!(report.roles["StudioRole"].is_empty());
        assert!(!report.blocks(false));
        assert!(report.blocks(true));
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let written = compiled().artifacts().write_to(&out, true).unwrap();
        assert_eq!(written.len(), 5);

        let policy = std::fs::read_to_string(out.join("StudioRole.policy.json")).unwrap();
        let policy: serde_json::Value = serde_json::from_str(&policy).unwrap();
        assert_eq!(policy["Statement"][0]["Sid"], "ReadRoles");

        let outputs = std::fs::read_to_string(out.join("outputs.json")).unwrap();
        assert!(outputs.ends_with('\n'));
        assert!(outputs.contains("provisioning-role-arn"));
    }

    #[test]
    fn test_compiled_roles_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledRoles>();
    }
}
