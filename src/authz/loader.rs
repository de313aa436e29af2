use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::authz::catalog::ActionCatalog;
use crate::authz::composer::compose;
use crate::authz::errors::CompileError;
use crate::authz::manifest::{parse_kdl_document, ClauseManifest, Manifest, RoleManifest};
use crate::authz::CompiledRoles;

/// Runtime identifiers (account, region, partition…) substituted into
/// `${name}` placeholders before compilation. Namespaced names such as
/// `${aws:PrincipalAccount}` are policy variables and are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Substitutions(BTreeMap<String, String>);

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn account(&self) -> Option<&str> {
        self.get("account")
    }

    pub fn partition(&self) -> &str {
        self.get("partition").unwrap_or("aws")
    }

    /// Replace every known `${name}` in `input`. Unknown names stay in place
    /// so validation can report them.
    pub fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.0.get(name) {
                        Some(value) if !name.contains(':') => out.push_str(value),
                        _ => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Substitute through every string of a manifest.
    pub fn apply_to(&self, manifest: &Manifest) -> Manifest {
        let clauses = |cs: &[ClauseManifest]| -> Vec<ClauseManifest> {
            cs.iter()
                .map(|c| ClauseManifest {
                    operator: c.operator.clone(),
                    key: c.key.clone(),
                    values: c.values.iter().map(|v| self.apply(v)).collect(),
                })
                .collect()
        };

        let roles = manifest
            .roles
            .iter()
            .map(|role| {
                let mut role = role.clone();
                role.trust.principal = self.apply(&role.trust.principal);
                role.trust.conditions = clauses(&role.trust.conditions);
                role.permission_boundary = role.permission_boundary.as_deref().map(|b| self.apply(b));
                for bundle in &mut role.bundles {
                    bundle.resources = bundle.resources.iter().map(|r| self.apply(r)).collect();
                    bundle.conditions = clauses(&bundle.conditions);
                }
                role
            })
            .collect();

        Manifest {
            catalog: manifest.catalog.clone(),
            roles,
        }
    }
}

/// Load all `.kdl` and `.json` manifest files from the given directory, in
/// file-name order, and merge them into one manifest.
pub fn load_manifest(dir: &Path) -> Result<Manifest, CompileError> {
    if !dir.is_dir() {
        return Err(CompileError::InvalidManifest(format!(
            "manifest directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext == "kdl" || ext == "json")
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    let mut manifest = Manifest::default();
    for path in &entries {
        let contents =
            std::fs::read_to_string(path).map_err(|source| CompileError::ManifestLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = if path.extension().is_some_and(|ext| ext == "json") {
            Manifest::from_json(&contents)?
        } else {
            parse_kdl_document(&contents)?
        };
        manifest.merge(parsed);
    }

    tracing::info!(
        files = entries.len(),
        services = manifest.catalog.len(),
        roles = manifest.roles.len(),
        "Loaded role manifest"
    );

    Ok(manifest)
}

/// Substitute, validate and compose every role of the manifest. Fails on the
/// first defect; nothing is returned for a partially valid manifest.
pub fn compile(manifest: &Manifest, substitutions: &Substitutions) -> Result<CompiledRoles, CompileError> {
    let manifest = substitutions.apply_to(manifest);
    let catalog = ActionCatalog::from_services(manifest.catalog.iter().map(|(s, v)| (s, v.clone())));

    check_role_uniqueness(&manifest.roles)?;

    let mut roles = Vec::with_capacity(manifest.roles.len());
    for role in &manifest.roles {
        roles.push(compose(role, &catalog)?);
    }

    let compiled = CompiledRoles::new(catalog, roles, substitutions.clone());

    tracing::info!(
        roles = compiled.roles().len(),
        bundles = compiled.roles().iter().map(|r| r.bundles().len()).sum::<usize>(),
        actions = compiled.catalog().action_count(),
        "Compiled role definitions"
    );

    Ok(compiled)
}

/// Load the manifest directory and compile it.
pub fn load_and_compile(dir: &Path, substitutions: &Substitutions) -> Result<CompiledRoles, CompileError> {
    let manifest = load_manifest(dir)?;
    compile(&manifest, substitutions)
}

/// Role names are unique and each kind appears at most once.
fn check_role_uniqueness(roles: &[RoleManifest]) -> Result<(), CompileError> {
    let mut names = HashSet::new();
    let mut kinds = HashMap::new();
    for role in roles {
        if !names.insert(role.name.as_str()) {
            return Err(CompileError::InvalidManifest(format!(
                "role `{}` is defined more than once",
                role.name
            )));
        }
        if let Some(previous) = kinds.insert(role.kind, role.name.as_str()) {
            return Err(CompileError::InvalidManifest(format!(
                "roles `{previous}` and `{}` both have kind `{}`",
                role.name,
                role.kind.as_str()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::manifest::{BundleManifest, TrustManifest};
    use crate::authz::types::RoleKind;

    fn role(name: &str, kind: RoleKind) -> RoleManifest {
        RoleManifest {
            name: name.into(),
            kind,
            trust: TrustManifest {
                principal: "datazone.amazonaws.com".into(),
                conditions: vec![ClauseManifest {
                    operator: "StringEquals".into(),
                    key: "aws:SourceAccount".into(),
                    values: vec!["${account}".into()],
                }],
            },
            permission_boundary: None,
            bundles: vec![BundleManifest {
                sid: None,
                effect: "allow".into(),
                actions: vec!["lambda:GetFunction".into()],
                resources: vec!["arn:aws:lambda:${region}:${account}:function:br-studio*".into()],
                conditions: vec![],
            }],
        }
    }

    fn manifest(roles: Vec<RoleManifest>) -> Manifest {
        Manifest {
            catalog: BTreeMap::from([("lambda".to_string(), vec!["GetFunction".to_string()])]),
            roles,
        }
    }

    fn subs() -> Substitutions {
        Substitutions::new()
            .with("account", "123456789012")
            .with("region", "us-east-1")
    }

    #[test]
    fn test_apply_known_placeholders() {
        let s = subs();
        assert_eq!(
            s.apply("arn:aws:lambda:${region}:${account}:function:x"),
            "arn:aws:lambda:us-east-1:123456789012:function:x"
        );
        assert_eq!(s.apply("${aws:PrincipalAccount}"), "${aws:PrincipalAccount}");
        assert_eq!(s.apply("${stage}-bucket"), "${stage}-bucket");
        assert_eq!(s.apply("broken ${account"), "broken ${account");
        assert_eq!(s.partition(), "aws");
    }

    #[test]
    fn test_policy_variable_never_substituted() {
        let s = Substitutions::new().with("aws:PrincipalAccount", "999");
        assert_eq!(s.apply("${aws:PrincipalAccount}"), "${aws:PrincipalAccount}");
    }

    #[test]
    fn test_compile_substitutes_resources() {
        let compiled = compile(&manifest(vec![role("ServiceRole", RoleKind::Operational)]), &subs()).unwrap();
        let role = compiled.role("ServiceRole").unwrap();
        assert_eq!(
            role.bundles()[0].resources()[0].as_str(),
            "arn:aws:lambda:us-east-1:123456789012:function:br-studio*"
        );
        let trust_values = role.trust().conditions().clauses()[0].values();
        assert!(trust_values.contains("123456789012"));
    }

    #[test]
    fn test_compile_unresolved_placeholder_fails() {
        let err = compile(
            &manifest(vec![role("ServiceRole", RoleKind::Operational)]),
            &Substitutions::new().with("account", "123456789012"),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::MalformedResourcePattern { .. }));
    }

    #[test]
    fn test_duplicate_role_name() {
        let err = compile(
            &manifest(vec![
                role("ServiceRole", RoleKind::Operational),
                role("ServiceRole", RoleKind::Provisioning),
            ]),
            &subs(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidManifest(_)));
    }

    #[test]
    fn test_duplicate_role_kind() {
        let err = compile(
            &manifest(vec![
                role("A", RoleKind::Operational),
                role("B", RoleKind::Operational),
            ]),
            &subs(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidManifest(_)));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();

        std::fs::write(
            dir.path().join("00-catalog.kdl"),
            r#"
catalog {
    service "lambda" {
        - "GetFunction"
    }
}
"#,
        )
        .unwrap();

        std::fs::write(
            dir.path().join("10-roles.kdl"),
            r#"
role "ServiceRole" kind="operational" {
    trust "datazone.amazonaws.com"
    bundle {
        actions {
            - "lambda:GetFunction"
        }
        resources {
            - "arn:aws:lambda:${region}:${account}:function:br-studio*"
        }
    }
}
"#,
        )
        .unwrap();

        std::fs::write(
            dir.path().join("20-extra.json"),
            r#"{ "catalog": { "lambda": ["DeleteFunction"] } }"#,
        )
        .unwrap();

        // Ignored
        std::fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

        let manifest = load_manifest(dir.path()).unwrap();
        assert_eq!(manifest.catalog["lambda"], vec!["GetFunction", "DeleteFunction"]);
        assert_eq!(manifest.roles.len(), 1);

        let compiled = load_and_compile(dir.path(), &subs()).unwrap();
        assert!(compiled.role("ServiceRole").is_some());
        assert_eq!(compiled.catalog().action_count(), 2);
    }

    #[test]
    fn test_load_nonexistent_directory() {
        let err = load_manifest(Path::new("/nonexistent/path")).unwrap_err();
        assert!(matches!(err, CompileError::InvalidManifest(_)));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let m = manifest(vec![role("ServiceRole", RoleKind::Operational)]);
        let a = compile(&m, &subs()).unwrap().artifacts().to_json().unwrap();
        let b = compile(&m, &subs()).unwrap().artifacts().to_json().unwrap();
        assert_eq!(a, b);
    }
}
