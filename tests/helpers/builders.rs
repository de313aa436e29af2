use rolewright::authz::manifest::{
    BundleManifest, ClauseManifest, Manifest, RoleManifest, TrustManifest,
};
use rolewright::authz::types::RoleKind;

/// Builder for test manifests
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            manifest: Manifest::default(),
        }
    }

    pub fn with_service(mut self, service: &str, verbs: &[&str]) -> Self {
        self.manifest
            .catalog
            .entry(service.to_string())
            .or_default()
            .extend(verbs.iter().map(|v| v.to_string()));
        self
    }

    pub fn with_role(mut self, role: RoleBuilder) -> Self {
        self.manifest.roles.push(role.build());
        self
    }

    pub fn build(self) -> Manifest {
        self.manifest
    }
}

/// Builder for test roles
pub struct RoleBuilder {
    role: RoleManifest,
}

impl RoleBuilder {
    pub fn new(name: &str, kind: RoleKind) -> Self {
        Self {
            role: RoleManifest {
                name: name.to_string(),
                kind,
                trust: TrustManifest {
                    principal: "datazone.amazonaws.com".to_string(),
                    conditions: Vec::new(),
                },
                permission_boundary: None,
                bundles: Vec::new(),
            },
        }
    }

    pub fn trusted_by(mut self, principal: &str) -> Self {
        self.role.trust.principal = principal.to_string();
        self
    }

    pub fn with_trust_condition(mut self, operator: &str, key: &str, values: &[&str]) -> Self {
        self.role.trust.conditions.push(clause(operator, key, values));
        self
    }

    pub fn with_permission_boundary(mut self, arn: &str) -> Self {
        self.role.permission_boundary = Some(arn.to_string());
        self
    }

    pub fn with_bundle(mut self, bundle: BundleBuilder) -> Self {
        self.role.bundles.push(bundle.build());
        self
    }

    pub fn build(self) -> RoleManifest {
        self.role
    }
}

/// Builder for test permission bundles (Allow unless `deny()` is called)
pub struct BundleBuilder {
    bundle: BundleManifest,
}

impl BundleBuilder {
    pub fn new(actions: &[&str], resources: &[&str]) -> Self {
        Self {
            bundle: BundleManifest {
                sid: None,
                effect: "allow".to_string(),
                actions: actions.iter().map(|a| a.to_string()).collect(),
                resources: resources.iter().map(|r| r.to_string()).collect(),
                conditions: Vec::new(),
            },
        }
    }

    pub fn sid(mut self, sid: &str) -> Self {
        self.bundle.sid = Some(sid.to_string());
        self
    }

    pub fn deny(mut self) -> Self {
        self.bundle.effect = "deny".to_string();
        self
    }

    pub fn with_condition(mut self, operator: &str, key: &str, values: &[&str]) -> Self {
        self.bundle.conditions.push(clause(operator, key, values));
        self
    }

    pub fn build(self) -> BundleManifest {
        self.bundle
    }
}

fn clause(operator: &str, key: &str, values: &[&str]) -> ClauseManifest {
    ClauseManifest {
        operator: operator.to_string(),
        key: key.to_string(),
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}
