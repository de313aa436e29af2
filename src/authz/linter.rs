//! Static analysis of composed roles.
//!
//! Linting is advisory. It reads a [`RoleDefinition`] and returns findings as
//! data; whether a finding blocks deployment is decided by the caller through
//! [`LintReport::blocks`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::authz::catalog::ActionCatalog;
use crate::authz::types::{
    BundleRef, ConditionClause, ConditionOperator, ConditionPredicate, Effect, PermissionBundle,
    Quantifier, RoleDefinition,
};

const PERMISSIONS_BOUNDARY_KEY: &str = "iam:PermissionsBoundary";

/// Condition key families the rules look for. Keys are compared
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// Block deployment on warnings as well as errors.
    pub strict: bool,
    /// A clause whose key starts with one of these is a tag-presence clause.
    pub tag_key_prefixes: Vec<String>,
    /// Keys that attribute the request to a calling service.
    pub call_chain_keys: Vec<String>,
    /// Trust keys that pin the calling account.
    pub account_keys: Vec<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            strict: false,
            tag_key_prefixes: to_strings(&[
                "aws:ResourceTag/",
                "aws:RequestTag/",
                "aws:TagKeys",
                "tag:",
            ]),
            call_chain_keys: to_strings(&[
                "aws:CalledVia",
                "aws:CalledViaFirst",
                "aws:CalledViaLast",
            ]),
            account_keys: to_strings(&[
                "aws:SourceAccount",
                "aws:SourceArn",
                "aws:SourceOwner",
                "aws:PrincipalAccount",
            ]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LintRule {
    OverlyBroadGrant,
    MissingPermissionBoundary,
    UnboundedPrivilege,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub rule: LintRule,
    pub bundle: BundleRef,
    pub message: String,
}

pub struct Linter<'a> {
    catalog: &'a ActionCatalog,
    config: &'a LintConfig,
}

impl<'a> Linter<'a> {
    pub fn new(catalog: &'a ActionCatalog, config: &'a LintConfig) -> Self {
        Self { catalog, config }
    }

    /// Findings in bundle order. Never fails and never touches the role.
    pub fn lint(&self, role: &RoleDefinition) -> Vec<Finding> {
        let trust_pins_account = self.constrains_account(role.trust().conditions());
        let mut findings = Vec::new();

        for (index, bundle) in role.bundles().iter().enumerate() {
            if bundle.effect() != Effect::Allow {
                continue;
            }

            if self.is_unconditionally_broad(bundle) {
                let actions = self.mutating_actions(bundle).join(", ");
                if trust_pins_account {
                    findings.push(Finding {
                        severity: Severity::Warning,
                        rule: LintRule::OverlyBroadGrant,
                        bundle: role.bundle_ref(index),
                        message: format!(
                            "overly broad grant: {actions} on a wildcard resource without a tag-presence or call-chain condition"
                        ),
                    });
                } else {
                    findings.push(Finding {
                        severity: Severity::Error,
                        rule: LintRule::UnboundedPrivilege,
                        bundle: role.bundle_ref(index),
                        message: format!(
                            "unbounded privilege: {actions} on a wildcard resource, and the trust policy of `{}` does not constrain the calling account",
                            role.name()
                        ),
                    });
                }
            }

            let creates_roles = bundle
                .actions()
                .iter()
                .any(|a| self.catalog.is_role_creation(a));
            if creates_roles
                && role.permission_boundary().is_none()
                && !requires_boundary(bundle.conditions())
            {
                findings.push(Finding {
                    severity: Severity::Warning,
                    rule: LintRule::MissingPermissionBoundary,
                    bundle: role.bundle_ref(index),
                    message: format!(
                        "missing permission boundary: bundle creates roles but `{}` declares no permission boundary and the bundle does not require `{PERMISSIONS_BOUNDARY_KEY}`",
                        role.name()
                    ),
                });
            }
        }

        tracing::debug!(role = %role.name(), findings = findings.len(), "Linted role");
        findings
    }

    fn mutating_actions(&self, bundle: &PermissionBundle) -> Vec<String> {
        bundle
            .actions()
            .iter()
            .filter(|a| self.catalog.category(a).is_mutating())
            .map(|a| a.to_string())
            .collect()
    }

    /// Mutating action, wildcard resource, and neither a tag-presence nor a
    /// call-chain clause.
    fn is_unconditionally_broad(&self, bundle: &PermissionBundle) -> bool {
        let mutating = bundle
            .actions()
            .iter()
            .any(|a| self.catalog.category(a).is_mutating());
        let wildcard = bundle.resources().iter().any(|r| r.is_account_wildcard());
        if !mutating || !wildcard {
            return false;
        }
        let narrowed = bundle.conditions().clauses().iter().any(|c| {
            requires_key(c)
                && (key_has_prefix(c.key(), &self.config.tag_key_prefixes)
                    || key_in(c.key(), &self.config.call_chain_keys))
        });
        !narrowed
    }

    fn constrains_account(&self, predicate: &ConditionPredicate) -> bool {
        predicate
            .clauses()
            .iter()
            .any(|c| requires_key(c) && key_in(c.key(), &self.config.account_keys))
    }
}

/// True when the clause can only hold if the request carries the key with a
/// specific value. `ForAllValues:` is vacuous on an absent key, `NotEquals`
/// says nothing about presence, a bare `*` pattern matches anything, and
/// `Null(key, "true")` demands absence.
fn requires_key(clause: &ConditionClause) -> bool {
    if clause.quantifier() == Quantifier::ForAll {
        return false;
    }
    match clause.operator() {
        ConditionOperator::Null => clause.is_present_check(),
        ConditionOperator::NotEquals => false,
        ConditionOperator::Equals => true,
        ConditionOperator::StringLike => !clause.values().iter().any(|v| v == "*"),
    }
}

fn requires_boundary(predicate: &ConditionPredicate) -> bool {
    predicate.clauses().iter().any(|c| {
        c.operator() == ConditionOperator::Equals
            && requires_key(c)
            && c.key().eq_ignore_ascii_case(PERMISSIONS_BOUNDARY_KEY)
    })
}

fn key_has_prefix(key: &str, prefixes: &[String]) -> bool {
    let key = key.to_ascii_lowercase();
    prefixes
        .iter()
        .any(|p| key.starts_with(&p.to_ascii_lowercase()))
}

fn key_in(key: &str, keys: &[String]) -> bool {
    keys.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Findings for a set of roles, keyed by role name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LintReport {
    pub roles: BTreeMap<String, Vec<Finding>>,
}

impl LintReport {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.roles.values().flatten()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings().filter(|f| f.severity == severity).count()
    }

    pub fn is_clean(&self) -> bool {
        self.findings().next().is_none()
    }

    /// Strict mode blocks on any finding; otherwise only errors block.
    pub fn blocks(&self, strict: bool) -> bool {
        if strict {
            !self.is_clean()
        } else {
            self.count(Severity::Error) > 0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::composer::compose;
    use crate::authz::manifest::{BundleManifest, ClauseManifest, RoleManifest, TrustManifest};
    use crate::authz::types::RoleKind;

    fn catalog() -> ActionCatalog {
        ActionCatalog::from_services([
            ("iam", vec!["CreateRole", "DeleteRole", "GetRole", "PassRole"]),
            ("bedrock", vec!["InvokeModel", "CreateAgent"]),
        ])
    }

    fn clause(operator: &str, key: &str, values: &[&str]) -> ClauseManifest {
        ClauseManifest {
            operator: operator.into(),
            key: key.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn bundle(effect: &str, actions: &[&str], resources: &[&str], conditions: Vec<ClauseManifest>) -> BundleManifest {
        BundleManifest {
            sid: None,
            effect: effect.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            conditions,
        }
    }

    fn role(trust_conditions: Vec<ClauseManifest>, boundary: Option<&str>, bundles: Vec<BundleManifest>) -> RoleDefinition {
        let manifest = RoleManifest {
            name: "ProvisionRole".into(),
            kind: RoleKind::Provisioning,
            trust: TrustManifest {
                principal: "datazone.amazonaws.com".into(),
                conditions: trust_conditions,
            },
            permission_boundary: boundary.map(str::to_string),
            bundles,
        };
        compose(&manifest, &catalog()).unwrap()
    }

    fn pinned() -> Vec<ClauseManifest> {
        vec![clause("StringEquals", "aws:SourceAccount", &["123456789012"])]
    }

    fn lint(role: &RoleDefinition) -> Vec<Finding> {
        let catalog = catalog();
        let config = LintConfig::default();
        Linter::new(&catalog, &config).lint(role)
    }

    #[test]
    fn test_delete_role_on_star_is_error() {
        let findings = lint(&role(vec![], None, vec![bundle("allow", &["iam:DeleteRole"], &["*"], vec![])]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
        assert_eq!(findings[0].rule, LintRule::UnboundedPrivilege);
        assert_eq!(findings[0].bundle.index, 0);
    }

    #[test]
    fn test_pinned_trust_downgrades_to_warning() {
        let findings = lint(&role(
            pinned(),
            None,
            vec![bundle("allow", &["iam:DeleteRole"], &["arn:aws:iam::*:role/Foo*"], vec![])],
        ));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].rule, LintRule::OverlyBroadGrant);
    }

    #[test]
    fn test_narrowing_conditions_suppress_broad_grant() {
        let tagged = bundle(
            "allow",
            &["iam:DeleteRole"],
            &["*"],
            vec![clause("Null", "aws:ResourceTag/AmazonDataZoneEnvironment", &["false"])],
        );
        let called_via = bundle(
            "allow",
            &["iam:PassRole"],
            &["*"],
            vec![clause("StringEquals", "aws:calledviafirst", &["cloudformation.amazonaws.com"])],
        );
        assert!(lint(&role(vec![], None, vec![tagged, called_via])).is_empty());
    }

    #[test]
    fn test_tag_absence_check_does_not_narrow() {
        let findings = lint(&role(
            pinned(),
            None,
            vec![bundle(
                "allow",
                &["iam:DeleteRole"],
                &["*"],
                vec![clause("Null", "aws:ResourceTag/Owner", &["true"])],
            )],
        ));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, LintRule::OverlyBroadGrant);
    }

    #[test]
    fn test_vacuous_clauses_do_not_narrow() {
        let shapes = [
            clause("ForAllValues:StringLike", "aws:TagKeys", &["*"]),
            clause("ForAllValues:StringEquals", "aws:CalledViaFirst", &["cloudformation.amazonaws.com"]),
            clause("StringNotEquals", "aws:CalledViaFirst", &["lambda.amazonaws.com"]),
            clause("StringLike", "aws:ResourceTag/Env", &["*"]),
            clause("ForAnyValue:StringLike", "aws:TagKeys", &["*"]),
        ];
        for shape in shapes {
            let findings = lint(&role(
                pinned(),
                None,
                vec![bundle("allow", &["iam:DeleteRole"], &["*"], vec![shape.clone()])],
            ));
            assert_eq!(findings.len(), 1, "{} {}", shape.operator, shape.key);
            assert_eq!(findings[0].rule, LintRule::OverlyBroadGrant);
        }
    }

    #[test]
    fn test_vacuous_trust_clause_does_not_pin_account() {
        let shapes = [
            clause("ForAllValues:StringEquals", "aws:SourceAccount", &["123456789012"]),
            clause("StringNotEquals", "aws:SourceAccount", &["999999999999"]),
            clause("StringLike", "aws:SourceArn", &["*"]),
            clause("Null", "aws:SourceAccount", &["true"]),
        ];
        for shape in shapes {
            let findings = lint(&role(
                vec![shape.clone()],
                None,
                vec![bundle(
                    "allow",
                    &["iam:DeleteRole"],
                    &["*"],
                    vec![clause("ForAllValues:StringLike", "aws:TagKeys", &["*"])],
                )],
            ));
            assert_eq!(findings.len(), 1, "{} {}", shape.operator, shape.key);
            assert_eq!(findings[0].severity, Severity::Error);
            assert_eq!(findings[0].rule, LintRule::UnboundedPrivilege);
        }

        let pattern_pinned = lint(&role(
            vec![clause("StringLike", "aws:SourceArn", &["arn:aws:datazone:*:123456789012:*"])],
            None,
            vec![bundle("allow", &["iam:DeleteRole"], &["*"], vec![])],
        ));
        assert_eq!(pattern_pinned.len(), 1);
        assert_eq!(pattern_pinned[0].severity, Severity::Warning);
    }

    #[test]
    fn test_read_only_and_pinned_account_are_clean() {
        let findings = lint(&role(
            vec![],
            None,
            vec![
                bundle("allow", &["iam:GetRole", "bedrock:InvokeModel"], &["*"], vec![]),
                bundle(
                    "allow",
                    &["bedrock:CreateAgent"],
                    &["arn:aws:bedrock:us-east-1:123456789012:agent/*"],
                    vec![],
                ),
            ],
        ));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_deny_bundles_not_linted() {
        assert!(lint(&role(vec![], None, vec![bundle("deny", &["iam:DeleteRole"], &["*"], vec![])])).is_empty());
    }

    #[test]
    fn test_missing_permission_boundary() {
        let create = || {
            bundle(
                "allow",
                &["iam:CreateRole"],
                &["arn:aws:iam::123456789012:role/DataZoneBedrockProjectRole*"],
                vec![],
            )
        };

        let findings = lint(&role(pinned(), None, vec![create()]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, LintRule::MissingPermissionBoundary);
        assert_eq!(findings[0].severity, Severity::Warning);

        let bounded = role(
            pinned(),
            Some("arn:aws:iam::123456789012:policy/AmazonDataZoneBedrockPermissionsBoundary"),
            vec![create()],
        );
        assert!(lint(&bounded).is_empty());

        let mut conditioned = create();
        conditioned.conditions = vec![clause(
            "StringEquals",
            "iam:PermissionsBoundary",
            &["arn:aws:iam::123456789012:policy/AmazonDataZoneBedrockPermissionsBoundary"],
        )];
        assert!(lint(&role(pinned(), None, vec![conditioned])).is_empty());

        let mut vacuous = create();
        vacuous.conditions = vec![clause(
            "ForAllValues:StringEquals",
            "iam:PermissionsBoundary",
            &["arn:aws:iam::123456789012:policy/AmazonDataZoneBedrockPermissionsBoundary"],
        )];
        let findings = lint(&role(pinned(), None, vec![vacuous]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, LintRule::MissingPermissionBoundary);
    }

    #[test]
    fn test_custom_key_families() {
        let catalog = catalog();
        let config = LintConfig {
            call_chain_keys: vec!["aws:ViaAWSService".into()],
            ..LintConfig::default()
        };
        let def = role(
            pinned(),
            None,
            vec![bundle(
                "allow",
                &["iam:DeleteRole"],
                &["*"],
                vec![clause("StringEquals", "aws:ViaAWSService", &["true"])],
            )],
        );
        assert!(Linter::new(&catalog, &config).lint(&def).is_empty());
    }

    #[test]
    fn test_report_blocks() {
        let warning = Finding {
            severity: Severity::Warning,
            rule: LintRule::OverlyBroadGrant,
            bundle: BundleRef { index: 0, sid: None },
            message: String::new(),
        };
        let mut report = LintReport::default();
        assert!(!report.blocks(true));

        report.roles.insert("A".into(), vec![warning.clone()]);
        assert!(report.blocks(true));
        assert!(!report.blocks(false));

        report.roles.insert(
            "B".into(),
            vec![Finding {
                severity: Severity::Error,
                rule: LintRule::UnboundedPrivilege,
                ..warning
            }],
        );
        assert!(report.blocks(false));
        assert_eq!(report.count(Severity::Error), 1);
    }
}
