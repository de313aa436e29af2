use serde::Serialize;

use crate::authz::catalog::ActionCatalog;
use crate::authz::condition;
use crate::authz::pattern::matches_any;
use crate::authz::types::{BundleRef, Effect, RequestContext, RoleDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    /// Nothing matched.
    ImplicitDeny,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::ImplicitDeny => "IMPLICIT_DENY",
        })
    }
}

/// A decision together with the bundles that produced it: the matching
/// `Deny` bundles for `DENY`, the matching `Allow` bundles for `ALLOW`,
/// nothing for `IMPLICIT_DENY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub decision: Decision,
    pub matched: Vec<BundleRef>,
}

impl Evaluation {
    fn implicit_deny() -> Self {
        Self {
            decision: Decision::ImplicitDeny,
            matched: Vec::new(),
        }
    }
}

/// Replays a role's bundles against hypothetical requests. Holds only a
/// shared borrow of the catalog; roles are passed per call and never mutated.
#[derive(Debug, Clone, Copy)]
pub struct Simulator<'a> {
    catalog: &'a ActionCatalog,
}

impl<'a> Simulator<'a> {
    pub fn new(catalog: &'a ActionCatalog) -> Self {
        Self { catalog }
    }

    /// Scan every bundle in order. Any matching `Deny` wins over any matching
    /// `Allow`; no match at all is `IMPLICIT_DENY`. Never fails: an action the
    /// catalog does not know cannot match any bundle.
    pub fn evaluate(
        &self,
        role: &RoleDefinition,
        action: &str,
        resource: &str,
        context: &RequestContext,
    ) -> Evaluation {
        let Ok(action_id) = self.catalog.normalize(action) else {
            tracing::debug!(role = %role.name(), action, "Action not in catalog");
            return Evaluation::implicit_deny();
        };

        let mut allows = Vec::new();
        let mut denies = Vec::new();

        for (index, bundle) in role.bundles().iter().enumerate() {
            if !bundle.actions().contains(&action_id) {
                continue;
            }
            if !matches_any(bundle.resources(), resource) {
                continue;
            }
            if !condition::evaluate(bundle.conditions(), context) {
                tracing::debug!(role = %role.name(), bundle = index, "Bundle conditions not met");
                continue;
            }
            match bundle.effect() {
                Effect::Allow => allows.push(role.bundle_ref(index)),
                Effect::Deny => denies.push(role.bundle_ref(index)),
            }
        }

        let evaluation = if !denies.is_empty() {
            Evaluation {
                decision: Decision::Deny,
                matched: denies,
            }
        } else if !allows.is_empty() {
            Evaluation {
                decision: Decision::Allow,
                matched: allows,
            }
        } else {
            Evaluation::implicit_deny()
        };

        tracing::debug!(
            role = %role.name(),
            action = %action_id,
            resource,
            decision = %evaluation.decision,
            "Simulated request"
        );
        evaluation
    }

    pub fn decide(
        &self,
        role: &RoleDefinition,
        action: &str,
        resource: &str,
        context: &RequestContext,
    ) -> Decision {
        self.evaluate(role, action, resource, context).decision
    }

    /// Whether `principal` may assume `role`. Trust statements only allow,
    /// so the outcome is `ALLOW` or `IMPLICIT_DENY`.
    pub fn decide_assume(
        &self,
        role: &RoleDefinition,
        principal: &str,
        context: &RequestContext,
    ) -> Decision {
        let trust = role.trust();
        if trust.principal() == principal && condition::evaluate(trust.conditions(), context) {
            Decision::Allow
        } else {
            Decision::ImplicitDeny
        }
    }
}
