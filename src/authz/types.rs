use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Namespaced action identifier `service:Verb`, e.g. `iam:CreateRole`.
///
/// Only [`ActionCatalog::normalize`](crate::authz::catalog::ActionCatalog::normalize)
/// produces these, so every instance resolves in the catalog it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionIdentifier {
    pub(crate) service: String,
    pub(crate) verb: String,
}

impl ActionIdentifier {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }
}

impl std::fmt::Display for ActionIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.verb)
    }
}

impl Serialize for ActionIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// ARN-shaped resource pattern; `*` matches any run of characters.
/// Construct with [`ResourcePattern::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourcePattern(pub(crate) String);

impl ResourcePattern {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("allow") {
            Some(Effect::Allow)
        } else if s.eq_ignore_ascii_case("deny") {
            Some(Effect::Deny)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Null,
    StringLike,
}

impl ConditionOperator {
    /// Name used in compiled policy documents.
    pub fn wire_name(self) -> &'static str {
        match self {
            ConditionOperator::Equals => "StringEquals",
            ConditionOperator::NotEquals => "StringNotEquals",
            ConditionOperator::Null => "Null",
            ConditionOperator::StringLike => "StringLike",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Quantifier {
    None,
    ForAny,
    ForAll,
}

impl Quantifier {
    fn wire_prefix(self) -> &'static str {
        match self {
            Quantifier::None => "",
            Quantifier::ForAny => "ForAnyValue:",
            Quantifier::ForAll => "ForAllValues:",
        }
    }
}

/// A single typed condition clause. Built by
/// [`ConditionClause::parse`](crate::authz::condition) during composition,
/// which enforces the operator/value invariants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConditionClause {
    pub(crate) operator: ConditionOperator,
    pub(crate) quantifier: Quantifier,
    pub(crate) key: String,
    pub(crate) values: BTreeSet<String>,
}

impl ConditionClause {
    pub fn operator(&self) -> ConditionOperator {
        self.operator
    }

    pub fn quantifier(&self) -> Quantifier {
        self.quantifier
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    /// Operator block name, e.g. `ForAnyValue:StringLike`.
    pub fn block_name(&self) -> String {
        format!("{}{}", self.quantifier.wire_prefix(), self.operator.wire_name())
    }
}

/// Conjunction of condition clauses, stored in canonical order
/// (operator block name, then key). Empty means unconditional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConditionPredicate {
    pub(crate) clauses: Vec<ConditionClause>,
}

impl ConditionPredicate {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[ConditionClause] {
        &self.clauses
    }

    /// Render as `{ block: { key: [values] } }`, the compiled `Condition` shape.
    pub fn to_blocks(&self) -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
        let mut blocks: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for clause in &self.clauses {
            blocks
                .entry(clause.block_name())
                .or_default()
                .insert(clause.key.clone(), clause.values.iter().cloned().collect());
        }
        blocks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionBundle {
    pub(crate) sid: Option<String>,
    pub(crate) effect: Effect,
    pub(crate) actions: BTreeSet<ActionIdentifier>,
    pub(crate) resources: Vec<ResourcePattern>,
    pub(crate) conditions: ConditionPredicate,
}

impl PermissionBundle {
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn actions(&self) -> &BTreeSet<ActionIdentifier> {
        &self.actions
    }

    pub fn resources(&self) -> &[ResourcePattern] {
        &self.resources
    }

    pub fn conditions(&self) -> &ConditionPredicate {
        &self.conditions
    }
}

/// Who may assume a role, and under which conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustPredicate {
    pub(crate) principal: String,
    pub(crate) conditions: ConditionPredicate,
}

impl TrustPredicate {
    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn conditions(&self) -> &ConditionPredicate {
        &self.conditions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    /// Narrow steady-state role.
    Operational,
    /// Broader role used only while dependent infrastructure is created or torn down.
    Provisioning,
}

impl RoleKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "operational" => Some(RoleKind::Operational),
            "provisioning" => Some(RoleKind::Provisioning),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::Operational => "operational",
            RoleKind::Provisioning => "provisioning",
        }
    }

    /// Name of the pipeline output carrying this role's identifier.
    pub fn output_name(self) -> &'static str {
        match self {
            RoleKind::Operational => "operational-role-arn",
            RoleKind::Provisioning => "provisioning-role-arn",
        }
    }
}

/// A composed role. Immutable: only the composer constructs it and nothing
/// exposes mutable access afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    pub(crate) name: String,
    pub(crate) kind: RoleKind,
    pub(crate) trust: TrustPredicate,
    pub(crate) bundles: Vec<PermissionBundle>,
    pub(crate) permission_boundary: Option<ResourcePattern>,
}

impl RoleDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn trust(&self) -> &TrustPredicate {
        &self.trust
    }

    /// Bundles in manifest order.
    pub fn bundles(&self) -> &[PermissionBundle] {
        &self.bundles
    }

    pub fn permission_boundary(&self) -> Option<&ResourcePattern> {
        self.permission_boundary.as_ref()
    }

    pub fn bundle_ref(&self, index: usize) -> BundleRef {
        BundleRef {
            index,
            sid: self.bundles.get(index).and_then(|b| b.sid.clone()),
        }
    }
}

/// Points at one bundle of a role: its position, and its statement id if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BundleRef {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

impl std::fmt::Display for BundleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sid {
            Some(sid) => write!(f, "#{} ({})", self.index, sid),
            None => write!(f, "#{}", self.index),
        }
    }
}

// ---------- Request context ----------

/// A request attribute: single-valued or an ordered multi-valued sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Single(String),
    Multi(Vec<String>),
}

impl ContextValue {
    pub fn as_slice(&self) -> &[String] {
        match self {
            ContextValue::Single(v) => std::slice::from_ref(v),
            ContextValue::Multi(vs) => vs,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Single(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Single(value)
    }
}

impl From<Vec<&str>> for ContextValue {
    fn from(values: Vec<&str>) -> Self {
        ContextValue::Multi(values.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(values: Vec<String>) -> Self {
        ContextValue::Multi(values)
    }
}

/// Attributes supplied with a simulated request. Never stored in a role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext {
    entries: BTreeMap<String, ContextValue>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
