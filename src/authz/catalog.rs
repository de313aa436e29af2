//! Registry of known actions.
//!
//! The catalog is an explicit value handed to the composer and the simulator;
//! there is no global registry. Lookups are case-insensitive on both the
//! service and the verb, and resolve to the canonical spelling registered here.

use std::collections::{BTreeMap, HashMap};

use crate::authz::errors::CompileError;
use crate::authz::types::ActionIdentifier;

/// Coarse behavior of an action, derived from its verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    Read,
    Create,
    Update,
    Delete,
    Attach,
    Detach,
    PassRole,
    Tagging,
    Other,
}

impl ActionCategory {
    /// Create, update, delete, attach, detach, pass-role.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            ActionCategory::Create
                | ActionCategory::Update
                | ActionCategory::Delete
                | ActionCategory::Attach
                | ActionCategory::Detach
                | ActionCategory::PassRole
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    /// lowercase service -> (lowercase verb -> canonical verb)
    services: HashMap<String, HashMap<String, String>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from `(service, verbs)` pairs.
    pub fn from_services<S, V, I>(services: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<V>)>,
        S: AsRef<str>,
        V: AsRef<str>,
    {
        let mut catalog = Self::new();
        for (service, verbs) in services {
            catalog.register(service.as_ref(), verbs.iter().map(|v| v.as_ref()));
        }
        catalog
    }

    /// Add verbs for a service. The first spelling registered for a verb wins.
    pub fn register<'a>(&mut self, service: &str, verbs: impl IntoIterator<Item = &'a str>) {
        let entry = self
            .services
            .entry(service.trim().to_ascii_lowercase())
            .or_default();
        for verb in verbs {
            let verb = verb.trim();
            entry
                .entry(verb.to_ascii_lowercase())
                .or_insert_with(|| verb.to_string());
        }
    }

    /// Resolve a raw `service:Verb` string to its canonical identifier.
    pub fn normalize(&self, raw: &str) -> Result<ActionIdentifier, CompileError> {
        let unknown = || CompileError::UnknownAction {
            action: raw.to_string(),
        };
        let (service, verb) = raw.trim().split_once(':').ok_or_else(unknown)?;
        let service = service.to_ascii_lowercase();
        let canonical = self
            .services
            .get(&service)
            .and_then(|verbs| verbs.get(&verb.to_ascii_lowercase()))
            .ok_or_else(unknown)?;
        Ok(ActionIdentifier {
            service,
            verb: canonical.clone(),
        })
    }

    pub fn is_known(&self, id: &ActionIdentifier) -> bool {
        self.services
            .get(&id.service)
            .and_then(|verbs| verbs.get(&id.verb.to_ascii_lowercase()))
            .is_some_and(|canonical| *canonical == id.verb)
    }

    pub fn category(&self, id: &ActionIdentifier) -> ActionCategory {
        categorize(id)
    }

    /// `iam:CreateRole`. Service-linked roles cannot carry a boundary and are
    /// not counted.
    pub fn is_role_creation(&self, id: &ActionIdentifier) -> bool {
        id.service == "iam" && id.verb == "CreateRole"
    }

    pub fn action_count(&self) -> usize {
        self.services.values().map(|v| v.len()).sum()
    }

    /// Services and their canonical verbs in sorted order.
    pub fn entries(&self) -> BTreeMap<&str, Vec<&str>> {
        self.services
            .iter()
            .map(|(service, verbs)| {
                let mut vs: Vec<&str> = verbs.values().map(String::as_str).collect();
                vs.sort_unstable();
                (service.as_str(), vs)
            })
            .collect()
    }
}

fn categorize(id: &ActionIdentifier) -> ActionCategory {
    if id.service == "iam" && id.verb == "PassRole" {
        return ActionCategory::PassRole;
    }
    let verb = id.verb.as_str();
    const TABLE: &[(&str, ActionCategory)] = &[
        ("BatchGet", ActionCategory::Read),
        ("Get", ActionCategory::Read),
        ("List", ActionCategory::Read),
        ("Describe", ActionCategory::Read),
        ("Search", ActionCategory::Read),
        ("Create", ActionCategory::Create),
        ("Update", ActionCategory::Update),
        ("Put", ActionCategory::Update),
        ("Modify", ActionCategory::Update),
        ("Delete", ActionCategory::Delete),
        ("Remove", ActionCategory::Delete),
        ("Attach", ActionCategory::Attach),
        ("Associate", ActionCategory::Attach),
        ("Add", ActionCategory::Attach),
        ("Detach", ActionCategory::Detach),
        ("Disassociate", ActionCategory::Detach),
        ("Untag", ActionCategory::Tagging),
        ("UnTag", ActionCategory::Tagging),
        ("Tag", ActionCategory::Tagging),
    ];
    TABLE
        .iter()
        .find(|(prefix, _)| starts_with_word(verb, prefix))
        .map(|(_, category)| *category)
        .unwrap_or(ActionCategory::Other)
}

/// `prefix` followed by an uppercase letter or the end of the verb, so that
/// `Address…` is not read as `Add`.
fn starts_with_word(verb: &str, prefix: &str) -> bool {
    match verb.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_uppercase()),
        None => false,
    }
}
