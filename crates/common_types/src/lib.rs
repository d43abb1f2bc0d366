//! Vocabulary shared by the Fieldgate engine, its HTTP API and its
//! collaborators (identity, policy and data-fetch providers).

mod entity_key;
pub mod inputs;
mod path;

use std::collections::BTreeSet;

pub use entity_key::{EntityKey, InvalidEntityKey};
pub use inputs::QueryRequest;
pub use path::{PathSegment, ResponsePath};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The category tag carried by every error in a response, under
/// `extensions.category`.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorCategory {
    /// Caller-supplied arguments failed validation, or the document could not
    /// be mapped onto the schema.
    Input,
    /// A field requires an identity but the request is anonymous.
    Authentication,
    /// The identity is known but not allowed to access the field.
    Authorization,
    /// An entity key resolved to no record.
    NotFound,
    /// The data source of an entity type failed wholesale for a batch.
    SourceUnavailable,
    /// Any other fault. Messages in this category are always generic.
    Internal,
}

/// The authenticated party behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subject {
    pub id: String,
    pub capabilities: BTreeSet<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Who is asking. Requests without a (valid) token are anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(Subject),
}

impl Identity {
    pub fn authenticated(subject: Subject) -> Self {
        Identity::Authenticated(subject)
    }

    pub fn subject(&self) -> Option<&Subject> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(subject) => Some(subject),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject().is_some()
    }
}

/// Store and locale a request is executed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Store code, e.g. `default` or `eu_store`.
    pub store: String,
    /// Locale in `language_TERRITORY` form, e.g. `en_US`.
    pub locale: String,
}

impl Scope {
    pub fn new(store: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            locale: locale.into(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new("default", "en_US")
    }
}
