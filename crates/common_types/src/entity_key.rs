use std::fmt::{self, Display};

use async_graphql::Value;
use quickcheck::Arbitrary;
use serde::{Deserialize, Serialize};

/// The key of an entity in a data source, e.g. a product SKU or a numeric
/// category ID. Keys are compared by value: `Int(7)` and `String("7")` are
/// different keys.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
)]
#[serde(untagged)]
pub enum EntityKey {
    Int(i64),
    String(String),
}

impl EntityKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntityKey::String(s) => Some(s),
            EntityKey::Int(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityKey::Int(i) => Value::from(*i),
            EntityKey::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        EntityKey::String(s.to_owned())
    }
}

impl From<i32> for EntityKey {
    fn from(i: i32) -> Self {
        EntityKey::Int(i.into())
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(i) => write!(f, "{i}"),
            EntityKey::String(s) => write!(f, "\"{s}\""),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("value `{0}` cannot be used as an entity key")]
pub struct InvalidEntityKey(pub Value);

impl TryFrom<&Value> for EntityKey {
    type Error = InvalidEntityKey;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(EntityKey::String(s.clone())),
            Value::Enum(name) => Ok(EntityKey::String(name.to_string())),
            Value::Number(n) => n
                .as_i64()
                .map(EntityKey::Int)
                .ok_or_else(|| InvalidEntityKey(value.clone())),
            _ => Err(InvalidEntityKey(value.clone())),
        }
    }
}

impl Arbitrary for EntityKey {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        if bool::arbitrary(g) {
            EntityKey::Int(i64::arbitrary(g))
        } else {
            EntityKey::String(String::arbitrary(g))
        }
    }
}
