//! Partial results: the response slot tree filled in during execution, and
//! its assembly into a [`Response`] with null bubbling.

use async_graphql::Value;
use fieldgate_common_types::{ErrorCategory, ResponsePath};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::FieldError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    pub category: ErrorCategory,
}

/// One entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "ResponsePath::is_empty")]
    pub path: ResponsePath,
    pub extensions: ErrorExtensions,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>, path: ResponsePath, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            path,
            extensions: ErrorExtensions { category },
        }
    }

    pub fn from_field_error(err: &FieldError, path: ResponsePath) -> Self {
        Self::new(err.to_string(), path, err.category())
    }

    pub fn category(&self) -> ErrorCategory {
        self.extensions.category
    }
}

/// The result of one query.
///
/// `data` is absent when the query was aborted before execution produced
/// anything, and `null` when a non-null failure bubbled up to the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

impl Response {
    /// A response with no data and a single top-level error.
    pub fn aborted(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            data: None,
            errors: vec![GraphqlError::new(message, ResponsePath::root(), category)],
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.data.is_none()
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub(crate) type SlotId = usize;

#[derive(Debug)]
enum Slot {
    Pending,
    Leaf(Value),
    Object(Vec<(String, SlotId)>),
    List(Vec<SlotId>),
    Null,
    Failed(GraphqlError),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    non_null: bool,
    path: ResponsePath,
}

/// Arena of response positions. Every field and list item the engine
/// visits gets a slot; completion order does not matter, since assembly
/// walks the arena in query order.
#[derive(Debug)]
pub(crate) struct ResponseTree {
    entries: Vec<Entry>,
}

pub(crate) const ROOT: SlotId = 0;

impl ResponseTree {
    /// A tree whose root is a nullable, still empty object.
    pub fn new() -> Self {
        Self {
            entries: vec![Entry {
                slot: Slot::Object(vec![]),
                non_null: false,
                path: ResponsePath::root(),
            }],
        }
    }

    pub fn add(&mut self, path: ResponsePath, non_null: bool) -> SlotId {
        self.entries.push(Entry {
            slot: Slot::Pending,
            non_null,
            path,
        });
        self.entries.len() - 1
    }

    pub fn path(&self, id: SlotId) -> &ResponsePath {
        &self.entries[id].path
    }

    /// Registers `child` under `key` of the object slot `parent`.
    pub fn attach(&mut self, parent: SlotId, key: impl Into<String>, child: SlotId) {
        match &mut self.entries[parent].slot {
            Slot::Object(fields) => fields.push((key.into(), child)),
            slot => {
                *slot = Slot::Object(vec![(key.into(), child)]);
            }
        }
    }

    pub fn set_object(&mut self, id: SlotId) {
        self.entries[id].slot = Slot::Object(vec![]);
    }

    pub fn set_list(&mut self, id: SlotId, items: Vec<SlotId>) {
        self.entries[id].slot = Slot::List(items);
    }

    pub fn set_leaf(&mut self, id: SlotId, value: Value) {
        self.entries[id].slot = match value {
            Value::Null => Slot::Null,
            value => Slot::Leaf(value),
        };
    }

    pub fn set_null(&mut self, id: SlotId) {
        self.entries[id].slot = Slot::Null;
    }

    pub fn fail(&mut self, id: SlotId, error: GraphqlError) {
        self.entries[id].slot = Slot::Failed(error);
    }

    /// Builds the final response. Errors come out depth-first in query
    /// order; a slot nulled by a bubbling child adds no error of its own.
    pub fn assemble(self) -> Response {
        let mut errors = vec![];
        let data = self.build(ROOT, &mut errors);
        Response {
            data: Some(data),
            errors,
        }
    }

    fn build(&self, id: SlotId, errors: &mut Vec<GraphqlError>) -> Value {
        let entry = &self.entries[id];
        match &entry.slot {
            Slot::Leaf(value) => value.clone(),
            Slot::Null => Value::Null,
            Slot::Failed(error) => {
                errors.push(error.clone());
                Value::Null
            }
            Slot::Pending => {
                errors.push(GraphqlError::new(
                    "Internal server error",
                    entry.path.clone(),
                    ErrorCategory::Internal,
                ));
                Value::Null
            }
            Slot::Object(fields) => {
                let mut bubbled = false;
                let mut map = IndexMap::with_capacity(fields.len());
                for (key, child) in fields {
                    let value = self.build(*child, errors);
                    bubbled |= value == Value::Null && self.entries[*child].non_null;
                    map.insert(async_graphql::Name::new(key), value);
                }
                if bubbled {
                    Value::Null
                } else {
                    Value::Object(map)
                }
            }
            Slot::List(items) => {
                let mut bubbled = false;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.build(*item, errors);
                    bubbled |= value == Value::Null && self.entries[*item].non_null;
                    values.push(value);
                }
                if bubbled {
                    Value::Null
                } else {
                    Value::List(values)
                }
            }
        }
    }
}
