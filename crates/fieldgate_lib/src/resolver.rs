//! The resolver contract: what a resolver receives and what it may return.

use std::fmt;

use async_graphql::Value;
use async_trait::async_trait;
use fieldgate_common_types::{EntityKey, Identity, ResponsePath, Scope};
use indexmap::IndexMap;

use crate::context::ExecutionContext;
use crate::error::{FieldError, FieldResult};
use crate::loader::LoadRequest;
use crate::schema::FieldDefinition;

/// Produces the value of a field from its parent value.
///
/// Resolvers must not fetch entities directly. To read an entity, return
/// [`Resolution::load`] (or one of its siblings) and the engine will batch
/// the request with every other load of the same tier.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, ctx: &ResolverContext<'_>) -> FieldResult<Resolution>;
}

/// Adapts a plain function into a [`FieldResolver`]. See [`resolver_fn`].
pub struct FnResolver<F>(F);

/// Wraps a synchronous function as a resolver. Most resolvers only derive a
/// value or a load request from their inputs and never need to await.
pub fn resolver_fn<F>(f: F) -> FnResolver<F>
where
    F: Fn(&ResolverContext<'_>) -> FieldResult<Resolution> + Send + Sync,
{
    FnResolver(f)
}

#[async_trait]
impl<F> FieldResolver for FnResolver<F>
where
    F: Fn(&ResolverContext<'_>) -> FieldResult<Resolution> + Send + Sync,
{
    async fn resolve(&self, ctx: &ResolverContext<'_>) -> FieldResult<Resolution> {
        (self.0)(ctx)
    }
}

/// Everything a resolver gets to see.
#[derive(Debug, Clone, Copy)]
pub struct ResolverContext<'a> {
    pub field: &'a FieldDefinition,
    pub execution: &'a ExecutionContext,
    /// Coerced arguments, defaults applied.
    pub arguments: &'a Arguments,
    pub parent: &'a Value,
    pub path: &'a ResponsePath,
}

impl<'a> ResolverContext<'a> {
    pub fn identity(&self) -> &'a Identity {
        self.execution.identity()
    }

    pub fn scope(&self) -> &'a Scope {
        self.execution.scope()
    }

    pub fn argument(&self, name: &str) -> Option<&'a Value> {
        self.arguments.get(name)
    }

    /// An entry of the parent object value.
    pub fn parent_field(&self, name: &str) -> Option<&'a Value> {
        match self.parent {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// The entry `name` of the parent object, as an entity key.
    pub fn parent_key(&self, name: &str) -> FieldResult<EntityKey> {
        let value = self.parent_field(name).ok_or_else(|| {
            FieldError::internal(format!(
                "parent of `{}` has no `{name}` entry",
                self.field.qualified_name()
            ))
        })?;
        EntityKey::try_from(value).map_err(|err| FieldError::Internal(err.into()))
    }
}

/// Coerced argument values of one field, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(IndexMap<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Value::String(s) => Some(s),
            Value::Enum(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// A required argument as an entity key, e.g. `product(sku: "A")`.
    pub fn key(&self, name: &str) -> FieldResult<EntityKey> {
        let value = self
            .get(name)
            .filter(|value| !matches!(value, Value::Null))
            .ok_or_else(|| FieldError::input(format!("Argument `{name}` is required")))?;
        EntityKey::try_from(value)
            .map_err(|_| FieldError::input(format!("Argument `{name}` is not a valid key")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

type Continuation = Box<dyn FnOnce(Vec<Value>) -> FieldResult<Resolution> + Send>;

/// A resolution waiting on entity loads.
///
/// Once every request has been fetched, the continuation receives the loaded
/// values in request order. It may in turn return another `Deferred`, which
/// is flushed within the same tier.
pub struct Deferred {
    pub(crate) requests: Vec<LoadRequest>,
    pub(crate) continuation: Continuation,
}

impl Deferred {
    pub fn new<F>(requests: Vec<LoadRequest>, continuation: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> FieldResult<Resolution> + Send + 'static,
    {
        Self {
            requests,
            continuation: Box::new(continuation),
        }
    }

    pub fn requests(&self) -> &[LoadRequest] {
        &self.requests
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// The outcome of a resolver that did not fail.
#[derive(Debug)]
pub enum Resolution {
    Value(Value),
    Deferred(Deferred),
}

impl Resolution {
    pub fn value(value: impl Into<Value>) -> Self {
        Resolution::Value(value.into())
    }

    pub fn null() -> Self {
        Resolution::Value(Value::Null)
    }

    /// Resolves to the entity `key` of `entity_type`.
    pub fn load(entity_type: impl Into<String>, key: impl Into<EntityKey>) -> Self {
        Self::load_then(entity_type, key, |value| Ok(Resolution::Value(value)))
    }

    /// Resolves to a list holding the entities `keys`, in order.
    pub fn load_many<K: Into<EntityKey>>(
        entity_type: impl Into<String>,
        keys: impl IntoIterator<Item = K>,
    ) -> Self {
        let entity_type = entity_type.into();
        let requests = keys
            .into_iter()
            .map(|key| LoadRequest::new(entity_type.clone(), key))
            .collect();
        Resolution::Deferred(Deferred::new(requests, |values| {
            Ok(Resolution::Value(Value::List(values)))
        }))
    }

    /// Loads the entity `key` and hands it to `then`, which may derive a
    /// value from it or chain further loads.
    pub fn load_then<F>(entity_type: impl Into<String>, key: impl Into<EntityKey>, then: F) -> Self
    where
        F: FnOnce(Value) -> FieldResult<Resolution> + Send + 'static,
    {
        let request = LoadRequest::new(entity_type, key);
        Resolution::Deferred(Deferred::new(vec![request], move |mut values| {
            then(values.pop().unwrap_or(Value::Null))
        }))
    }
}

impl From<Value> for Resolution {
    fn from(value: Value) -> Self {
        Resolution::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_arguments_are_input_errors() {
        let arguments: Arguments = [("sku", Value::Null)].into_iter().collect();
        let err = arguments.key("sku").unwrap_err();
        assert_eq!(err.to_string(), "Argument `sku` is required");

        let arguments: Arguments = [("sku", Value::from(true))].into_iter().collect();
        assert!(arguments.key("sku").is_err());

        let arguments: Arguments = [("sku", Value::from("A"))].into_iter().collect();
        assert_eq!(arguments.key("sku").unwrap(), EntityKey::from("A"));
        assert_eq!(arguments.get_str("sku"), Some("A"));
    }

    #[test]
    fn load_many_keeps_key_order() {
        let Resolution::Deferred(deferred) = Resolution::load_many("Product", ["B", "A"]) else {
            panic!("expected a deferred resolution");
        };
        assert_eq!(
            deferred.requests(),
            &[
                LoadRequest::new("Product", "B"),
                LoadRequest::new("Product", "A")
            ]
        );

        let resolved = (deferred.continuation)(vec![Value::from(2), Value::from(1)]).unwrap();
        assert!(matches!(
            resolved,
            Resolution::Value(Value::List(items)) if items == vec![Value::from(2), Value::from(1)]
        ));
    }
}
