//! The schema registry: type and field definitions, and the binding of every
//! field to the resolver that produces it.
//!
//! A [`Schema`] is assembled once through a [`SchemaBuilder`] and is read-only
//! afterwards. It is cheaply cloneable and shared by all concurrent queries.

mod type_ref;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_graphql::Value;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;
pub use type_ref::{TypeRef, TypeRefParseError};

use crate::auth::Requirement;
use crate::resolver::FieldResolver;

pub const QUERY_TYPE: &str = "Query";
pub const MUTATION_TYPE: &str = "Mutation";
pub const TYPENAME_FIELD: &str = "__typename";

pub(crate) const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field `{type_name}.{field_name}` is already registered")]
    DuplicateField {
        type_name: String,
        field_name: String,
    },
    #[error("type `{0}` is already registered")]
    DuplicateType(String),
    #[error("type `{type_name}` has no field `{field_name}`")]
    UnknownField {
        type_name: String,
        field_name: String,
    },
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("cannot determine the concrete type of a `{0}` value")]
    AmbiguousType(String),
    #[error("type `{0}` cannot declare fields")]
    NotAnObjectOrInterface(String),
    #[error("`{type_name}` does not define `{field_name}` required by interface `{interface}`")]
    MissingInterfaceField {
        type_name: String,
        interface: String,
        field_name: String,
    },
    #[error("`{member}` cannot be used in `{owner}`: {reason}")]
    InvalidMember {
        owner: String,
        member: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Scalar,
    Enum,
}

/// A named type of the schema.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub description: Option<String>,
    /// Interfaces implemented by an object type.
    pub interfaces: Vec<String>,
    /// Member object types of a union.
    pub members: Vec<String>,
    /// Allowed values of an enum.
    pub enum_values: Vec<String>,
    fields: IndexMap<String, Arc<FieldDefinition>>,
}

impl TypeDefinition {
    fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            interfaces: vec![],
            members: vec![],
            enum_values: vec![],
            fields: IndexMap::new(),
        }
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Object)
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    pub fn union<S: Into<String>>(name: impl Into<String>, members: impl IntoIterator<Item = S>) -> Self {
        let mut definition = Self::new(name, TypeKind::Union);
        definition.members = members.into_iter().map(Into::into).collect();
        definition
    }

    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Scalar)
    }

    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut definition = Self::new(name, TypeKind::Enum);
        definition.enum_values = values.into_iter().map(Into::into).collect();
        definition
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }

    pub fn field(&self, name: &str) -> Option<&Arc<FieldDefinition>> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Arc<FieldDefinition>> {
        self.fields.values()
    }
}

/// A declared argument of a field.
#[derive(Debug, Clone)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Value>,
}

impl ArgumentDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// How a field produces its value.
#[derive(Clone)]
pub enum ResolverBinding {
    /// Reads the entry of the same name from the parent object value.
    Property,
    Custom(Arc<dyn FieldResolver>),
}

impl fmt::Debug for ResolverBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverBinding::Property => f.write_str("Property"),
            ResolverBinding::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A field of an object or interface type.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    /// The type that declares the field. Filled in on registration.
    pub owner: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    pub resolver: ResolverBinding,
    /// Checked by the authorization gate before the resolver runs.
    pub requirement: Option<Requirement>,
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            owner: String::new(),
            ty,
            arguments: vec![],
            resolver: ResolverBinding::Property,
            requirement: None,
            description: None,
        }
    }

    pub fn argument(mut self, argument: ArgumentDefinition) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn resolver(mut self, resolver: impl FieldResolver + 'static) -> Self {
        self.resolver = ResolverBinding::Custom(Arc::new(resolver));
        self
    }

    pub fn resolver_arc(mut self, resolver: Arc<dyn FieldResolver>) -> Self {
        self.resolver = ResolverBinding::Custom(resolver);
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn argument_definition(&self, name: &str) -> Option<&ArgumentDefinition> {
        self.arguments.iter().find(|argument| argument.name == name)
    }

    /// `Owner.field`, for messages and logs.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

/// Maps a value of an interface or union type to the name of its concrete
/// object type.
pub type TypeResolverFn = dyn Fn(&Value) -> Option<String> + Send + Sync;

/// Mutable registry used to assemble a [`Schema`].
pub struct SchemaBuilder {
    types: IndexMap<String, TypeDefinition>,
    type_resolvers: HashMap<String, Arc<TypeResolverFn>>,
    mutation_type: Option<String>,
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    /// A registry holding the built-in scalars and an empty `Query` type.
    pub fn new() -> Self {
        let mut types = IndexMap::new();
        for scalar in BUILTIN_SCALARS {
            types.insert(scalar.to_owned(), TypeDefinition::scalar(scalar));
        }
        types.insert(QUERY_TYPE.to_owned(), TypeDefinition::object(QUERY_TYPE));

        Self {
            types,
            type_resolvers: HashMap::new(),
            mutation_type: None,
        }
    }

    pub fn register_type(&mut self, definition: TypeDefinition) -> Result<&mut Self, SchemaError> {
        if self.types.contains_key(&definition.name) {
            return Err(SchemaError::DuplicateType(definition.name));
        }
        self.types.insert(definition.name.clone(), definition);
        Ok(self)
    }

    /// Binds `field` to `type_name`. Registering the same `(type, field)` pair
    /// twice fails with [`SchemaError::DuplicateField`].
    pub fn register(
        &mut self,
        type_name: &str,
        mut field: FieldDefinition,
    ) -> Result<&mut Self, SchemaError> {
        let definition = self
            .types
            .get_mut(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_owned()))?;
        if !matches!(definition.kind, TypeKind::Object | TypeKind::Interface) {
            return Err(SchemaError::NotAnObjectOrInterface(type_name.to_owned()));
        }
        if definition.fields.contains_key(&field.name) {
            return Err(SchemaError::DuplicateField {
                type_name: type_name.to_owned(),
                field_name: field.name,
            });
        }

        field.owner = type_name.to_owned();
        definition
            .fields
            .insert(field.name.clone(), Arc::new(field));
        Ok(self)
    }

    /// Registers the function that picks the concrete type of values of the
    /// interface or union `abstract_type`.
    pub fn register_type_resolver<F>(
        &mut self,
        abstract_type: &str,
        resolver: F,
    ) -> Result<&mut Self, SchemaError>
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        match self.types.get(abstract_type) {
            Some(definition) if definition.is_abstract() => {}
            Some(_) => {
                return Err(SchemaError::InvalidMember {
                    owner: "type resolvers".to_owned(),
                    member: abstract_type.to_owned(),
                    reason: "only interfaces and unions have type resolvers",
                })
            }
            None => return Err(SchemaError::UnknownType(abstract_type.to_owned())),
        }
        self.type_resolvers
            .insert(abstract_type.to_owned(), Arc::new(resolver));
        Ok(self)
    }

    /// Adds the `Mutation` root type.
    pub fn enable_mutations(&mut self) -> &mut Self {
        self.types
            .entry(MUTATION_TYPE.to_owned())
            .or_insert_with(|| TypeDefinition::object(MUTATION_TYPE));
        self.mutation_type = Some(MUTATION_TYPE.to_owned());
        self
    }

    /// Checks that every referenced type exists and is used consistently,
    /// then freezes the registry.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let types = &self.types;
        let kind_of = |name: &str| {
            types
                .get(name)
                .map(|definition| definition.kind)
                .ok_or_else(|| SchemaError::UnknownType(name.to_owned()))
        };

        let mut possible_types: HashMap<String, HashSet<String>> = HashMap::new();
        for definition in types.values() {
            for interface in &definition.interfaces {
                if kind_of(interface)? != TypeKind::Interface {
                    return Err(SchemaError::InvalidMember {
                        owner: definition.name.clone(),
                        member: interface.clone(),
                        reason: "only interfaces can be implemented",
                    });
                }
                let interface_definition = &types[interface.as_str()];
                for field in interface_definition.fields.keys() {
                    if !definition.fields.contains_key(field) {
                        return Err(SchemaError::MissingInterfaceField {
                            type_name: definition.name.clone(),
                            interface: interface.clone(),
                            field_name: field.clone(),
                        });
                    }
                }
                possible_types
                    .entry(interface.clone())
                    .or_default()
                    .insert(definition.name.clone());
            }
            for member in &definition.members {
                if kind_of(member)? != TypeKind::Object {
                    return Err(SchemaError::InvalidMember {
                        owner: definition.name.clone(),
                        member: member.clone(),
                        reason: "union members must be object types",
                    });
                }
                possible_types
                    .entry(definition.name.clone())
                    .or_default()
                    .insert(member.clone());
            }
            for field in definition.fields.values() {
                kind_of(field.ty.named_type())?;
                for argument in &field.arguments {
                    if !matches!(
                        kind_of(argument.ty.named_type())?,
                        TypeKind::Scalar | TypeKind::Enum
                    ) {
                        return Err(SchemaError::InvalidMember {
                            owner: field.qualified_name(),
                            member: argument.name.clone(),
                            reason: "arguments must be scalars or enums",
                        });
                    }
                }
            }
        }

        debug!(
            types = types.len(),
            type_resolvers = self.type_resolvers.len(),
            "Schema built"
        );

        Ok(Schema(Arc::new(SchemaInner {
            types: self.types,
            type_resolvers: self.type_resolvers,
            possible_types,
            mutation_type: self.mutation_type,
        })))
    }
}

struct SchemaInner {
    types: IndexMap<String, TypeDefinition>,
    type_resolvers: HashMap<String, Arc<TypeResolverFn>>,
    /// Abstract type name to the object types it may resolve to.
    possible_types: HashMap<String, HashSet<String>>,
    mutation_type: Option<String>,
}

/// An immutable, cheaply cloneable schema.
#[derive(Clone)]
pub struct Schema(Arc<SchemaInner>);

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("types", &self.0.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn query_type(&self) -> &str {
        QUERY_TYPE
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.0.mutation_type.as_deref()
    }

    pub fn type_definition(&self, name: &str) -> Result<&TypeDefinition, SchemaError> {
        self.0
            .types
            .get(name)
            .ok_or_else(|| SchemaError::UnknownType(name.to_owned()))
    }

    /// Fails with [`SchemaError::UnknownField`] when `type_name` exists but
    /// has no such field.
    pub fn lookup(&self, type_name: &str, field_name: &str) -> Result<&Arc<FieldDefinition>, SchemaError> {
        self.type_definition(type_name)?
            .field(field_name)
            .ok_or_else(|| SchemaError::UnknownField {
                type_name: type_name.to_owned(),
                field_name: field_name.to_owned(),
            })
    }

    pub fn is_possible_type(&self, abstract_type: &str, object_type: &str) -> bool {
        self.0
            .possible_types
            .get(abstract_type)
            .is_some_and(|types| types.contains(object_type))
    }

    /// Whether selections under the type condition `condition` apply to
    /// values of the object type `object_type`.
    pub fn applies_to(&self, condition: &str, object_type: &str) -> bool {
        condition == object_type || self.is_possible_type(condition, object_type)
    }

    /// Whether a fragment on `condition` may ever match inside a selection on
    /// `parent_type`.
    pub fn types_overlap(&self, condition: &str, parent_type: &str) -> bool {
        if condition == parent_type
            || self.is_possible_type(parent_type, condition)
            || self.is_possible_type(condition, parent_type)
        {
            return true;
        }
        match (
            self.0.possible_types.get(condition),
            self.0.possible_types.get(parent_type),
        ) {
            (Some(a), Some(b)) => !a.is_disjoint(b),
            _ => false,
        }
    }

    /// Picks the concrete object type of `value`, a value of the interface or
    /// union `abstract_type`.
    ///
    /// The registered type resolver is consulted first; without one, a
    /// `__typename` entry in the value is used. Fails with
    /// [`SchemaError::AmbiguousType`] if neither yields a possible type.
    pub fn resolve_concrete_type(&self, abstract_type: &str, value: &Value) -> Result<&str, SchemaError> {
        let candidate = match self.0.type_resolvers.get(abstract_type) {
            Some(resolver) => resolver(value),
            None => match value {
                Value::Object(map) => match map.get(TYPENAME_FIELD) {
                    Some(Value::String(name)) => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            },
        };

        candidate
            .filter(|name| self.is_possible_type(abstract_type, name))
            .and_then(|name| self.0.types.get_key_value(name.as_str()))
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| SchemaError::AmbiguousType(abstract_type.to_owned()))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.0.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string() -> TypeRef {
        TypeRef::named("String")
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let mut builder = Schema::builder();
        builder
            .register(QUERY_TYPE, FieldDefinition::new("hello", string()))
            .unwrap();

        let err = builder
            .register(QUERY_TYPE, FieldDefinition::new("hello", string()))
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::DuplicateField { ref type_name, ref field_name }
                if type_name == "Query" && field_name == "hello"
        ));
    }

    #[test]
    fn unknown_field_lookup_fails() {
        let mut builder = Schema::builder();
        builder
            .register(QUERY_TYPE, FieldDefinition::new("hello", string()))
            .unwrap();
        let schema = builder.build().unwrap();

        assert_eq!(schema.lookup("Query", "hello").unwrap().owner, "Query");
        assert!(matches!(
            schema.lookup("Query", "goodbye"),
            Err(SchemaError::UnknownField { .. })
        ));
        assert!(matches!(
            schema.lookup("Nope", "hello"),
            Err(SchemaError::UnknownType(_))
        ));
    }

    #[test]
    fn fields_on_scalars_are_rejected() {
        let mut builder = Schema::builder();
        let err = builder
            .register("String", FieldDefinition::new("length", TypeRef::named("Int")))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotAnObjectOrInterface(_)));
    }

    #[test]
    fn build_rejects_unknown_return_types() {
        let mut builder = Schema::builder();
        builder
            .register(QUERY_TYPE, FieldDefinition::new("cart", TypeRef::named("Cart")))
            .unwrap();
        assert!(matches!(builder.build(), Err(SchemaError::UnknownType(t)) if t == "Cart"));
    }

    #[test]
    fn build_requires_interface_fields() {
        let mut builder = Schema::builder();
        builder.register_type(TypeDefinition::interface("Node")).unwrap();
        builder
            .register("Node", FieldDefinition::new("id", TypeRef::named("ID").non_null()))
            .unwrap();
        builder
            .register_type(TypeDefinition::object("Product").implements("Node"))
            .unwrap();
        assert!(matches!(
            builder.build(),
            Err(SchemaError::MissingInterfaceField { .. })
        ));
    }

    fn polymorphic_schema() -> Schema {
        let mut builder = Schema::builder();
        builder
            .register_type(TypeDefinition::object("Product"))
            .unwrap()
            .register_type(TypeDefinition::object("Category"))
            .unwrap()
            .register_type(TypeDefinition::object("Customer"))
            .unwrap()
            .register_type(TypeDefinition::union("SearchResult", ["Product", "Category"]))
            .unwrap();
        builder
            .register_type_resolver("SearchResult", |value| match value {
                Value::Object(map) if map.contains_key("sku") => Some("Product".to_owned()),
                Value::Object(map) if map.contains_key("products") => Some("Customer".to_owned()),
                _ => None,
            })
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn concrete_type_comes_from_the_type_resolver() {
        let schema = polymorphic_schema();
        let product = Value::from_json(serde_json::json!({ "sku": "A" })).unwrap();
        assert_eq!(
            schema.resolve_concrete_type("SearchResult", &product).unwrap(),
            "Product"
        );
    }

    #[test]
    fn ambiguous_or_impossible_types_fail() {
        let schema = polymorphic_schema();
        let unknown = Value::from_json(serde_json::json!({ "name": "?" })).unwrap();
        assert!(matches!(
            schema.resolve_concrete_type("SearchResult", &unknown),
            Err(SchemaError::AmbiguousType(_))
        ));

        // Customer exists, but is not a member of the union.
        let customer = Value::from_json(serde_json::json!({ "products": [] })).unwrap();
        assert!(matches!(
            schema.resolve_concrete_type("SearchResult", &customer),
            Err(SchemaError::AmbiguousType(_))
        ));
    }

    #[test]
    fn typename_entry_is_the_fallback_type_resolver() {
        let mut builder = Schema::builder();
        builder
            .register_type(TypeDefinition::object("Product"))
            .unwrap()
            .register_type(TypeDefinition::union("Result", ["Product"]))
            .unwrap();
        let schema = builder.build().unwrap();

        let value = Value::from_json(serde_json::json!({ "__typename": "Product" })).unwrap();
        assert_eq!(schema.resolve_concrete_type("Result", &value).unwrap(), "Product");
        assert!(schema.applies_to("Result", "Product"));
        assert!(schema.types_overlap("Product", "Result"));
    }
}
