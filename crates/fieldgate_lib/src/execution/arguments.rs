use async_graphql::{Name, Value};
use indexmap::IndexMap;

use crate::error::{FieldError, FieldResult};
use crate::resolver::Arguments;
use crate::schema::{FieldDefinition, Schema, TypeKind, TypeRef, BUILTIN_SCALARS};

/// Checks the arguments written in the document against the declared ones:
/// applies defaults, enforces required arguments and coerces values to the
/// declared types.
pub(crate) fn coerce_arguments(
    schema: &Schema,
    field: &FieldDefinition,
    provided: &IndexMap<String, Value>,
) -> FieldResult<Arguments> {
    let mut arguments = Arguments::new();

    for definition in &field.arguments {
        let value = provided
            .get(&definition.name)
            .cloned()
            .or_else(|| definition.default.clone());

        match value {
            None | Some(Value::Null) if definition.ty.is_non_null() => {
                return Err(FieldError::input(format!(
                    "Argument `{}` of `{}` is required",
                    definition.name,
                    field.qualified_name()
                )));
            }
            None => {}
            Some(value) => {
                let value = coerce_value(schema, &definition.ty, value).map_err(|reason| {
                    FieldError::input(format!(
                        "Argument `{}` of `{}` {reason}",
                        definition.name,
                        field.qualified_name()
                    ))
                })?;
                arguments.insert(definition.name.clone(), value);
            }
        }
    }

    Ok(arguments)
}

fn coerce_value(schema: &Schema, ty: &TypeRef, value: Value) -> Result<Value, String> {
    match ty {
        TypeRef::NonNull(_) if value == Value::Null => Err("must not be null".to_owned()),
        TypeRef::NonNull(inner) => coerce_value(schema, inner, value),
        _ if value == Value::Null => Ok(Value::Null),
        TypeRef::List(item) => match value {
            Value::List(items) => items
                .into_iter()
                .map(|value| coerce_value(schema, item, value))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            // A single value where a list is expected is a list of one.
            single => coerce_value(schema, item, single).map(|value| Value::List(vec![value])),
        },
        TypeRef::Named(name) => coerce_named(schema, name, value),
    }
}

fn coerce_named(schema: &Schema, name: &str, value: Value) -> Result<Value, String> {
    match (name, value) {
        ("Int", Value::Number(n)) if n.as_i64().is_some_and(|i| i32::try_from(i).is_ok()) => {
            Ok(Value::Number(n))
        }
        ("Float", Value::Number(n)) => Ok(Value::Number(n)),
        ("String", value @ Value::String(_)) => Ok(value),
        ("Boolean", value @ Value::Boolean(_)) => Ok(value),
        ("ID", value @ Value::String(_)) => Ok(value),
        ("ID", Value::Number(n)) if n.is_i64() => Ok(Value::String(n.to_string())),
        (name, _) if BUILTIN_SCALARS.contains(&name) => Err(format!("expects type `{name}`")),
        (name, value) => {
            let definition = schema
                .type_definition(name)
                .map_err(|_| format!("has unknown type `{name}`"))?;
            match definition.kind {
                // Custom scalars are passed through as written.
                TypeKind::Scalar => Ok(value),
                TypeKind::Enum => {
                    let candidate = match &value {
                        Value::Enum(variant) => Some(variant.as_str()),
                        Value::String(variant) => Some(variant.as_str()),
                        _ => None,
                    };
                    match candidate {
                        Some(variant) if definition.enum_values.iter().any(|v| v == variant) => {
                            Ok(Value::Enum(Name::new(variant)))
                        }
                        _ => Err(format!("is not a value of enum `{name}`")),
                    }
                }
                _ => Err(format!("expects type `{name}`")),
            }
        }
    }
}
