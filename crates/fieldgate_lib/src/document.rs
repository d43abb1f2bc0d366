//! Turns a GraphQL document into a bound [`Operation`] and checks it against
//! the schema.
//!
//! Parsing is done by `async_graphql::parser`. Everything here runs before
//! any resolver does; a [`BindError`] therefore aborts the whole query.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};

use async_graphql::parser::types::{
    Directive, DocumentOperations, FragmentDefinition, OperationDefinition, OperationType,
    Selection, SelectionSet,
};
use async_graphql::parser::{parse_query, Positioned};
use async_graphql::{Name, Value, Variables};
use indexmap::IndexMap;
use thiserror::Error;

use crate::schema::{Schema, SchemaError, TypeKind, TYPENAME_FIELD};
use crate::selection::{Operation, OperationKind, SelectionNode};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Unknown operation named `{0}`")]
    UnknownOperation(String),
    #[error("Operation name is required when the document holds several operations")]
    OperationNameRequired,
    #[error("{0} operations are not supported")]
    UnsupportedOperation(String),
    #[error("Variable `${0}` is not defined")]
    UndefinedVariable(String),
    #[error("Variable `${0}` of a non-null type was not provided")]
    MissingVariable(String),
    #[error("Unknown fragment `{0}`")]
    UnknownFragment(String),
    #[error("Fragment `{0}` spreads itself")]
    FragmentCycle(String),
    #[error("Fields under the response key `{0}` conflict")]
    FieldConflict(String),
    #[error("Invalid directive: {0}")]
    InvalidDirective(String),
    #[error("Schema has no mutation type")]
    NoMutationType,
    #[error("Unknown type `{0}`")]
    UnknownType(String),
    #[error("Cannot query field `{field_name}` on type `{type_name}`")]
    UnknownField {
        type_name: String,
        field_name: String,
    },
    #[error("Unknown argument `{argument}` on field `{field}`")]
    UnknownArgument { field: String, argument: String },
    #[error("Field `{0}` of a composite type must have a selection of subfields")]
    MissingSelection(String),
    #[error("Field `{0}` of a leaf type must not have a selection of subfields")]
    UnexpectedSelection(String),
    #[error("Fragment on `{condition}` can never apply within `{parent}`")]
    ImpossibleFragment { condition: String, parent: String },
    #[error("Selection depth {depth} exceeds the maximum of {max}")]
    TooDeep { depth: usize, max: usize },
    #[error("Selection exceeds the maximum of {0} fields")]
    TooManyFields(usize),
}

/// Upper bound on the fields a document may expand to once fragments are
/// flattened.
pub const MAX_BOUND_FIELDS: usize = 10_000;

/// Parses `query`, picks the operation to run and binds it against
/// `variables`.
pub fn bind(
    query: &str,
    operation_name: Option<&str>,
    variables: &Variables,
) -> Result<Operation, BindError> {
    let document = parse_query(query).map_err(|err| BindError::Syntax(err.to_string()))?;

    let operation = match (document.operations, operation_name) {
        (DocumentOperations::Single(operation), None) => operation.node,
        (DocumentOperations::Single(_), Some(name)) => {
            return Err(BindError::UnknownOperation(name.to_owned()))
        }
        (DocumentOperations::Multiple(mut operations), Some(name)) => operations
            .remove(name)
            .map(|operation| operation.node)
            .ok_or_else(|| BindError::UnknownOperation(name.to_owned()))?,
        (DocumentOperations::Multiple(operations), None) if operations.len() == 1 => operations
            .into_values()
            .next()
            .map(|operation| operation.node)
            .ok_or(BindError::OperationNameRequired)?,
        (DocumentOperations::Multiple(_), None) => return Err(BindError::OperationNameRequired),
    };

    let kind = match operation.ty {
        OperationType::Query => OperationKind::Query,
        OperationType::Mutation => OperationKind::Mutation,
        OperationType::Subscription => {
            return Err(BindError::UnsupportedOperation("Subscription".to_owned()))
        }
    };

    let binder = Binder {
        fragments: &document.fragments,
        variables: declared_variables(&operation, variables)?,
        budget: Cell::new(MAX_BOUND_FIELDS),
    };
    let mut selection = vec![];
    binder.bind_selection_set(
        &operation.selection_set.node,
        None,
        &mut vec![],
        &mut HashSet::new(),
        &mut selection,
    )?;

    Ok(Operation { kind, selection })
}

/// Values of the variables the operation declares: the provided value, else
/// the declared default, else null.
fn declared_variables(
    operation: &OperationDefinition,
    provided: &Variables,
) -> Result<BTreeMap<String, Value>, BindError> {
    let mut values = BTreeMap::new();
    for definition in &operation.variable_definitions {
        let definition = &definition.node;
        let name = definition.name.node.as_str();
        let value = match (provided.get(name), &definition.default_value) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => default.node.clone(),
            (None, None) if !definition.var_type.node.nullable => {
                return Err(BindError::MissingVariable(name.to_owned()))
            }
            (None, None) => Value::Null,
        };
        values.insert(name.to_owned(), value);
    }
    Ok(values)
}

struct Binder<'a> {
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
    variables: BTreeMap<String, Value>,
    /// Fields that may still be bound.
    budget: Cell<usize>,
}

impl Binder<'_> {
    /// Binds `set` into `out`. `visiting` is the chain of fragments being
    /// expanded; `expanded` holds the fragments already spread into `out`,
    /// each of which is expanded only once.
    fn bind_selection_set(
        &self,
        set: &SelectionSet,
        condition: Option<&str>,
        visiting: &mut Vec<Name>,
        expanded: &mut HashSet<Name>,
        out: &mut Vec<SelectionNode>,
    ) -> Result<(), BindError> {
        for item in &set.items {
            match &item.node {
                Selection::Field(field) => {
                    let field = &field.node;
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    self.spend()?;

                    let arguments = field
                        .arguments
                        .iter()
                        .map(|(name, value)| {
                            let value = value
                                .node
                                .clone()
                                .into_const_with(|variable| self.variable(variable))?;
                            Ok((name.node.to_string(), value))
                        })
                        .collect::<Result<IndexMap<_, _>, BindError>>()?;

                    let mut children = vec![];
                    self.bind_selection_set(
                        &field.selection_set.node,
                        None,
                        visiting,
                        &mut HashSet::new(),
                        &mut children,
                    )?;

                    merge_into(
                        out,
                        SelectionNode {
                            name: field.name.node.to_string(),
                            alias: field.alias.as_ref().map(|alias| alias.node.to_string()),
                            arguments,
                            type_condition: condition.map(ToOwned::to_owned),
                            children,
                        },
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let spread = &spread.node;
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let name = &spread.fragment_name.node;
                    if visiting.contains(name) {
                        return Err(BindError::FragmentCycle(name.to_string()));
                    }
                    if !expanded.insert(name.clone()) {
                        continue;
                    }
                    let fragment = &self
                        .fragments
                        .get(name)
                        .ok_or_else(|| BindError::UnknownFragment(name.to_string()))?
                        .node;

                    visiting.push(name.clone());
                    self.bind_selection_set(
                        &fragment.selection_set.node,
                        Some(fragment.type_condition.node.on.node.as_str()),
                        visiting,
                        expanded,
                        out,
                    )?;
                    visiting.pop();
                }
                Selection::InlineFragment(inline) => {
                    let inline = &inline.node;
                    if !self.included(&inline.directives)? {
                        continue;
                    }
                    // Nested conditions collapse to the innermost one.
                    let condition = inline
                        .type_condition
                        .as_ref()
                        .map(|condition| condition.node.on.node.as_str())
                        .or(condition);
                    self.bind_selection_set(
                        &inline.selection_set.node,
                        condition,
                        visiting,
                        expanded,
                        out,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn spend(&self) -> Result<(), BindError> {
        let left = self
            .budget
            .get()
            .checked_sub(1)
            .ok_or(BindError::TooManyFields(MAX_BOUND_FIELDS))?;
        self.budget.set(left);
        Ok(())
    }

    fn variable(&self, name: Name) -> Result<Value, BindError> {
        self.variables
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| BindError::UndefinedVariable(name.to_string()))
    }

    /// Applies `@skip(if:)` and `@include(if:)`.
    fn included(&self, directives: &[Positioned<Directive>]) -> Result<bool, BindError> {
        for directive in directives {
            let directive = &directive.node;
            let name = directive.name.node.as_str();
            let include_when = match name {
                "skip" => false,
                "include" => true,
                other => return Err(BindError::InvalidDirective(format!("unknown directive `@{other}`"))),
            };

            let condition = directive
                .arguments
                .iter()
                .find(|(argument, _)| argument.node.as_str() == "if")
                .map(|(_, value)| value.node.clone().into_const_with(|variable| self.variable(variable)))
                .transpose()?;
            match condition {
                Some(Value::Boolean(condition)) if condition != include_when => return Ok(false),
                Some(Value::Boolean(_)) => {}
                _ => {
                    return Err(BindError::InvalidDirective(format!(
                        "`@{name}` requires a Boolean `if` argument"
                    )))
                }
            }
        }
        Ok(true)
    }
}

/// Adds `node` to `nodes`, merging it into an earlier node with the same
/// response key and type condition.
fn merge_into(nodes: &mut Vec<SelectionNode>, node: SelectionNode) -> Result<(), BindError> {
    let existing = nodes.iter_mut().find(|existing| {
        existing.response_key() == node.response_key() && existing.type_condition == node.type_condition
    });

    match existing {
        None => nodes.push(node),
        Some(existing) => {
            if existing.name != node.name || existing.arguments != node.arguments {
                return Err(BindError::FieldConflict(node.response_key().to_owned()));
            }
            for child in node.children {
                merge_into(&mut existing.children, child)?;
            }
        }
    }
    Ok(())
}

/// Checks that every node of `operation` maps onto `schema`.
pub fn validate(schema: &Schema, operation: &Operation, max_depth: usize) -> Result<(), BindError> {
    let depth = operation.depth();
    if depth > max_depth {
        return Err(BindError::TooDeep {
            depth,
            max: max_depth,
        });
    }

    let root = match operation.kind {
        OperationKind::Query => schema.query_type(),
        OperationKind::Mutation => schema.mutation_type().ok_or(BindError::NoMutationType)?,
    };
    validate_nodes(schema, root, &operation.selection)?;
    check_conflicts(schema, operation.selection.iter().collect())
}

/// Rejects selections that would resolve different fields, or one field with
/// different arguments, under the same response key of an object.
///
/// Nodes under one key conflict only if their type conditions can match the
/// same object. The children of nodes that can are merged at execution, so
/// they are checked together.
fn check_conflicts(schema: &Schema, nodes: Vec<&SelectionNode>) -> Result<(), BindError> {
    let mut by_key: IndexMap<&str, Vec<&SelectionNode>> = IndexMap::new();
    for node in nodes {
        by_key.entry(node.response_key()).or_default().push(node);
    }

    for (key, group) in by_key {
        let mut merged: Vec<Vec<&SelectionNode>> = vec![];
        for node in group {
            let mut component = vec![node];
            let mut index = 0;
            while index < merged.len() {
                if merged[index].iter().any(|other| conditions_overlap(schema, node, other)) {
                    component.append(&mut merged.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            merged.push(component);
        }

        for component in merged {
            let first = component[0];
            if component
                .iter()
                .any(|node| node.name != first.name || node.arguments != first.arguments)
            {
                return Err(BindError::FieldConflict(key.to_owned()));
            }
            check_conflicts(
                schema,
                component.iter().flat_map(|node| node.children.iter()).collect(),
            )?;
        }
    }
    Ok(())
}

fn conditions_overlap(schema: &Schema, a: &SelectionNode, b: &SelectionNode) -> bool {
    match (&a.type_condition, &b.type_condition) {
        (Some(a), Some(b)) => schema.types_overlap(a, b),
        _ => true,
    }
}

fn validate_nodes(schema: &Schema, parent_type: &str, nodes: &[SelectionNode]) -> Result<(), BindError> {
    for node in nodes {
        let scope_type = match &node.type_condition {
            None => parent_type,
            Some(condition) => {
                let definition = schema
                    .type_definition(condition)
                    .map_err(|_| BindError::UnknownType(condition.clone()))?;
                if !definition.is_composite() || !schema.types_overlap(condition, parent_type) {
                    return Err(BindError::ImpossibleFragment {
                        condition: condition.clone(),
                        parent: parent_type.to_owned(),
                    });
                }
                condition.as_str()
            }
        };

        if node.name == TYPENAME_FIELD {
            if let Some(argument) = node.arguments.keys().next() {
                return Err(BindError::UnknownArgument {
                    field: TYPENAME_FIELD.to_owned(),
                    argument: argument.clone(),
                });
            }
            if !node.children.is_empty() {
                return Err(BindError::UnexpectedSelection(TYPENAME_FIELD.to_owned()));
            }
            continue;
        }

        let field = schema.lookup(scope_type, &node.name).map_err(|err| match err {
            SchemaError::UnknownType(name) => BindError::UnknownType(name),
            _ => BindError::UnknownField {
                type_name: scope_type.to_owned(),
                field_name: node.name.clone(),
            },
        })?;

        if let Some(argument) = node
            .arguments
            .keys()
            .find(|argument| field.argument_definition(argument).is_none())
        {
            return Err(BindError::UnknownArgument {
                field: field.qualified_name(),
                argument: argument.clone(),
            });
        }

        let return_type = field.ty.named_type();
        let composite = schema
            .type_definition(return_type)
            .map(|definition| definition.kind != TypeKind::Scalar && definition.kind != TypeKind::Enum)
            .map_err(|_| BindError::UnknownType(return_type.to_owned()))?;
        match (composite, node.children.is_empty()) {
            (true, true) => return Err(BindError::MissingSelection(field.qualified_name())),
            (false, false) => return Err(BindError::UnexpectedSelection(field.qualified_name())),
            (true, false) => validate_nodes(schema, return_type, &node.children)?,
            (false, true) => {}
        }
    }
    Ok(())
}
