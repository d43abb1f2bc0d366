//! The bound selection tree of one operation.

use async_graphql::Value;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

/// An operation ready for execution: variables are substituted, fragments
/// are flattened into type-conditioned nodes, and `@skip` / `@include` have
/// been applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub selection: Vec<SelectionNode>,
}

impl Operation {
    pub fn query(selection: Vec<SelectionNode>) -> Self {
        Self {
            kind: OperationKind::Query,
            selection,
        }
    }

    pub fn mutation(selection: Vec<SelectionNode>) -> Self {
        Self {
            kind: OperationKind::Mutation,
            selection,
        }
    }

    /// Nesting depth of the deepest field.
    pub fn depth(&self) -> usize {
        self.selection
            .iter()
            .map(SelectionNode::depth)
            .max()
            .unwrap_or(0)
    }
}

/// A requested field.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionNode {
    pub name: String,
    pub alias: Option<String>,
    /// Argument values as written, variables already substituted.
    pub arguments: IndexMap<String, Value>,
    /// Only select this field when the parent value is of (or implements)
    /// this type.
    pub type_condition: Option<String>,
    pub children: Vec<SelectionNode>,
}

impl SelectionNode {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            type_condition: None,
            children: vec![],
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn on(mut self, type_condition: impl Into<String>) -> Self {
        self.type_condition = Some(type_condition.into());
        self
    }

    pub fn select(mut self, children: impl IntoIterator<Item = SelectionNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// The key of this field in the response: its alias, or its name.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(SelectionNode::depth)
            .max()
            .unwrap_or(0)
    }
}
