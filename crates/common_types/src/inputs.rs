//! Requests accepted by the engine.

use async_graphql::Variables;

use crate::Scope;

/// An inbound GraphQL request, as handed over by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// The GraphQL document.
    pub query: String,
    /// Which operation of the document to execute. Required only when the
    /// document holds more than one operation.
    pub operation_name: Option<String>,
    /// Raw variable values.
    pub variables: Variables,
    /// The raw identity token, if the caller sent one.
    pub token: Option<String>,
    /// Store and locale to execute against.
    pub scope: Scope,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}
