//! The authorization gate and the identity and policy collaborators it
//! relies on.
//!
//! The gate only orchestrates check-then-branch: whether a field is guarded
//! is declared on the field ([`Requirement`]), and whether a subject meets a
//! requirement is decided by a pluggable [`PolicyProvider`].

use std::collections::HashMap;

use async_graphql::Value;
use async_trait::async_trait;
use fieldgate_common_types::{Identity, Subject};
use thiserror::Error;

use crate::error::{FieldError, FieldResult};
use crate::resolver::Arguments;
use crate::schema::FieldDefinition;

/// What a field demands from the identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any authenticated subject.
    Authenticated,
    /// A subject holding the named capability, e.g. `catalog:write`.
    Capability(String),
    /// A subject whose ID equals the value of `field` in the parent object,
    /// e.g. a customer reading their own orders.
    Owner { field: String },
}

impl Requirement {
    pub fn capability(name: impl Into<String>) -> Self {
        Requirement::Capability(name.into())
    }

    pub fn owner(field: impl Into<String>) -> Self {
        Requirement::Owner {
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Decides whether an authenticated subject meets a requirement.
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn decide(
        &self,
        subject: &Subject,
        requirement: &Requirement,
        parent: &Value,
        arguments: &Arguments,
    ) -> Decision;
}

/// Capability and ownership checks against the subject itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

#[async_trait]
impl PolicyProvider for DefaultPolicy {
    async fn decide(
        &self,
        subject: &Subject,
        requirement: &Requirement,
        parent: &Value,
        _arguments: &Arguments,
    ) -> Decision {
        let allowed = match requirement {
            Requirement::Authenticated => true,
            Requirement::Capability(capability) => subject.has_capability(capability),
            Requirement::Owner { field } => match parent {
                Value::Object(map) => match map.get(field.as_str()) {
                    Some(Value::String(owner)) => *owner == subject.id,
                    Some(Value::Number(owner)) => owner.to_string() == subject.id,
                    _ => false,
                },
                _ => false,
            },
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Runs before a resolver body. An anonymous caller hitting any requirement
/// is unauthenticated; an authenticated one that the policy denies is
/// unauthorized.
pub async fn authorize(
    policy: &dyn PolicyProvider,
    identity: &Identity,
    field: &FieldDefinition,
    parent: &Value,
    arguments: &Arguments,
) -> FieldResult<()> {
    let Some(requirement) = &field.requirement else {
        return Ok(());
    };
    let Some(subject) = identity.subject() else {
        return Err(FieldError::Authentication);
    };

    match policy.decide(subject, requirement, parent, arguments).await {
        Decision::Allow => Ok(()),
        Decision::Deny => Err(FieldError::Authorization(format!(
            "The current user is not authorized to access `{}`",
            field.qualified_name()
        ))),
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("the identity token is unknown or revoked")]
    InvalidToken,
    #[error("the identity provider is unavailable")]
    Unavailable(#[source] anyhow::Error),
}

/// Resolves a raw identity token. Token formats are entirely up to the
/// implementation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Identity, IdentityError>;
}

/// A fixed token table, typically loaded from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Subject>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, subject: Subject) -> Self {
        self.tokens.insert(token.into(), subject);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Identity, IdentityError> {
        self.tokens
            .get(token)
            .cloned()
            .map(Identity::Authenticated)
            .ok_or(IdentityError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use fieldgate_common_types::ErrorCategory;
    use serde_json::json;

    use super::*;
    use crate::schema::TypeRef;

    fn guarded(requirement: Requirement) -> FieldDefinition {
        let mut field =
            FieldDefinition::new("email", TypeRef::named("String").non_null()).requires(requirement);
        field.owner = "Customer".to_owned();
        field
    }

    fn customer(id: &str) -> Value {
        Value::from_json(json!({ "id": id, "email": "a@example.com" })).unwrap()
    }

    #[tokio::test]
    async fn unguarded_fields_are_always_allowed() {
        let field = FieldDefinition::new("name", TypeRef::named("String"));
        let result = authorize(
            &DefaultPolicy,
            &Identity::Anonymous,
            &field,
            &Value::Null,
            &Arguments::default(),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn anonymous_callers_are_unauthenticated() {
        let err = authorize(
            &DefaultPolicy,
            &Identity::Anonymous,
            &guarded(Requirement::capability("admin")),
            &customer("alice"),
            &Arguments::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }

    #[tokio::test]
    async fn missing_capability_is_unauthorized() {
        let identity = Identity::authenticated(Subject::new("bob"));
        let err = authorize(
            &DefaultPolicy,
            &identity,
            &guarded(Requirement::capability("admin")),
            &customer("alice"),
            &Arguments::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authorization);
        assert!(err.to_string().contains("`Customer.email`"));
    }

    #[tokio::test]
    async fn owners_read_their_own_records() {
        let field = guarded(Requirement::owner("id"));
        let alice = Identity::authenticated(Subject::new("alice"));

        assert!(authorize(&DefaultPolicy, &alice, &field, &customer("alice"), &Arguments::default())
            .await
            .is_ok());
        assert!(authorize(&DefaultPolicy, &alice, &field, &customer("bob"), &Arguments::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn static_tokens_resolve_to_subjects() {
        let provider = StaticIdentityProvider::new().with_token("t0k3n", Subject::new("alice"));
        let identity = provider.authenticate("t0k3n").await.unwrap();
        assert_eq!(identity.subject().unwrap().id, "alice");
        assert!(matches!(
            provider.authenticate("nope").await,
            Err(IdentityError::InvalidToken)
        ));
    }
}
