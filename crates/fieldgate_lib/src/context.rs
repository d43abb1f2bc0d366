//! Per-query execution state.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_graphql::Value;
use fieldgate_common_types::{Identity, Scope};
use thiserror::Error;
use tracing::warn;

use crate::auth::IdentityProvider;
use crate::loader::LoadRequest;

/// Why a load request produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoadFailure {
    #[error("no record for key")]
    NotFound,
    #[error("data source unavailable")]
    SourceUnavailable,
}

pub type LoadOutcome = Result<Value, LoadFailure>;

/// State of one `(entity type, key)` pair within a query.
#[derive(Debug, Clone)]
enum LoadSlot {
    /// Queued, waiting for the end of the tier.
    Pending,
    Ready(LoadOutcome),
}

/// Everything that is scoped to a single query: who is asking, for which
/// store and locale, and which entities have been requested so far.
///
/// A context is created when a query starts and dropped when it completes;
/// it is never shared between queries.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    identity: Identity,
    scope: Scope,
    loads: Mutex<HashMap<LoadRequest, LoadSlot>>,
}

impl ExecutionContext {
    pub fn new(identity: Identity, scope: Scope) -> Self {
        Self {
            identity,
            scope,
            loads: Mutex::default(),
        }
    }

    /// Resolves `token` through the identity collaborator. Missing or invalid
    /// tokens yield an anonymous context, so that only fields which require
    /// an identity fail.
    pub async fn establish(
        identities: &dyn IdentityProvider,
        token: Option<&str>,
        scope: Scope,
    ) -> Self {
        let identity = match token {
            None => Identity::Anonymous,
            Some(token) => match identities.authenticate(token).await {
                Ok(identity) => identity,
                Err(err) => {
                    warn!(error = %err, "Rejected identity token, continuing anonymously");
                    Identity::Anonymous
                }
            },
        };

        Self::new(identity, scope)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Number of distinct entities requested so far.
    pub fn requested_entities(&self) -> usize {
        self.lock().len()
    }

    /// Marks `request` as pending. Returns `false` if it is already pending
    /// or resolved, in which case nothing must be fetched.
    pub(crate) fn reserve(&self, request: &LoadRequest) -> bool {
        let mut loads = self.lock();
        if loads.contains_key(request) {
            false
        } else {
            loads.insert(request.clone(), LoadSlot::Pending);
            true
        }
    }

    pub(crate) fn complete(&self, request: LoadRequest, outcome: LoadOutcome) {
        self.lock().insert(request, LoadSlot::Ready(outcome));
    }

    /// The outcome of `request`, unless it is still pending or was never
    /// reserved.
    pub(crate) fn outcome(&self, request: &LoadRequest) -> Option<LoadOutcome> {
        match self.lock().get(request) {
            Some(LoadSlot::Ready(outcome)) => Some(outcome.clone()),
            Some(LoadSlot::Pending) | None => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LoadRequest, LoadSlot>> {
        self.loads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
