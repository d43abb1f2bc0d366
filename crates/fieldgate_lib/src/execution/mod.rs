//! The resolver engine.
//!
//! A query is executed tier by tier: all fields at the same depth, across
//! all parents, are started concurrently. Resolvers that need entities
//! return [`Deferred`] resolutions; once every field of the tier has been
//! started, the [`BatchLoader`] fetches the collected keys with one call per
//! entity type and the deferred resolutions are resumed. Chained loads are
//! flushed again until the tier settles, and only then does the next tier
//! start.
//!
//! Field failures never abort the query. They are written into the
//! response tree, which takes care of null bubbling during assembly.

mod arguments;

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use async_graphql::Value;
use fieldgate_common_types::{ErrorCategory, QueryRequest};
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, debug_span, error, warn, Instrument};

use self::arguments::coerce_arguments;
use crate::auth::{authorize, DefaultPolicy, IdentityProvider, PolicyProvider, StaticIdentityProvider};
use crate::context::{ExecutionContext, LoadFailure};
use crate::document::{self, BindError};
use crate::error::{FieldError, FieldResult};
use crate::loader::{BatchLoader, DataSources};
use crate::metrics;
use crate::resolver::{Deferred, Resolution, ResolverContext};
use crate::response::{GraphqlError, Response, ResponseTree, SlotId, ROOT};
use crate::schema::{FieldDefinition, ResolverBinding, Schema, TypeRef, TYPENAME_FIELD};
use crate::selection::{Operation, OperationKind, SelectionNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Hard deadline for a whole query. `None` disables it.
    pub timeout: Option<Duration>,
    /// Maximum nesting depth of a selection.
    pub max_depth: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            max_depth: 15,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionAborted {
    #[error("query execution was cancelled")]
    Cancelled,
}

/// Executes queries against a schema. One executor is shared by all
/// concurrent queries; everything query-specific lives in the
/// [`ExecutionContext`] created per query.
#[derive(Clone)]
pub struct Executor {
    schema: Schema,
    sources: Arc<DataSources>,
    identities: Arc<dyn IdentityProvider>,
    policy: Arc<dyn PolicyProvider>,
    options: ExecutionOptions,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("schema", &self.schema)
            .field("sources", &self.sources)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(schema: Schema, sources: DataSources) -> Self {
        Self {
            schema,
            sources: Arc::new(sources),
            identities: Arc::new(StaticIdentityProvider::new()),
            policy: Arc::new(DefaultPolicy),
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_identity_provider(mut self, identities: Arc<dyn IdentityProvider>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyProvider>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Binds, authorizes and executes `request`.
    pub async fn execute(&self, request: QueryRequest) -> Response {
        self.with_deadline(async move {
            let operation = match document::bind(
                &request.query,
                request.operation_name.as_deref(),
                &request.variables,
            ) {
                Ok(operation) => operation,
                Err(err) => return rejected(err),
            };
            let context = ExecutionContext::establish(
                self.identities.as_ref(),
                request.token.as_deref(),
                request.scope,
            )
            .await;

            self.run(&operation, &context).await
        })
        .await
    }

    /// Executes an already bound operation within `context`. The context
    /// is consumed: its load cache ends with the query.
    pub async fn execute_operation(
        &self,
        operation: &Operation,
        context: ExecutionContext,
    ) -> Response {
        self.with_deadline(async move { self.run(operation, &context).await })
            .await
    }

    /// Like [`Executor::execute`], but gives up as soon as `signal`
    /// completes. In-flight fetches are dropped and nothing of the partial
    /// result is returned.
    pub async fn execute_until<S>(
        &self,
        request: QueryRequest,
        signal: S,
    ) -> Result<Response, ExecutionAborted>
    where
        S: Future<Output = ()>,
    {
        tokio::select! {
            response = self.execute(request) => Ok(response),
            () = signal => {
                debug!("Query cancelled");
                metrics().queries.with_label_values(&["cancelled"]).inc();
                Err(ExecutionAborted::Cancelled)
            }
        }
    }

    async fn with_deadline(&self, execution: impl Future<Output = Response>) -> Response {
        let response = match self.options.timeout {
            None => execution.await,
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(timeout_in_msecs = timeout.as_millis() as u64, "Query timed out");
                    metrics().queries.with_label_values(&["timeout"]).inc();
                    return Response::aborted("Query timed out", ErrorCategory::Internal);
                }
            },
        };

        let outcome = match (response.is_aborted(), response.is_ok()) {
            (true, _) => "rejected",
            (false, true) => "ok",
            (false, false) => "partial",
        };
        metrics().queries.with_label_values(&[outcome]).inc();
        response
    }

    async fn run(&self, operation: &Operation, context: &ExecutionContext) -> Response {
        if let Err(err) = document::validate(&self.schema, operation, self.options.max_depth) {
            return rejected(err);
        }

        let root_type = match operation.kind {
            OperationKind::Query => self.schema.query_type(),
            OperationKind::Mutation => match self.schema.mutation_type() {
                Some(mutation_type) => mutation_type,
                None => return rejected(BindError::NoMutationType),
            },
        };

        let mut walker = Walker {
            schema: &self.schema,
            policy: self.policy.as_ref(),
            context,
            loader: BatchLoader::new(&self.sources, context),
            tree: ResponseTree::new(),
        };
        let root_value = Arc::new(Value::Object(IndexMap::new()));
        let mut root_fields = vec![];
        walker.select_fields(
            ROOT,
            root_type,
            root_value,
            operation.selection.iter(),
            &mut root_fields,
        );

        match operation.kind {
            OperationKind::Query => walker.run_tiers(root_fields).await,
            // Top-level mutation fields run one after another, each fully
            // settled before the next starts.
            OperationKind::Mutation => {
                for field in root_fields {
                    walker.run_tiers(vec![field]).await;
                }
            }
        }

        debug!(
            entities = context.requested_entities(),
            "Query executed"
        );
        walker.tree.assemble()
    }
}

fn rejected(err: BindError) -> Response {
    debug!(error = %err, "Rejected query document");
    Response::aborted(err.to_string(), ErrorCategory::Input)
}

/// A field whose slot exists and whose resolver has yet to run.
struct FieldTask<'a> {
    slot: SlotId,
    field: Arc<FieldDefinition>,
    /// Every selection merged under this response key.
    nodes: Vec<&'a SelectionNode>,
    parent: Arc<Value>,
}

struct Parked<'a> {
    task: FieldTask<'a>,
    deferred: Deferred,
}

enum Resumed {
    Ready(FieldResult<Resolution>),
    Waiting(Deferred),
}

struct Walker<'a> {
    schema: &'a Schema,
    policy: &'a dyn PolicyProvider,
    context: &'a ExecutionContext,
    loader: BatchLoader<'a>,
    tree: ResponseTree,
}

impl<'a> Walker<'a> {
    async fn run_tiers(&mut self, mut tier: Vec<FieldTask<'a>>) {
        let mut depth = 0usize;
        while !tier.is_empty() {
            let span = debug_span!("tier", depth, fields = tier.len());
            tier = self.resolve_tier(tier).instrument(span).await;
            depth += 1;
        }
    }

    /// Resolves every field of a tier and returns the fields of the next one.
    async fn resolve_tier(&mut self, tier: Vec<FieldTask<'a>>) -> Vec<FieldTask<'a>> {
        let results = join_all(tier.iter().map(|task| self.start_field(task))).await;

        let mut next = vec![];
        let mut parked = vec![];
        for (task, result) in tier.into_iter().zip(results) {
            self.settle(task, result, &mut parked, &mut next);
        }

        while !parked.is_empty() {
            let batches = self.loader.dispatch().await;
            debug!(batches, waiting = parked.len(), "Flushed load requests");

            let mut waiting = vec![];
            for Parked { task, deferred } in parked {
                match self.resume(deferred) {
                    Resumed::Ready(result) => self.settle(task, result, &mut waiting, &mut next),
                    Resumed::Waiting(deferred) if batches > 0 || self.loader.has_pending() => {
                        waiting.push(Parked { task, deferred })
                    }
                    Resumed::Waiting(_) => self.fail(
                        task.slot,
                        &task.field,
                        FieldError::internal("load request never completed"),
                    ),
                }
            }
            parked = waiting;
        }

        next
    }

    /// Authorizes the field and runs its resolver. Panics of the policy or
    /// the resolver are contained to the field.
    async fn start_field(&self, task: &FieldTask<'a>) -> FieldResult<Resolution> {
        let field = task.field.as_ref();
        let arguments = coerce_arguments(self.schema, field, &task.nodes[0].arguments)?;
        AssertUnwindSafe(authorize(
            self.policy,
            self.context.identity(),
            field,
            &task.parent,
            &arguments,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked(panic)))?;

        match &field.resolver {
            ResolverBinding::Property => Ok(Resolution::Value(match &*task.parent {
                Value::Object(map) => map.get(field.name.as_str()).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })),
            ResolverBinding::Custom(resolver) => {
                let ctx = ResolverContext {
                    field,
                    execution: self.context,
                    arguments: &arguments,
                    parent: &task.parent,
                    path: self.tree.path(task.slot),
                };
                AssertUnwindSafe(resolver.resolve(&ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(panicked(panic)))
            }
        }
    }

    fn settle(
        &mut self,
        task: FieldTask<'a>,
        result: FieldResult<Resolution>,
        parked: &mut Vec<Parked<'a>>,
        next: &mut Vec<FieldTask<'a>>,
    ) {
        match result {
            Err(err) => self.fail(task.slot, &task.field, err),
            Ok(Resolution::Value(value)) => {
                let field = task.field.clone();
                self.complete(task.slot, &field, &field.ty, value, &task.nodes, next);
            }
            Ok(Resolution::Deferred(deferred)) => {
                for request in &deferred.requests {
                    self.loader.enqueue(request);
                }
                parked.push(Parked { task, deferred });
            }
        }
    }

    fn resume(&self, deferred: Deferred) -> Resumed {
        if deferred
            .requests
            .iter()
            .any(|request| self.loader.outcome(request).is_none())
        {
            return Resumed::Waiting(deferred);
        }

        let mut values = Vec::with_capacity(deferred.requests.len());
        for request in &deferred.requests {
            match self.loader.outcome(request) {
                Some(Ok(value)) => values.push(value),
                Some(Err(LoadFailure::NotFound)) => {
                    return Resumed::Ready(Err(FieldError::not_found(
                        &request.entity_type,
                        &request.key,
                    )))
                }
                Some(Err(LoadFailure::SourceUnavailable)) | None => {
                    return Resumed::Ready(Err(FieldError::SourceUnavailable {
                        entity_type: request.entity_type.clone(),
                    }))
                }
            }
        }

        let continuation = deferred.continuation;
        Resumed::Ready(
            catch_unwind(AssertUnwindSafe(move || continuation(values)))
                .unwrap_or_else(|panic| Err(panicked(panic))),
        )
    }

    /// Writes `value` into `slot` according to `ty`, creating child slots
    /// for lists and objects. Object fields go to `next`.
    fn complete(
        &mut self,
        slot: SlotId,
        field: &FieldDefinition,
        ty: &TypeRef,
        value: Value,
        nodes: &[&'a SelectionNode],
        next: &mut Vec<FieldTask<'a>>,
    ) {
        match ty {
            TypeRef::NonNull(_) if value == Value::Null => {
                let error = GraphqlError::new(
                    format!(
                        "Cannot return null for non-nullable field `{}`",
                        field.qualified_name()
                    ),
                    self.tree.path(slot).clone(),
                    ErrorCategory::Internal,
                );
                self.record(slot, error);
            }
            TypeRef::NonNull(inner) => self.complete(slot, field, inner, value, nodes, next),
            _ if value == Value::Null => self.tree.set_null(slot),
            TypeRef::List(item) => {
                let Value::List(items) = value else {
                    return self.fail(
                        slot,
                        field,
                        FieldError::internal(format!(
                            "`{}` resolved to a non-list value",
                            field.qualified_name()
                        )),
                    );
                };
                let mut ids = Vec::with_capacity(items.len());
                for (index, item_value) in items.into_iter().enumerate() {
                    let id = self.tree.add(self.tree.path(slot).child(index), item.is_non_null());
                    self.complete(id, field, item, item_value, nodes, next);
                    ids.push(id);
                }
                self.tree.set_list(slot, ids);
            }
            TypeRef::Named(name) => {
                let schema = self.schema;
                let definition = match schema.type_definition(name) {
                    Ok(definition) => definition,
                    Err(err) => return self.fail(slot, field, err.into()),
                };
                if !definition.is_composite() {
                    // IDs always serialize as strings.
                    let value = match value {
                        Value::Number(number) if name == "ID" => Value::String(number.to_string()),
                        value => value,
                    };
                    return self.tree.set_leaf(slot, value);
                }
                if !matches!(value, Value::Object(_)) {
                    return self.fail(
                        slot,
                        field,
                        FieldError::internal(format!(
                            "`{}` resolved to a non-object value",
                            field.qualified_name()
                        )),
                    );
                }

                let object_type = if definition.is_abstract() {
                    match schema.resolve_concrete_type(name, &value) {
                        Ok(object_type) => object_type,
                        Err(err) => return self.fail(slot, field, err.into()),
                    }
                } else {
                    definition.name.as_str()
                };

                self.tree.set_object(slot);
                let candidates = nodes.iter().copied().flat_map(|node| node.children.iter());
                self.select_fields(slot, object_type, Arc::new(value), candidates, next);
            }
        }
    }

    /// Creates a slot for every selected field of an object of type
    /// `object_type`, merging selections by response key and dropping those
    /// whose type condition does not apply.
    fn select_fields(
        &mut self,
        slot: SlotId,
        object_type: &str,
        parent: Arc<Value>,
        candidates: impl Iterator<Item = &'a SelectionNode>,
        next: &mut Vec<FieldTask<'a>>,
    ) {
        let schema = self.schema;
        let mut grouped: IndexMap<&'a str, Vec<&'a SelectionNode>> = IndexMap::new();
        for node in candidates {
            let applies = node
                .type_condition
                .as_deref()
                .map_or(true, |condition| schema.applies_to(condition, object_type));
            if applies {
                grouped.entry(node.response_key()).or_default().push(node);
            }
        }

        for (key, nodes) in grouped {
            let path = self.tree.path(slot).child(key);
            let name = nodes[0].name.as_str();

            if name == TYPENAME_FIELD {
                let id = self.tree.add(path, true);
                self.tree.attach(slot, key, id);
                self.tree.set_leaf(id, Value::String(object_type.to_owned()));
                continue;
            }

            match schema.lookup(object_type, name) {
                Ok(field) => {
                    let id = self.tree.add(path, field.ty.is_non_null());
                    self.tree.attach(slot, key, id);
                    next.push(FieldTask {
                        slot: id,
                        field: field.clone(),
                        nodes,
                        parent: parent.clone(),
                    });
                }
                Err(err) => {
                    let id = self.tree.add(path, false);
                    self.tree.attach(slot, key, id);
                    let error = FieldError::from(err);
                    self.log_failure(id, name, &error);
                    self.record(id, GraphqlError::from_field_error(&error, self.tree.path(id).clone()));
                }
            }
        }
    }

    fn fail(&mut self, slot: SlotId, field: &FieldDefinition, err: FieldError) {
        self.log_failure(slot, &field.qualified_name(), &err);
        let error = GraphqlError::from_field_error(&err, self.tree.path(slot).clone());
        self.record(slot, error);
    }

    fn log_failure(&self, slot: SlotId, field: &str, err: &FieldError) {
        let path = self.tree.path(slot);
        match err {
            FieldError::Internal(cause) => {
                error!(%field, %path, error = ?cause, "Field resolution failed")
            }
            err => debug!(%field, %path, category = %err.category(), error = %err, "Field resolution failed"),
        }
    }

    fn record(&mut self, slot: SlotId, error: GraphqlError) {
        metrics()
            .field_errors
            .with_label_values(&[error.category().as_ref()])
            .inc();
        self.tree.fail(slot, error);
    }
}

fn panicked(panic: Box<dyn Any + Send>) -> FieldError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_owned());
    FieldError::internal(format!("field resolution panicked: {message}"))
}
