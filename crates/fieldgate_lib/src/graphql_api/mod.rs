//! The HTTP surface: GraphiQL, and a `POST /graphql` endpoint in front of an
//! [`Executor`].

use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::GraphQLRequest;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use fieldgate_common_types::{QueryRequest, Scope};

use crate::{Executor, Response};

/// Selects the store a request runs against.
pub const STORE_HEADER: &str = "store";

#[derive(Debug, Clone)]
pub struct ApiState {
    pub executor: Arc<Executor>,
    pub default_scope: Scope,
}

pub fn api_router(executor: Arc<Executor>, default_scope: Scope) -> Router {
    Router::new()
        .route("/", get(|| async { "Ready to roll!" }))
        .route("/graphql", get(graphiql_route).post(graphql_route))
        .with_state(Arc::new(ApiState {
            executor,
            default_scope,
        }))
}

async fn graphiql_route() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn graphql_route(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    request: GraphQLRequest,
) -> Json<Response> {
    let request = request.into_inner();
    let query = QueryRequest {
        query: request.query,
        operation_name: request.operation_name,
        variables: request.variables,
        token: bearer_token(&headers),
        scope: scope_from_headers(&headers, &state.default_scope),
    };

    Json(state.executor.execute(query).await)
}

/// The token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

/// Store from the `Store` header and locale from the first language tag of
/// `Accept-Language`, each falling back to `default`.
pub fn scope_from_headers(headers: &HeaderMap, default: &Scope) -> Scope {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let store = header_str(STORE_HEADER)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default.store.clone());
    let locale = header_str("accept-language")
        .and_then(|value| value.split(',').next())
        .map(|tag| tag.split(';').next().unwrap_or(tag).trim())
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(|tag| tag.replace('-', "_"))
        .unwrap_or_else(|| default.locale.clone());

    Scope { store, locale }
}
