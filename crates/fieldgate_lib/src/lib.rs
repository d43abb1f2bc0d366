//! The Fieldgate engine: turns a GraphQL selection tree into an authorized,
//! batch-loaded, partial-tolerant response.

pub mod auth;
mod cli;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod execution;
pub mod graphql_api;
pub mod loader;
mod prometheus_metrics;
pub mod resolver;
pub mod response;
pub mod schema;
pub mod selection;

#[cfg(feature = "tests")]
pub mod test_utils;

pub use async_graphql::{Name, Value, Variables};
pub use cli::CliOptions;
pub use error::{FieldError, FieldResult};
pub use execution::{ExecutionAborted, ExecutionOptions, Executor};
pub use prometheus_metrics::{metrics, PrometheusExporter, PrometheusMetrics};
pub use response::{GraphqlError, Response};

pub const FIELDGATE_VERSION: &str = env!("CARGO_PKG_VERSION");
