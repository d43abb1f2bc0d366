pub mod fixtures;
pub mod mocks;

use fieldgate_common_types::ErrorCategory;

use crate::Response;

/// The `data` member of `response` as JSON, or `null` when absent.
pub fn data(response: &Response) -> serde_json::Value {
    response
        .data
        .clone()
        .map(|data| data.into_json().unwrap())
        .unwrap_or_default()
}

/// `(path, category)` of each error, with the path rendered like `a.0.b`.
pub fn error_summary(response: &Response) -> Vec<(String, ErrorCategory)> {
    response
        .errors
        .iter()
        .map(|error| (error.path.to_string(), error.category()))
        .collect()
}
