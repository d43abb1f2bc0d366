use std::time::Duration;

use fieldgate_common_types::{ErrorCategory, Identity, QueryRequest, Scope, Subject};
use fieldgate_lib::context::ExecutionContext;
use fieldgate_lib::selection::{Operation, SelectionNode};
use fieldgate_lib::test_utils::fixtures::{Storefront, ADMIN_TOKEN};
use fieldgate_lib::test_utils::{data, error_summary};
use fieldgate_lib::{ExecutionAborted, ExecutionOptions, Value, Variables};
use itertools::Itertools;
use quickcheck_macros::quickcheck;
use serde_json::json;
use tracing_test::traced_test;

#[quickcheck]
fn response_keys_follow_the_selection_order(delays: Vec<u8>) -> bool {
    let delays = delays
        .into_iter()
        .take(8)
        .map(|delay| u64::from(delay % 20))
        .collect_vec();
    if delays.is_empty() {
        return true;
    }

    let selection = delays
        .iter()
        .enumerate()
        .map(|(i, delay)| format!(r#"f{i}: echo(value: "{i}", delayMs: {delay})"#))
        .join(" ");
    let storefront = Storefront::new();
    let response = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(storefront.query(&format!("{{ {selection} }}")));

    let Some(Value::Object(fields)) = response.data else {
        return false;
    };
    fields
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .eq((0..delays.len()).map(|i| (format!("f{i}"), Value::String(i.to_string()))))
}

#[tokio::test]
async fn interfaces_and_unions_resolve_to_concrete_types() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(
            r#"{
                node(id: "A") { __typename id ... on Product { sku } }
                hats: search(term: "HAT") { __typename ... on Category { name } ... on Product { sku } }
                caps: search(term: "cap") { __typename ... on Category { name } ... on Product { sku } }
            }"#,
        )
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(
        data(&response),
        json!({
            "node": { "__typename": "Product", "id": "A", "sku": "A" },
            "hats": [{ "__typename": "Category", "name": "Hats" }],
            "caps": [{ "__typename": "Product", "sku": "C" }],
        })
    );
}

#[tokio::test]
async fn ids_serialize_as_strings() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(r#"{ product(sku: "B") { category { id } } }"#)
        .await;

    //// Then
    assert_eq!(
        data(&response),
        json!({ "product": { "category": { "id": "7" } } })
    );
}

#[tokio::test]
async fn variables_fragments_and_directives_are_applied() {
    //// Given
    let storefront = Storefront::new();
    let query = r#"
        query Lookup($sku: String!, $withName: Boolean = true) {
            product(sku: $sku) {
                ...Identifiers
                name @include(if: $withName)
            }
        }

        fragment Identifiers on Product { sku }
    "#;

    //// When
    let with_name = storefront
        .executor
        .execute(
            QueryRequest::new(query)
                .operation_name("Lookup")
                .variables(Variables::from_json(json!({ "sku": "B" }))),
        )
        .await;
    let without_name = storefront
        .executor
        .execute(
            QueryRequest::new(query)
                .variables(Variables::from_json(json!({ "sku": "B", "withName": false }))),
        )
        .await;

    //// Then
    assert_eq!(
        data(&with_name),
        json!({ "product": { "sku": "B", "name": "Beta Trail" } })
    );
    assert_eq!(data(&without_name), json!({ "product": { "sku": "B" } }));
}

#[tokio::test]
async fn arguments_are_coerced_before_resolution() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(
            r#"{
                single: products(skus: "A") { sku }
                wrong: product(sku: 7) { sku }
            }"#,
        )
        .await;

    //// Then
    assert_eq!(
        data(&response),
        json!({ "single": [{ "sku": "A" }], "wrong": null })
    );
    assert_eq!(
        error_summary(&response),
        vec![("wrong".to_owned(), ErrorCategory::Input)]
    );
    assert_eq!(
        response.errors[0].message,
        "Argument `sku` of `Query.product` expects type `String`"
    );
}

#[tokio::test]
async fn malformed_documents_abort_the_query() {
    //// Given
    let storefront = Storefront::new();

    for query in [
        "{ product(",
        "{ nope }",
        r#"{ product(sku: "A") }"#,
        r#"{ product(sku: "A", color: "red") { sku } }"#,
        "query Q($sku: String!) { product(sku: $sku) { sku } }",
    ] {
        //// When
        let response = storefront.query(query).await;

        //// Then
        assert!(response.is_aborted(), "{query}");
        assert_eq!(
            error_summary(&response),
            vec![(String::new(), ErrorCategory::Input)],
            "{query}"
        );
    }
    assert_eq!(storefront.products.call_count(), 0);
}

#[tokio::test]
async fn selections_deeper_than_the_limit_are_rejected() {
    //// Given
    let storefront = Storefront::new();
    let nested = |levels: usize| {
        format!(
            r#"{{ product(sku: "A") {{ {} sku {} }} }}"#,
            "related { ".repeat(levels),
            "}".repeat(levels)
        )
    };

    //// When
    let shallow = storefront.query(&nested(3)).await;
    let deep = storefront.query(&nested(12)).await;

    //// Then
    assert!(shallow.is_ok());
    assert!(deep.is_aborted());
    assert_eq!(deep.errors[0].category(), ErrorCategory::Input);
}

#[tokio::test]
async fn panicking_resolvers_only_fail_their_field() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(r#"{ explode echo(value: "ok") }"#)
        .await;

    //// Then
    assert_eq!(data(&response), json!({ "explode": null, "echo": "ok" }));
    assert_eq!(
        error_summary(&response),
        vec![("explode".to_owned(), ErrorCategory::Internal)]
    );
    assert_eq!(response.errors[0].message, "Internal server error");
}

#[tokio::test]
#[traced_test]
async fn internal_details_are_logged_but_not_returned() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront.query("{ boom }").await;

    //// Then
    assert_eq!(data(&response), json!({ "boom": null }));
    assert_eq!(response.errors[0].message, "Internal server error");
    assert!(!response.to_json().to_string().contains("10.0.0.3"));
    assert!(logs_contain("10.0.0.3"));
}

#[tokio::test(start_paused = true)]
async fn slow_queries_time_out() {
    //// Given
    let storefront = Storefront::new().with_options(ExecutionOptions {
        timeout: Some(Duration::from_millis(50)),
        max_depth: 10,
    });

    //// When
    let response = storefront
        .query(r#"{ fast: echo(value: "a") slow: echo(value: "b", delayMs: 5000) }"#)
        .await;

    //// Then
    assert!(response.is_aborted());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "Query timed out");
    assert_eq!(response.errors[0].category(), ErrorCategory::Internal);
}

#[tokio::test]
async fn repeated_fragment_spreads_bind_within_the_deadline() {
    //// Given
    let storefront = Storefront::new().with_options(ExecutionOptions {
        timeout: Some(Duration::from_millis(50)),
        max_depth: 10,
    });
    let fragments = (0..22)
        .map(|i| format!("fragment F{i} on Product {{ ...F{next} ...F{next} }}", next = i + 1))
        .join(" ");
    let query = format!(
        r#"{{ product(sku: "A") {{ ...F0 }} }} {fragments} fragment F22 on Product {{ sku }}"#
    );

    //// When
    let started = std::time::Instant::now();
    let response = storefront.query(&query).await;

    //// Then
    assert!(response.is_ok(), "{:?}", response.errors);
    assert_eq!(data(&response), json!({ "product": { "sku": "A" } }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn documents_expanding_to_too_many_fields_abort() {
    //// Given
    let storefront = Storefront::new();
    let fragments = (0..20)
        .map(|i| {
            format!(
                "fragment F{i} on Product {{ a: related {{ ...F{next} }} b: related {{ ...F{next} }} }}",
                next = i + 1
            )
        })
        .join(" ");
    let query = format!(
        r#"{{ product(sku: "A") {{ ...F0 }} }} {fragments} fragment F20 on Product {{ sku }}"#
    );

    //// When
    let response = storefront.query(&query).await;

    //// Then
    assert!(response.is_aborted());
    assert_eq!(
        error_summary(&response),
        vec![(String::new(), ErrorCategory::Input)]
    );
    assert_eq!(
        response.errors[0].message,
        "Selection exceeds the maximum of 10000 fields"
    );
    assert_eq!(storefront.products.call_count(), 0);
}

#[tokio::test]
async fn one_response_key_cannot_name_two_fields() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let conflicting = storefront
        .query(r#"{ product(sku: "A") { x: sku ... on Product { x: name } } }"#)
        .await;
    let disjoint = storefront
        .query(r#"{ search(term: "a") { ... on Product { x: sku } ... on Category { x: name } } }"#)
        .await;

    //// Then
    assert!(conflicting.is_aborted());
    assert_eq!(
        conflicting.errors[0].message,
        "Fields under the response key `x` conflict"
    );
    assert_eq!(storefront.products.call_count(), 0);
    assert!(!disjoint.is_aborted(), "{:?}", disjoint.errors);
}

#[tokio::test(start_paused = true)]
async fn cancelled_queries_return_nothing() {
    //// Given
    let storefront = Storefront::new();
    let query = r#"{ echo(value: "late", delayMs: 1000) }"#;

    //// When
    let cancelled = storefront
        .executor
        .execute_until(
            QueryRequest::new(query),
            tokio::time::sleep(Duration::from_millis(10)),
        )
        .await;
    let completed = storefront
        .executor
        .execute_until(QueryRequest::new(query), std::future::pending())
        .await;

    //// Then
    assert_eq!(cancelled.unwrap_err(), ExecutionAborted::Cancelled);
    assert_eq!(data(&completed.unwrap()), json!({ "echo": "late" }));
}

#[tokio::test(start_paused = true)]
async fn mutations_run_in_document_order() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query_as(
            ADMIN_TOKEN,
            r#"mutation {
                first: appendLog(entry: "first", delayMs: 50)
                second: appendLog(entry: "second")
            }"#,
        )
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(data(&response), json!({ "first": 1, "second": 2 }));
    assert_eq!(
        *storefront.mutation_log.lock().unwrap(),
        vec!["first".to_owned(), "second".to_owned()]
    );
}

#[tokio::test]
async fn prebuilt_operations_execute_within_a_given_context() {
    //// Given
    let storefront = Storefront::new();
    let operation = Operation::query(vec![SelectionNode::field("product")
        .alias("p")
        .argument("sku", "B")
        .select([
            SelectionNode::field("name"),
            SelectionNode::field("stock"),
        ])]);
    let context = ExecutionContext::new(
        Identity::Authenticated(Subject::new("ops").with_capability("inventory:read")),
        Scope::default(),
    );

    //// When
    let response = storefront
        .executor
        .execute_operation(&operation, context)
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(
        data(&response),
        json!({ "p": { "name": "Beta Trail", "stock": 3 } })
    );
    assert_eq!(storefront.products.call_count(), 1);
}

#[tokio::test]
async fn each_execution_starts_with_an_empty_load_cache() {
    //// Given
    let storefront = Storefront::new();
    let operation = Operation::query(vec![SelectionNode::field("product")
        .argument("sku", "A")
        .select([SelectionNode::field("sku")])]);
    let context = || ExecutionContext::new(Identity::Anonymous, Scope::default());

    //// When
    let first = storefront
        .executor
        .execute_operation(&operation, context())
        .await;
    let second = storefront
        .executor
        .execute_operation(&operation, context())
        .await;

    //// Then
    assert_eq!(data(&first), json!({ "product": { "sku": "A" } }));
    assert_eq!(data(&second), data(&first));
    assert_eq!(storefront.products.call_count(), 2);
}
