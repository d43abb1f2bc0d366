use fieldgate_common_types::{EntityKey, ErrorCategory};
use fieldgate_lib::test_utils::fixtures::{Storefront, CUSTOMERS, PRODUCTS};
use fieldgate_lib::test_utils::mocks::MockFetcher;
use fieldgate_lib::test_utils::{data, error_summary};
use serde_json::json;

#[tokio::test]
async fn repeated_keys_are_fetched_once() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(
            r#"{
                p1: product(sku: "A") { name category { name } }
                p2: product(sku: "A") { name category { name } }
            }"#,
        )
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(
        data(&response),
        json!({
            "p1": { "name": "Alpha Runner", "category": { "name": "Shoes" } },
            "p2": { "name": "Alpha Runner", "category": { "name": "Shoes" } },
        })
    );
    assert_eq!(storefront.products.calls(), vec![vec![EntityKey::from("A")]]);
    assert_eq!(storefront.categories.calls(), vec![vec![EntityKey::Int(7)]]);
}

#[tokio::test]
async fn keys_of_one_tier_share_a_batch() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(
            r#"{
                a: product(sku: "A") { category { name } }
                b: product(sku: "B") { category { name } }
                c: product(sku: "C") { category { name } }
            }"#,
        )
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(
        storefront.products.calls(),
        vec![vec![
            EntityKey::from("A"),
            EntityKey::from("B"),
            EntityKey::from("C")
        ]]
    );
    assert_eq!(
        storefront.categories.calls(),
        vec![vec![EntityKey::Int(7), EntityKey::Int(8)]]
    );
}

#[tokio::test]
async fn each_tier_dispatches_its_own_batch() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(r#"{ product(sku: "A") { sku related { sku } } }"#)
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(
        data(&response),
        json!({ "product": { "sku": "A", "related": [{ "sku": "B" }, { "sku": "C" }] } })
    );
    assert_eq!(
        storefront.products.calls(),
        vec![
            vec![EntityKey::from("A")],
            vec![EntityKey::from("B"), EntityKey::from("C")]
        ]
    );
}

#[tokio::test]
async fn cached_keys_are_skipped_within_a_later_batch() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(
            r#"{
                a: product(sku: "A") { related { sku } }
                b: product(sku: "B") { sku }
            }"#,
        )
        .await;

    //// Then
    assert!(response.is_ok());
    assert_eq!(
        storefront.products.calls(),
        vec![
            vec![EntityKey::from("A"), EntityKey::from("B")],
            vec![EntityKey::from("C")]
        ]
    );
}

#[tokio::test]
async fn cache_entries_do_not_outlive_a_query() {
    //// Given
    let storefront = Storefront::new();

    //// When
    storefront.query(r#"{ product(sku: "A") { sku } }"#).await;
    storefront.query(r#"{ product(sku: "A") { sku } }"#).await;

    //// Then
    assert_eq!(
        storefront.products.calls(),
        vec![vec![EntityKey::from("A")], vec![EntityKey::from("A")]]
    );
}

#[tokio::test]
async fn missing_keys_fail_individually() {
    //// Given
    let storefront = Storefront::new();

    //// When
    let response = storefront
        .query(
            r#"{
                a: product(sku: "A") { name }
                z: product(sku: "ZZZ") { name }
                b: product(sku: "B") { name }
            }"#,
        )
        .await;

    //// Then
    assert_eq!(storefront.products.call_count(), 1);
    assert_eq!(
        data(&response),
        json!({
            "a": { "name": "Alpha Runner" },
            "z": null,
            "b": { "name": "Beta Trail" },
        })
    );
    assert_eq!(
        error_summary(&response),
        vec![("z".to_owned(), ErrorCategory::NotFound)]
    );
}

#[tokio::test]
async fn failed_batches_make_their_keys_unavailable() {
    //// Given
    let storefront = Storefront::with_fetchers(
        MockFetcher::new(PRODUCTS.clone()),
        MockFetcher::failing(),
        MockFetcher::new(CUSTOMERS.clone()),
    );

    //// When
    let response = storefront
        .query(
            r#"{
                a: product(sku: "A") { name category { name } }
                c: product(sku: "C") { name category { name } }
            }"#,
        )
        .await;

    //// Then
    assert_eq!(storefront.categories.call_count(), 1);
    assert_eq!(
        data(&response),
        json!({
            "a": { "name": "Alpha Runner", "category": null },
            "c": { "name": "Cap Classic", "category": null },
        })
    );
    assert_eq!(
        error_summary(&response),
        vec![
            ("a.category".to_owned(), ErrorCategory::SourceUnavailable),
            ("c.category".to_owned(), ErrorCategory::SourceUnavailable),
        ]
    );
}

#[tokio::test]
async fn unregistered_entity_types_are_unavailable() {
    //// Given
    let storefront = Storefront::new();
    let executor = fieldgate_lib::Executor::new(
        storefront.executor.schema().clone(),
        fieldgate_lib::loader::DataSources::new(),
    );

    //// When
    let response = executor
        .execute(fieldgate_common_types::QueryRequest::new(
            r#"{ product(sku: "A") { name } }"#,
        ))
        .await;

    //// Then
    assert_eq!(data(&response), json!({ "product": null }));
    assert_eq!(
        error_summary(&response),
        vec![("product".to_owned(), ErrorCategory::SourceUnavailable)]
    );
}
