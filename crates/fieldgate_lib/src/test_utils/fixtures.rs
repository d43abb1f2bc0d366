//! A small storefront schema backed by [`MockFetcher`]s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_graphql::Value;
use async_trait::async_trait;
use fieldgate_common_types::{EntityKey, QueryRequest, Subject};
use once_cell::sync::Lazy;
use serde_json::json;

use super::mocks::MockFetcher;
use crate::auth::{Requirement, StaticIdentityProvider};
use crate::error::{FieldError, FieldResult};
use crate::loader::DataSources;
use crate::resolver::{resolver_fn, FieldResolver, Resolution, ResolverContext};
use crate::schema::{
    ArgumentDefinition, FieldDefinition, Schema, TypeDefinition, TypeRef, MUTATION_TYPE, QUERY_TYPE,
};
use crate::{ExecutionOptions, Executor, Response};

pub const ALICE_TOKEN: &str = "alice-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub static PRODUCTS: Lazy<Vec<(EntityKey, Value)>> = Lazy::new(|| {
    records(
        "sku",
        json!([
            { "__typename": "Product", "id": "A", "sku": "A", "name": "Alpha Runner", "stock": 12, "categoryId": 7, "relatedSkus": ["B", "C"] },
            { "__typename": "Product", "id": "B", "sku": "B", "name": "Beta Trail", "stock": 3, "categoryId": 7, "relatedSkus": ["A"] },
            { "__typename": "Product", "id": "C", "sku": "C", "name": "Cap Classic", "stock": 0, "categoryId": 8, "relatedSkus": [] },
            { "__typename": "Product", "id": "D", "sku": "D", "name": "Discontinued", "stock": 0, "categoryId": 99, "relatedSkus": ["ZZZ"] },
        ]),
    )
});

/// Category 8 lacks its non-null `code`.
pub static CATEGORIES: Lazy<Vec<(EntityKey, Value)>> = Lazy::new(|| {
    records(
        "id",
        json!([
            { "id": 7, "name": "Shoes", "code": "shoes" },
            { "id": 8, "name": "Hats" },
        ]),
    )
});

pub static CUSTOMERS: Lazy<Vec<(EntityKey, Value)>> = Lazy::new(|| {
    records(
        "id",
        json!([
            { "id": "alice", "name": "Alice", "email": "alice@example.com" },
            { "id": "bob", "name": "Bob", "email": "bob@example.com" },
        ]),
    )
});

fn records(key_field: &str, values: serde_json::Value) -> Vec<(EntityKey, Value)> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|record| {
            let key = EntityKey::try_from(&Value::from_json(record[key_field].clone()).unwrap()).unwrap();
            (key, Value::from_json(record.clone()).unwrap())
        })
        .collect()
}

fn ty(s: &str) -> TypeRef {
    s.parse().unwrap()
}

/// Echoes its `value` argument after sleeping `delayMs`.
struct Echo;

#[async_trait]
impl FieldResolver for Echo {
    async fn resolve(&self, ctx: &ResolverContext<'_>) -> FieldResult<Resolution> {
        let delay = ctx.arguments.get_i64("delayMs").unwrap_or(0).max(0) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Resolution::value(
            ctx.argument("value").cloned().unwrap_or(Value::Null),
        ))
    }
}

/// Appends `entry` to a shared log after sleeping `delayMs`, and returns the
/// new length of the log.
struct AppendLog {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FieldResolver for AppendLog {
    async fn resolve(&self, ctx: &ResolverContext<'_>) -> FieldResult<Resolution> {
        let delay = ctx.arguments.get_i64("delayMs").unwrap_or(0).max(0) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let entry = ctx.arguments.get_str("entry").unwrap_or_default().to_owned();
        let len = {
            let mut log = self.log.lock().unwrap();
            log.push(entry);
            log.len()
        };
        Ok(Resolution::value(len as i32))
    }
}

fn search(term: &str) -> Vec<Value> {
    let term = term.to_lowercase();
    PRODUCTS
        .iter()
        .chain(CATEGORIES.iter())
        .map(|(_, record)| record)
        .filter(|record| match record {
            Value::Object(map) => matches!(
                map.get("name"),
                Some(Value::String(name)) if name.to_lowercase().contains(&term)
            ),
            _ => false,
        })
        .cloned()
        .collect()
}

fn keys_of(value: Option<&Value>) -> FieldResult<Vec<EntityKey>> {
    match value {
        Some(Value::List(items)) => items
            .iter()
            .map(EntityKey::try_from)
            .collect::<Result<_, _>>()
            .map_err(|err| FieldError::Internal(err.into())),
        _ => Ok(vec![]),
    }
}

pub fn storefront_schema(mutation_log: Arc<Mutex<Vec<String>>>) -> Schema {
    let mut builder = Schema::builder();
    builder
        .register_type(TypeDefinition::interface("Node"))
        .unwrap()
        .register_type(TypeDefinition::object("Product").implements("Node"))
        .unwrap()
        .register_type(TypeDefinition::object("Category"))
        .unwrap()
        .register_type(TypeDefinition::object("Customer"))
        .unwrap()
        .register_type(TypeDefinition::union("SearchResult", ["Product", "Category"]))
        .unwrap()
        .register_type_resolver("SearchResult", |value| match value {
            Value::Object(map) if map.contains_key("sku") => Some("Product".to_owned()),
            Value::Object(_) => Some("Category".to_owned()),
            _ => None,
        })
        .unwrap();
    builder.enable_mutations();

    let id = || FieldDefinition::new("id", ty("ID!"));
    builder
        .register("Node", id())
        .unwrap()
        .register("Product", id())
        .unwrap()
        .register("Product", FieldDefinition::new("sku", ty("String!")))
        .unwrap()
        .register("Product", FieldDefinition::new("name", ty("String")))
        .unwrap()
        .register(
            "Product",
            FieldDefinition::new("stock", ty("Int")).requires(Requirement::capability("inventory:read")),
        )
        .unwrap()
        .register(
            "Product",
            FieldDefinition::new("category", ty("Category")).resolver(resolver_fn(|ctx| {
                Ok(Resolution::load("Category", ctx.parent_key("categoryId")?))
            })),
        )
        .unwrap()
        .register(
            "Product",
            FieldDefinition::new("related", ty("[Product!]")).resolver(resolver_fn(|ctx| {
                Ok(Resolution::load_many(
                    "Product",
                    keys_of(ctx.parent_field("relatedSkus"))?,
                ))
            })),
        )
        .unwrap()
        .register("Category", id())
        .unwrap()
        .register("Category", FieldDefinition::new("name", ty("String!")))
        .unwrap()
        .register("Category", FieldDefinition::new("code", ty("String!")))
        .unwrap()
        .register("Customer", id())
        .unwrap()
        .register("Customer", FieldDefinition::new("name", ty("String")))
        .unwrap()
        .register(
            "Customer",
            FieldDefinition::new("email", ty("String!")).requires(Requirement::owner("id")),
        )
        .unwrap();

    builder
        .register(
            QUERY_TYPE,
            FieldDefinition::new("product", ty("Product"))
                .argument(ArgumentDefinition::new("sku", ty("String!")))
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::load("Product", ctx.arguments.key("sku")?))
                })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("products", ty("[Product]"))
                .argument(ArgumentDefinition::new("skus", ty("[String!]!")))
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::load_many("Product", keys_of(ctx.argument("skus"))?))
                })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("customer", ty("Customer"))
                .argument(ArgumentDefinition::new("id", ty("ID!")))
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::load("Customer", ctx.arguments.key("id")?))
                })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("me", ty("Customer"))
                .requires(Requirement::Authenticated)
                .resolver(resolver_fn(|ctx| match ctx.identity().subject() {
                    Some(subject) => Ok(Resolution::load("Customer", subject.id.as_str())),
                    None => Err(FieldError::Authentication),
                })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("node", ty("Node"))
                .argument(ArgumentDefinition::new("id", ty("ID!")))
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::load("Product", ctx.arguments.key("id")?))
                })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("search", ty("[SearchResult!]!"))
                .argument(ArgumentDefinition::new("term", ty("String!")))
                .resolver(resolver_fn(|ctx| {
                    let term = ctx.arguments.get_str("term").unwrap_or_default();
                    Ok(Resolution::value(Value::List(search(term))))
                })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("echo", ty("String"))
                .argument(ArgumentDefinition::new("value", ty("String!")))
                .argument(ArgumentDefinition::new("delayMs", ty("Int")).default_value(0))
                .resolver(Echo),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("boom", ty("String")).resolver(resolver_fn(|_| {
                Err(anyhow!("connection refused: 10.0.0.3:5432").into())
            })),
        )
        .unwrap()
        .register(
            QUERY_TYPE,
            FieldDefinition::new("explode", ty("String"))
                .resolver(resolver_fn(|_| panic!("resolver exploded"))),
        )
        .unwrap();

    builder
        .register(
            MUTATION_TYPE,
            FieldDefinition::new("appendLog", ty("Int!"))
                .argument(ArgumentDefinition::new("entry", ty("String!")))
                .argument(ArgumentDefinition::new("delayMs", ty("Int")).default_value(0))
                .requires(Requirement::capability("catalog:write"))
                .resolver(AppendLog { log: mutation_log }),
        )
        .unwrap();

    builder.build().unwrap()
}

pub fn test_identities() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_token(ALICE_TOKEN, Subject::new("alice"))
        .with_token(
            ADMIN_TOKEN,
            Subject::new("admin")
                .with_capability("catalog:write")
                .with_capability("inventory:read"),
        )
}

/// The storefront schema wired to counting mock fetchers.
pub struct Storefront {
    pub products: Arc<MockFetcher>,
    pub categories: Arc<MockFetcher>,
    pub customers: Arc<MockFetcher>,
    pub mutation_log: Arc<Mutex<Vec<String>>>,
    pub executor: Executor,
}

impl Default for Storefront {
    fn default() -> Self {
        Self::new()
    }
}

impl Storefront {
    pub fn new() -> Self {
        Self::with_fetchers(
            MockFetcher::new(PRODUCTS.clone()),
            MockFetcher::new(CATEGORIES.clone()),
            MockFetcher::new(CUSTOMERS.clone()),
        )
    }

    pub fn with_fetchers(products: MockFetcher, categories: MockFetcher, customers: MockFetcher) -> Self {
        let products = Arc::new(products);
        let categories = Arc::new(categories);
        let customers = Arc::new(customers);
        let mutation_log = Arc::new(Mutex::new(vec![]));

        let sources = DataSources::new()
            .with("Product", products.clone())
            .with("Category", categories.clone())
            .with("Customer", customers.clone());
        let executor = Executor::new(storefront_schema(mutation_log.clone()), sources)
            .with_identity_provider(Arc::new(test_identities()))
            .with_options(ExecutionOptions {
                timeout: None,
                max_depth: 10,
            });

        Self {
            products,
            categories,
            customers,
            mutation_log,
            executor,
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.executor = self.executor.with_options(options);
        self
    }

    pub async fn query(&self, query: &str) -> Response {
        self.executor.execute(QueryRequest::new(query)).await
    }

    pub async fn query_as(&self, token: &str, query: &str) -> Response {
        self.executor
            .execute(QueryRequest::new(query).token(token))
            .await
    }
}
