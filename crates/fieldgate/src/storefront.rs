//! The demo catalog served by the `fieldgate` binary: products, categories
//! and customers kept in memory, with names localized per locale and prices
//! per store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use async_graphql::{Name, Value};
use async_trait::async_trait;
use fieldgate_common_types::EntityKey;
use fieldgate_lib::auth::Requirement;
use fieldgate_lib::config::Config;
use fieldgate_lib::loader::{DataSources, EntityFetcher};
use fieldgate_lib::resolver::{resolver_fn, FieldResolver, Resolution, ResolverContext};
use fieldgate_lib::schema::{
    ArgumentDefinition, FieldDefinition, Schema, TypeDefinition, TypeRef, MUTATION_TYPE, QUERY_TYPE,
};
use fieldgate_lib::{Executor, FieldError, FieldResult};
use serde_json::json;
use tracing::debug;

const FALLBACK_LOCALE: &str = "en_US";
const FALLBACK_STORE: &str = "default";

type Table = Arc<RwLock<HashMap<EntityKey, Value>>>;

/// Serves one in-memory table.
struct TableFetcher {
    entity_type: &'static str,
    table: Table,
}

#[async_trait]
impl EntityFetcher for TableFetcher {
    async fn fetch(&self, keys: &[EntityKey]) -> anyhow::Result<HashMap<EntityKey, Value>> {
        debug!(entity_type = self.entity_type, keys = keys.len(), "Fetching from catalog");
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .filter_map(|key| Some((key.clone(), table.get(key)?.clone())))
            .collect())
    }
}

fn table(key_field: &str, records: serde_json::Value) -> anyhow::Result<Table> {
    let records = match records {
        serde_json::Value::Array(records) => records,
        _ => anyhow::bail!("catalog records must be an array"),
    };

    let mut table = HashMap::with_capacity(records.len());
    for record in records {
        let record = Value::from_json(record)?;
        let key = match &record {
            Value::Object(map) => map.get(key_field).context("record without key")?,
            _ => anyhow::bail!("catalog records must be objects"),
        };
        table.insert(EntityKey::try_from(key)?, record.clone());
    }
    Ok(Arc::new(RwLock::new(table)))
}

fn ty(s: &str) -> anyhow::Result<TypeRef> {
    Ok(s.parse()?)
}

/// Picks the entry of the parent's `field` map for `scope_key`, falling back
/// to `fallback`.
fn scoped(ctx: &ResolverContext<'_>, field: &str, scope_key: &str, fallback: &str) -> Value {
    match ctx.parent_field(field) {
        Some(Value::Object(entries)) => entries
            .get(scope_key)
            .or_else(|| entries.get(fallback))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// Sets the price of a product in the store of the request.
struct SetPrice {
    products: Table,
}

#[async_trait]
impl FieldResolver for SetPrice {
    async fn resolve(&self, ctx: &ResolverContext<'_>) -> FieldResult<Resolution> {
        let sku = ctx.arguments.key("sku")?;
        let price = ctx
            .arguments
            .get_f64("price")
            .ok_or_else(|| FieldError::input("Argument `price` is required"))?;
        let price = serde_json::Number::from_f64(price)
            .filter(|_| price >= 0.0)
            .ok_or_else(|| FieldError::input("Prices must be finite and not negative"))?;

        let mut products = self.products.write().unwrap_or_else(PoisonError::into_inner);
        let Some(Value::Object(product)) = products.get_mut(&sku) else {
            return Err(FieldError::not_found("Product", &sku));
        };
        let prices = product
            .entry(Name::new("prices"))
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(prices) = prices {
            prices.insert(Name::new(&ctx.scope().store), Value::Number(price.clone()));
        }

        debug!(%sku, store = %ctx.scope().store, %price, "Price updated");
        Ok(Resolution::value(Value::Object(product.clone())))
    }
}

fn schema(products: Table) -> anyhow::Result<Schema> {
    let mut builder = Schema::builder();
    builder
        .register_type(TypeDefinition::object("Product").description("A sellable item"))?
        .register_type(TypeDefinition::object("Category"))?
        .register_type(TypeDefinition::object("Customer"))?
        .enable_mutations();

    builder
        .register("Product", FieldDefinition::new("sku", ty("ID!")?))?
        .register(
            "Product",
            FieldDefinition::new("name", ty("String")?)
                .description("The name in the locale of the request")
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::value(scoped(ctx, "names", &ctx.scope().locale, FALLBACK_LOCALE)))
                })),
        )?
        .register(
            "Product",
            FieldDefinition::new("price", ty("Float")?)
                .description("The price in the store of the request")
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::value(scoped(ctx, "prices", &ctx.scope().store, FALLBACK_STORE)))
                })),
        )?
        .register(
            "Product",
            FieldDefinition::new("stock", ty("Int")?)
                .requires(Requirement::capability("inventory:read")),
        )?
        .register(
            "Product",
            FieldDefinition::new("category", ty("Category")?).resolver(resolver_fn(|ctx| {
                Ok(Resolution::load("Category", ctx.parent_key("categoryId")?))
            })),
        )?
        .register("Category", FieldDefinition::new("id", ty("ID!")?))?
        .register("Category", FieldDefinition::new("name", ty("String!")?))?
        .register("Customer", FieldDefinition::new("id", ty("ID!")?))?
        .register("Customer", FieldDefinition::new("name", ty("String")?))?
        .register(
            "Customer",
            FieldDefinition::new("email", ty("String!")?).requires(Requirement::owner("id")),
        )?;

    builder
        .register(
            QUERY_TYPE,
            FieldDefinition::new("product", ty("Product")?)
                .argument(ArgumentDefinition::new("sku", ty("ID!")?))
                .resolver(resolver_fn(|ctx| {
                    Ok(Resolution::load("Product", ctx.arguments.key("sku")?))
                })),
        )?
        .register(
            QUERY_TYPE,
            FieldDefinition::new("products", ty("[Product]!")?)
                .argument(ArgumentDefinition::new("skus", ty("[ID!]!")?))
                .resolver(resolver_fn(|ctx| {
                    let skus = match ctx.argument("skus") {
                        Some(Value::List(skus)) => skus
                            .iter()
                            .map(EntityKey::try_from)
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|err| FieldError::input(err.to_string()))?,
                        _ => vec![],
                    };
                    Ok(Resolution::load_many("Product", skus))
                })),
        )?
        .register(
            QUERY_TYPE,
            FieldDefinition::new("me", ty("Customer")?)
                .requires(Requirement::Authenticated)
                .resolver(resolver_fn(|ctx| match ctx.identity().subject() {
                    Some(subject) => Ok(Resolution::load("Customer", subject.id.as_str())),
                    None => Err(FieldError::Authentication),
                })),
        )?;

    builder.register(
        MUTATION_TYPE,
        FieldDefinition::new("setPrice", ty("Product!")?)
            .argument(ArgumentDefinition::new("sku", ty("ID!")?))
            .argument(ArgumentDefinition::new("price", ty("Float!")?))
            .requires(Requirement::capability("catalog:write"))
            .resolver(SetPrice { products }),
    )?;

    Ok(builder.build()?)
}

/// The demo catalog wired to the identities and limits of `config`.
pub fn executor(config: &Config) -> anyhow::Result<Executor> {
    let products = table(
        "sku",
        json!([
            {
                "sku": "SHOE-1",
                "names": { "en_US": "Trail runner", "de_DE": "Traillaufschuh" },
                "prices": { "default": 89.9, "eu_store": 84.5 },
                "stock": 12,
                "categoryId": 1
            },
            {
                "sku": "SHOE-2",
                "names": { "en_US": "Road racer", "de_DE": "Straßenrenner" },
                "prices": { "default": 119.0 },
                "stock": 3,
                "categoryId": 1
            },
            {
                "sku": "HAT-1",
                "names": { "en_US": "Sun hat" },
                "prices": { "default": 19.5 },
                "stock": 0,
                "categoryId": 2
            }
        ]),
    )?;
    let categories = table(
        "id",
        json!([
            { "id": 1, "name": "Shoes" },
            { "id": 2, "name": "Hats" }
        ]),
    )?;
    let customers = table(
        "id",
        json!([
            { "id": "alice", "name": "Alice", "email": "alice@example.com" },
            { "id": "bob", "name": "Bob", "email": "bob@example.com" }
        ]),
    )?;

    let sources = DataSources::new()
        .with(
            "Product",
            Arc::new(TableFetcher {
                entity_type: "Product",
                table: products.clone(),
            }),
        )
        .with(
            "Category",
            Arc::new(TableFetcher {
                entity_type: "Category",
                table: categories,
            }),
        )
        .with(
            "Customer",
            Arc::new(TableFetcher {
                entity_type: "Customer",
                table: customers,
            }),
        );

    Ok(Executor::new(schema(products)?, sources)
        .with_identity_provider(Arc::new(config.identity_provider()))
        .with_options(config.execution.options()))
}

#[cfg(test)]
mod tests {
    use fieldgate_common_types::{ErrorCategory, QueryRequest, Scope};
    use fieldgate_lib::config::IdentityConfig;

    use super::*;

    fn config() -> Config {
        let mut config: Config = serde_yaml::from_str("{}").unwrap();
        config.identities.push(IdentityConfig {
            token: "merchant-token".to_owned(),
            subject: "merchant".to_owned(),
            capabilities: vec!["catalog:write".to_owned()],
        });
        config
    }

    #[tokio::test]
    async fn names_and_prices_follow_the_scope() {
        let executor = executor(&config()).unwrap();
        let query = r#"{ product(sku: "SHOE-1") { name price category { name } } }"#;

        let default = executor.execute(QueryRequest::new(query)).await;
        let german = executor
            .execute(QueryRequest::new(query).scope(Scope::new("eu_store", "de_DE")))
            .await;
        let french = executor
            .execute(QueryRequest::new(query).scope(Scope::new("fr_store", "fr_FR")))
            .await;

        assert_eq!(
            default.to_json(),
            json!({ "data": { "product": { "name": "Trail runner", "price": 89.9, "category": { "name": "Shoes" } } } })
        );
        assert_eq!(
            german.to_json(),
            json!({ "data": { "product": { "name": "Traillaufschuh", "price": 84.5, "category": { "name": "Shoes" } } } })
        );
        assert_eq!(
            french.to_json(),
            json!({ "data": { "product": { "name": "Trail runner", "price": 89.9, "category": { "name": "Shoes" } } } })
        );
    }

    #[tokio::test]
    async fn prices_are_set_per_store() {
        let executor = executor(&config()).unwrap();
        let mutation = r#"mutation { setPrice(sku: "HAT-1", price: 17.0) { price } }"#;

        let denied = executor.execute(QueryRequest::new(mutation)).await;
        assert_eq!(denied.errors[0].category(), ErrorCategory::Authentication);

        let updated = executor
            .execute(
                QueryRequest::new(mutation)
                    .token("merchant-token")
                    .scope(Scope::new("eu_store", "en_US")),
            )
            .await;
        assert!(updated.is_ok());
        assert_eq!(
            updated.to_json(),
            json!({ "data": { "setPrice": { "price": 17.0 } } })
        );

        let elsewhere = executor
            .execute(QueryRequest::new(r#"{ product(sku: "HAT-1") { price } }"#))
            .await;
        assert_eq!(
            elsewhere.to_json(),
            json!({ "data": { "product": { "price": 19.5 } } })
        );
    }
}
