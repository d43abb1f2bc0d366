//! Fieldgate configuration parsing.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use fieldgate_common_types::{Scope, Subject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::StaticIdentityProvider;
use crate::ExecutionOptions;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlConfig {
    /// The port on which the GraphQL API server should listen.
    #[serde(default = "Config::default_graphql_api_port")]
    pub port: u16,
}

impl Default for GraphQlConfig {
    fn default() -> Self {
        Self {
            port: Config::default_graphql_api_port(),
        }
    }
}

/// Limits applied to every query.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Hard deadline for a whole query. Set it to 0 to disable it.
    #[serde(default = "ExecutionConfig::default_timeout_in_msecs")]
    pub timeout_in_msecs: u64,
    /// Maximum nesting depth of a selection.
    #[serde(default = "ExecutionConfig::default_max_depth")]
    pub max_depth: usize,
}

impl ExecutionConfig {
    pub fn options(&self) -> ExecutionOptions {
        ExecutionOptions {
            timeout: (self.timeout_in_msecs > 0).then(|| Duration::from_millis(self.timeout_in_msecs)),
            max_depth: self.max_depth,
        }
    }

    fn default_timeout_in_msecs() -> u64 {
        30_000
    }

    fn default_max_depth() -> usize {
        15
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_in_msecs: Self::default_timeout_in_msecs(),
            max_depth: Self::default_max_depth(),
        }
    }
}

/// A static API token and the subject it authenticates as.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    pub token: String,
    pub subject: String,
    /// Capabilities granted to the subject, e.g. `catalog:write`.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A [`serde`]-compatible representation of Fieldgate's YAML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// GraphQL API configuration.
    #[serde(default)]
    pub graphql: GraphQlConfig,
    /// The port on which the Prometheus exporter should listen.
    #[serde(default = "Config::default_prometheus_port")]
    pub prometheus_port: u16,
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Store and locale used when a request does not name them.
    #[serde(default)]
    pub default_scope: Scope,
    /// Static API tokens.
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
}

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        serde_yaml::from_reader(file).context("invalid config file")
    }

    pub fn identity_provider(&self) -> StaticIdentityProvider {
        info!(tokens = self.identities.len(), "Configuring static identities");
        self.identities
            .iter()
            .fold(StaticIdentityProvider::new(), |provider, identity| {
                let subject = identity
                    .capabilities
                    .iter()
                    .fold(Subject::new(&identity.subject), |subject, capability| {
                        subject.with_capability(capability)
                    });
                provider.with_token(&identity.token, subject)
            })
    }

    fn default_prometheus_port() -> u16 {
        9184
    }

    fn default_graphql_api_port() -> u16 {
        3030
    }
}

#[cfg(test)]
mod tests {
    use fieldgate_common_types::Identity;

    use super::*;
    use crate::auth::IdentityProvider;

    const CONFIG: &str = r#"
graphql:
  port: 4000
execution:
  timeoutInMsecs: 0
defaultScope:
  store: eu_store
  locale: de_DE
identities:
  - token: admin-token
    subject: admin
    capabilities: ["catalog:write"]
"#;

    #[tokio::test]
    async fn parses_yaml_with_defaults() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();

        assert_eq!(config.graphql.port, 4000);
        assert_eq!(config.prometheus_port, 9184);
        assert_eq!(config.default_scope, Scope::new("eu_store", "de_DE"));
        assert_eq!(
            config.execution.options(),
            ExecutionOptions {
                timeout: None,
                max_depth: 15
            }
        );

        let identity = config
            .identity_provider()
            .authenticate("admin-token")
            .await
            .unwrap();
        assert!(matches!(
            identity,
            Identity::Authenticated(subject) if subject.has_capability("catalog:write")
        ));
    }

    #[test]
    fn empty_config_is_valid() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.graphql.port, 3030);
        assert_eq!(config.default_scope, Scope::default());
        assert_eq!(
            config.execution.options().timeout,
            Some(Duration::from_secs(30))
        );
    }
}
