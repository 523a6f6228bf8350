use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::Address;
use common::bonding_curve::CurveParams;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::store::ZeroBalancePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" | "test" => Ok(Environment::Development),
            other => Err(ConfigError::Invalid(format!("Unknown environment: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub environment: Environment,
    pub api: ApiConfig,
    pub chains: BTreeMap<u64, ChainConfig>,
    pub default_chain_id: u64,
    pub store: StoreConfig,
    pub batch: BatchConfig,
    pub retry: RetryPolicy,
    pub curve: CurveParams,
    pub members: MembersConfig,
    pub webhook: WebhookConfig,
    pub cron: CronConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Only `GroupCreated` logs from this contract are indexed; any emitter is
    /// accepted when unset
    #[serde(default)]
    pub factory_address: Option<Address>,
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file; the store is memory-only when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Groups handled per run
    pub group_limit: usize,
    /// Blocks per `eth_getLogs` request
    pub chunk_size: u64,
    pub group_time_budget_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            group_limit: 10,
            chunk_size: 2000,
            group_time_budget_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MembersConfig {
    pub zero_balance_policy: ZeroBalancePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub signing_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronConfig {
    pub secret: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "Failed to read config: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl IndexerConfig {
    pub const FILE_NAME: &'static str = "indexer.json";

    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Load `indexer.json` from the config directory, falling back to
    /// defaults when absent, then apply environment overrides.
    pub async fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(Self::FILE_NAME);
        let config = if path.exists() {
            Self::load_from_file(&path).await?
        } else {
            tracing::warn!("{} not found in {:?}, using defaults", Self::FILE_NAME, config_dir);
            Self::default()
        };
        config.with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; `with_env_overrides` passes the
    /// process environment.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(env) = lookup("INDEXER_ENV") {
            self.environment = env.parse()?;
        }
        if let Some(key) = lookup("ALCHEMY_WEBHOOK_SIGNING_KEY").filter(|k| !k.is_empty()) {
            self.webhook.signing_key = Some(key);
        }
        if let Some(secret) = lookup("CRON_SECRET").filter(|s| !s.is_empty()) {
            self.cron.secret = Some(secret);
        }
        if let Some(path) = lookup("STORE_PATH").filter(|p| !p.is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(chain_id) = lookup("DEFAULT_CHAIN_ID") {
            self.default_chain_id = chain_id
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("DEFAULT_CHAIN_ID is not a number: {}", chain_id)))?;
        }
        if let Some(addr) = lookup("API_BIND_ADDR").filter(|a| !a.is_empty()) {
            self.api.bind_addr = addr;
        }

        let mut chain_ids: Vec<u64> = self.chains.keys().copied().collect();
        if !chain_ids.contains(&self.default_chain_id) {
            chain_ids.push(self.default_chain_id);
        }
        for chain_id in chain_ids {
            if let Some(rpc_url) = lookup(&format!("RPC_URL_{}", chain_id)).filter(|u| !u.is_empty()) {
                match self.chains.get_mut(&chain_id) {
                    Some(chain) => chain.rpc_url = rpc_url,
                    None => {
                        self.chains.insert(
                            chain_id,
                            ChainConfig {
                                rpc_url,
                                rpc_timeout_secs: default_rpc_timeout_secs(),
                                factory_address: None,
                            },
                        );
                    }
                }
            }
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::Invalid("at least one chain must be configured".into()));
        }
        if !self.chains.contains_key(&self.default_chain_id) {
            return Err(ConfigError::Invalid(format!(
                "default chain {} has no RPC configured",
                self.default_chain_id
            )));
        }
        if self.batch.chunk_size == 0 {
            return Err(ConfigError::Invalid("batch.chunk_size must be positive".into()));
        }
        if self.batch.group_limit == 0 {
            return Err(ConfigError::Invalid("batch.group_limit must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.curve.fee_bps > 10_000 {
            return Err(ConfigError::Invalid(format!("curve.fee_bps {} exceeds 100%", self.curve.fee_bps)));
        }
        self.bind_addr()?;

        if self.environment.is_production() {
            if self.webhook.signing_key.is_none() {
                return Err(ConfigError::Invalid(
                    "webhook.signing_key (ALCHEMY_WEBHOOK_SIGNING_KEY) is required in production".into(),
                ));
            }
            if self.cron.secret.is_none() {
                return Err(ConfigError::Invalid("cron.secret (CRON_SECRET) is required in production".into()));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.api
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("api.bind_addr is not a socket address: {}", self.api.bind_addr)))
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert(
            80002,
            ChainConfig {
                rpc_url: "https://rpc-amoy.polygon.technology".to_string(),
                rpc_timeout_secs: default_rpc_timeout_secs(),
                factory_address: None,
            },
        );

        Self {
            environment: Environment::Development,
            api: ApiConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            chains,
            default_chain_id: 80002,
            store: StoreConfig {
                path: Some(PathBuf::from("./data/indexer-store.json")),
            },
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            curve: CurveParams::default(),
            members: MembersConfig::default(),
            webhook: WebhookConfig::default(),
            cron: CronConfig::default(),
        }
    }
}
