use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "test-probe")]
    pub actor_system_name: String,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3400")]
    pub port: u16,

    #[envconfig(default = "30000")]
    pub http_request_timeout_ms: EnvMsDuration,

    #[envconfig(default = "64")]
    pub max_concurrent_requests: usize,

    /// Deadline for one supervisor ask from an HTTP handler.
    #[envconfig(default = "5000")]
    pub ask_timeout_ms: EnvMsDuration,

    /// Deadline for one produce/fetch exchange inside step code.
    #[envconfig(default = "10000")]
    pub dsl_ask_timeout_ms: EnvMsDuration,

    pub schema_registry_url: String,

    #[envconfig(nested = true)]
    pub timers: TimerConfig,

    #[envconfig(nested = true)]
    pub queue: QueueConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub vault: VaultConfig,

    #[envconfig(nested = true)]
    pub storage: StorageConfig,

    #[envconfig(nested = true)]
    pub oauth: OauthConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct TimerConfig {
    #[envconfig(default = "30000")]
    pub setup_state_timeout_ms: EnvMsDuration,

    #[envconfig(default = "120000")]
    pub loading_state_timeout_ms: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub completed_state_timeout_ms: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub exception_state_timeout_ms: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub shutdown_state_timeout_ms: EnvMsDuration,
}

#[derive(Envconfig, Clone)]
pub struct QueueConfig {
    #[envconfig(default = "32")]
    pub queue_capacity: usize,

    #[envconfig(default = "256")]
    pub history_capacity: usize,

    #[envconfig(default = "16")]
    pub stash_capacity: usize,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    /// Process-default cluster; per-topic directives may override it.
    pub kafka_bootstrap_servers: String,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "30000")]
    pub kafka_message_timeout_ms: u32,
}

#[derive(Envconfig, Clone)]
pub struct VaultConfig {
    /// One of local, aws-lambda, azure-function, gcp-cloud-function.
    #[envconfig(default = "local")]
    pub vault_provider: String,

    pub vault_endpoint: Option<String>,

    #[envconfig(default = "5000")]
    pub vault_request_timeout_ms: EnvMsDuration,

    /// JSON file holding the Rosetta mapping document; a built-in default
    /// mapping applies when unset.
    pub vault_rosetta_config_path: Option<String>,

    /// Fixture tree served by the local provider.
    pub vault_local_fixture_path: Option<String>,
}

#[derive(Envconfig, Clone)]
pub struct StorageConfig {
    /// Informational: the bucket URI scheme picks the concrete store.
    /// Credentials are ambient (IAM role, workload identity).
    #[envconfig(default = "auto")]
    pub storage_provider: String,

    #[envconfig(default = "topic-directive.yaml")]
    pub directive_file_name: String,
}

#[derive(Envconfig, Clone)]
pub struct OauthConfig {
    pub oauth_token_endpoint: String,

    pub oauth_scope: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// Built-in Rosetta mapping: client id and secret from the conventional
/// vault response shape; token endpoint and scope fall back to the
/// process-wide OAuth settings.
pub fn default_rosetta_config() -> probe_rosetta::RosettaConfig {
    probe_rosetta::RosettaConfig {
        mappings: vec![
            probe_rosetta::FieldMapping {
                target_field: "clientId".to_string(),
                source_path: "$.data.client_id".to_string(),
                transformations: Vec::new(),
                default_value: None,
            },
            probe_rosetta::FieldMapping {
                target_field: "clientSecret".to_string(),
                source_path: "$.data.client_secret".to_string(),
                transformations: Vec::new(),
                default_value: None,
            },
        ],
        request_template: None,
    }
}
