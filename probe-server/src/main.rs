//! Process entry point: load configuration, wire the children, spawn the
//! supervisor, and serve the control plane until SIGTERM/SIGINT.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::{eyre, Result, WrapErr};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use health::HealthRegistry;
use probe_common::metrics::setup_metrics_routes;
use probe_common::validator::validate_bootstrap_servers;
use probe_orchestrator::children::{
    BlockStorageChild, CucumberChild, KafkaStreamProvisioner, VaultChild,
};
use probe_orchestrator::queue::{ProductionFsmSpawner, QueueSettings};
use probe_orchestrator::supervisor::SupervisorSettings;
use probe_orchestrator::{router, spawn_supervisor, AppState, FsmTimers, TestChildren};
use probe_rosetta::{CredentialAssembler, OauthDefaults, RosettaConfig, VaultClient, VaultProvider};
use probe_streaming::StreamingRegistry;

mod config;

use config::Config;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down gracefully...");
}

fn build_vault_client(config: &Config) -> Result<VaultClient> {
    let provider = VaultProvider::from_str(&config.vault.vault_provider)
        .map_err(|e| eyre!("invalid vault provider: {}", e))?;

    if provider == VaultProvider::Local {
        let fixture = match &config.vault.vault_local_fixture_path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .wrap_err_with(|| format!("failed to read vault fixture {}", path))?;
                serde_json::from_slice(&bytes)
                    .wrap_err_with(|| format!("vault fixture {} is not JSON", path))?
            }
            None => serde_json::json!({}),
        };
        return Ok(VaultClient::local(fixture));
    }

    VaultClient::new(
        provider,
        config.vault.vault_endpoint.clone(),
        config.vault.vault_request_timeout_ms.0,
    )
    .map_err(|e| eyre!("failed to build vault client: {}", e))
}

fn load_rosetta_config(config: &Config) -> Result<RosettaConfig> {
    match &config.vault.vault_rosetta_config_path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .wrap_err_with(|| format!("failed to read rosetta config {}", path))?;
            RosettaConfig::from_slice(&bytes)
                .wrap_err_with(|| format!("rosetta config {} does not parse", path))
        }
        None => Ok(config::default_rosetta_config()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    // Fail fast on a malformed default cluster
    validate_bootstrap_servers(Some(&config.kafka.kafka_bootstrap_servers))
        .map_err(|e| eyre!("KAFKA_BOOTSTRAP_SERVERS: {}", e))?;

    probe_streaming::serde::init_schema_registry(&config.schema_registry_url);

    let registry = StreamingRegistry::new();
    let liveness = HealthRegistry::new("liveness");

    let assembler = CredentialAssembler::new(
        build_vault_client(&config)?,
        load_rosetta_config(&config)?,
        OauthDefaults {
            token_endpoint: config.oauth.oauth_token_endpoint.clone(),
            scope: config.oauth.oauth_scope.clone(),
        },
        HashMap::new(),
    );

    let children = TestChildren {
        store: Arc::new(BlockStorageChild {
            directive_file_name: config.storage.directive_file_name.clone(),
        }),
        credentials: Arc::new(VaultChild { assembler }),
        streams: Arc::new(KafkaStreamProvisioner {
            registry: registry.clone(),
            default_bootstrap_servers: config.kafka.kafka_bootstrap_servers.clone(),
            producer_message_timeout_ms: config.kafka.kafka_message_timeout_ms,
            producer_linger_ms: config.kafka.kafka_producer_linger_ms,
        }),
        runner: Arc::new(CucumberChild {
            registry,
            event_source: config.actor_system_name.clone(),
            ask_timeout: config.dsl_ask_timeout_ms.0,
        }),
    };

    let spawner = Arc::new(ProductionFsmSpawner {
        children,
        timers: FsmTimers {
            setup: config.timers.setup_state_timeout_ms.0,
            loading: config.timers.loading_state_timeout_ms.0,
            completed: config.timers.completed_state_timeout_ms.0,
            exception: config.timers.exception_state_timeout_ms.0,
            shutting_down: config.timers.shutdown_state_timeout_ms.0,
        },
        stash_capacity: config.queue.stash_capacity,
    });

    let supervisor = spawn_supervisor(
        spawner,
        SupervisorSettings {
            ask_timeout: config.ask_timeout_ms.0,
            queue: QueueSettings {
                capacity: config.queue.queue_capacity,
                history_capacity: config.queue.history_capacity,
            },
            ..Default::default()
        },
        Some(liveness.clone()),
    )
    .await;

    let app = router(AppState {
        supervisor,
        health: liveness,
        actor_system_name: config.actor_system_name.clone(),
    });
    let app = setup_metrics_routes(app)
        .layer(TimeoutLayer::new(config.http_request_timeout_ms.0))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests));

    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .wrap_err("failed to bind control-plane listener")?;
    tracing::info!(
        "{} listening on {}",
        config.actor_system_name,
        config.bind()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await
        .wrap_err("control-plane server failed")?;

    Ok(())
}
