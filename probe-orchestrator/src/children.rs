use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use probe_common::{BlockStorageDirective, KafkaSecurityDirective, TestId, TopicDirective, TopicRole};
use probe_cucumber::runner::{RunRequest, RunResult};
use probe_cucumber::DslContext;
use probe_rosetta::CredentialAssembler;
use probe_storage::TestWorkspace;
use probe_streaming::consumer::{spawn_consumer, ConsumerStreamConfig};
use probe_streaming::producer::{spawn_producer, ProducerStreamConfig};
use probe_streaming::StreamingRegistry;

/// Failure reported by a child worker, carrying the machine-readable error
/// kind the status surface exposes.
#[derive(Debug, Clone)]
pub struct ChildError {
    pub kind: String,
    pub message: String,
}

impl ChildError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ChildError {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ChildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A fetched and validated test package, materialized in the workspace.
#[derive(Debug)]
pub struct FetchedTestPackage {
    pub directive: BlockStorageDirective,
    pub feature_root: PathBuf,
    pub evidence_dir: PathBuf,
}

#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn fetch(
        &self,
        bucket: &str,
        workspace: &TestWorkspace,
    ) -> Result<FetchedTestPackage, ChildError>;

    async fn upload(&self, bucket: &str, evidence_dir: &Path) -> Result<usize, ChildError>;
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Exactly one security directive per topic directive, same order.
    async fn security_directives(
        &self,
        directives: &[TopicDirective],
    ) -> Result<Vec<KafkaSecurityDirective>, ChildError>;
}

#[async_trait]
pub trait StreamProvisioner: Send + Sync {
    async fn bring_up(
        &self,
        test_id: TestId,
        directives: &[TopicDirective],
        security: &[KafkaSecurityDirective],
    ) -> Result<(), ChildError>;

    /// Unregister and stop every stream of the test. Infallible: teardown
    /// always completes.
    async fn tear_down(&self, test_id: TestId);
}

#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run(
        &self,
        test_id: TestId,
        package: &FetchedTestPackage,
    ) -> Result<RunResult, ChildError>;
}

/// The child workers one test execution drives, behind trait seams so the
/// FSM can be exercised with fakes.
#[derive(Clone)]
pub struct TestChildren {
    pub store: Arc<dyn PackageStore>,
    pub credentials: Arc<dyn CredentialSource>,
    pub streams: Arc<dyn StreamProvisioner>,
    pub runner: Arc<dyn ScenarioRunner>,
}

// --- production implementations ---

pub struct BlockStorageChild {
    pub directive_file_name: String,
}

#[async_trait]
impl PackageStore for BlockStorageChild {
    async fn fetch(
        &self,
        bucket: &str,
        workspace: &TestWorkspace,
    ) -> Result<FetchedTestPackage, ChildError> {
        let package = probe_storage::fetch_package(bucket, &self.directive_file_name, workspace)
            .await
            .map_err(|e| ChildError::new(e.kind(), e.to_string()))?;
        Ok(FetchedTestPackage {
            directive: package.directive,
            feature_root: package.feature_root,
            evidence_dir: package.evidence_dir,
        })
    }

    async fn upload(&self, bucket: &str, evidence_dir: &Path) -> Result<usize, ChildError> {
        probe_storage::upload_evidence(bucket, evidence_dir)
            .await
            .map_err(|e| ChildError::new(e.kind(), e.to_string()))
    }
}

pub struct VaultChild {
    pub assembler: CredentialAssembler,
}

#[async_trait]
impl CredentialSource for VaultChild {
    async fn security_directives(
        &self,
        directives: &[TopicDirective],
    ) -> Result<Vec<KafkaSecurityDirective>, ChildError> {
        let mut security = Vec::with_capacity(directives.len());
        for directive in directives {
            let assembled = self
                .assembler
                .assemble(directive)
                .await
                .map_err(|e| ChildError::new(e.kind(), e.to_string()))?;
            security.push(assembled);
        }
        Ok(security)
    }
}

pub struct KafkaStreamProvisioner {
    pub registry: StreamingRegistry,
    pub default_bootstrap_servers: String,
    pub producer_message_timeout_ms: u32,
    pub producer_linger_ms: u32,
}

impl KafkaStreamProvisioner {
    fn security_for<'a>(
        security: &'a [KafkaSecurityDirective],
        directive: &TopicDirective,
    ) -> Result<&'a KafkaSecurityDirective, ChildError> {
        security
            .iter()
            .find(|s| s.topic == directive.topic && s.role == directive.role)
            .ok_or_else(|| {
                ChildError::new(
                    "VaultMapping",
                    format!(
                        "no security directive for topic {} role {}",
                        directive.topic, directive.role
                    ),
                )
            })
    }
}

#[async_trait]
impl StreamProvisioner for KafkaStreamProvisioner {
    async fn bring_up(
        &self,
        test_id: TestId,
        directives: &[TopicDirective],
        security: &[KafkaSecurityDirective],
    ) -> Result<(), ChildError> {
        for directive in directives {
            let security = Self::security_for(security, directive)?;
            let bootstrap_servers = directive
                .bootstrap_servers
                .clone()
                .unwrap_or_else(|| self.default_bootstrap_servers.clone());

            match directive.role {
                TopicRole::Producer => {
                    let handle = spawn_producer(
                        directive.topic.clone(),
                        ProducerStreamConfig {
                            bootstrap_servers,
                            security: security.clone(),
                            message_timeout_ms: self.producer_message_timeout_ms,
                            linger_ms: self.producer_linger_ms,
                        },
                    )
                    .map_err(|e| ChildError::new(e.kind(), e.to_string()))?;
                    self.registry.register_producer(test_id, handle);
                }
                TopicRole::Consumer => {
                    let handle = spawn_consumer(
                        directive.topic.clone(),
                        ConsumerStreamConfig {
                            bootstrap_servers,
                            security: security.clone(),
                            group_id: format!("test-probe-{}", test_id),
                            event_filters: directive.event_filters.clone(),
                        },
                    )
                    .map_err(|e| ChildError::new(e.kind(), e.to_string()))?;
                    self.registry.register_consumer(test_id, handle);
                }
            }
        }

        info!(test_id = %test_id, streams = directives.len(), "kafka streams up");
        Ok(())
    }

    async fn tear_down(&self, test_id: TestId) {
        let (producers, consumers) = self.registry.remove_test(test_id);
        for producer in producers {
            producer.stop().await;
        }
        for consumer in consumers {
            consumer.stop().await;
        }
        info!(test_id = %test_id, "kafka streams released");
    }
}

pub struct CucumberChild {
    pub registry: StreamingRegistry,
    pub event_source: String,
    pub ask_timeout: Duration,
}

#[async_trait]
impl ScenarioRunner for CucumberChild {
    async fn run(
        &self,
        test_id: TestId,
        package: &FetchedTestPackage,
    ) -> Result<RunResult, ChildError> {
        let context = DslContext {
            test_id,
            registry: self.registry.clone(),
            event_source: self.event_source.clone(),
            ask_timeout: self.ask_timeout,
        };
        let request = RunRequest {
            feature_root: package.feature_root.clone(),
            glue_packages: package.directive.user_glue_packages.clone(),
            tags: package.directive.tags.clone(),
            evidence_dir: package.evidence_dir.clone(),
        };

        probe_cucumber::run(context, request).await.map_err(|e| {
            error!(test_id = %test_id, "cucumber run errored: {}", e);
            ChildError::new(e.kind(), e.to_string())
        })
    }
}
