use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use probe_common::api::QueueStatusResponse;
use probe_common::TestId;

use crate::error::OrchestratorError;
use crate::queue::{
    spawn_queue, CancelResult, FsmSpawner, QueueCommand, QueueHandle, QueueRejection,
    QueueSettings,
};
use crate::status::TestStatus;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEALTH_DEADLINE_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Deadline for one control-plane ask; elapsing surfaces as HTTP 504.
    pub ask_timeout: Duration,
    pub queue: QueueSettings,
    /// Queue restarts tolerated inside `restart_window` before the process
    /// gives up.
    pub max_queue_restarts: usize,
    pub restart_window: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        SupervisorSettings {
            ask_timeout: Duration::from_secs(5),
            queue: QueueSettings::default(),
            max_queue_restarts: 10,
            restart_window: Duration::from_secs(60),
        }
    }
}

enum SupervisorCommand {
    Initialize {
        reply: oneshot::Sender<TestId>,
    },
    Start {
        test_id: TestId,
        bucket: String,
        prefix: Option<String>,
        reply: oneshot::Sender<Result<String, OrchestratorError>>,
    },
    Status {
        test_id: TestId,
        reply: oneshot::Sender<Option<TestStatus>>,
    },
    QueueStatus {
        reply: oneshot::Sender<QueueStatusResponse>,
    },
    Cancel {
        test_id: TestId,
        reply: oneshot::Sender<CancelResult>,
    },
}

/// Control-plane entry point; cheap to clone into every HTTP handler.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
    ask_timeout: Duration,
}

impl SupervisorHandle {
    async fn ask<T>(
        &self,
        command: SupervisorCommand,
        response: oneshot::Receiver<T>,
    ) -> Result<T, OrchestratorError> {
        self.tx.send(command).await.map_err(|_| {
            OrchestratorError::ServiceUnavailable("supervisor is not running".to_string())
        })?;
        match timeout(self.ask_timeout, response).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(OrchestratorError::ServiceUnavailable(
                "request dropped, likely during a queue restart".to_string(),
            )),
            Err(_) => Err(OrchestratorError::ServiceTimeout("supervisor")),
        }
    }

    /// Pure allocation of a fresh TestId; schedules nothing.
    pub async fn initialize(&self) -> Result<TestId, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.ask(SupervisorCommand::Initialize { reply }, response)
            .await
    }

    pub async fn start(
        &self,
        test_id: TestId,
        bucket: String,
        prefix: Option<String>,
    ) -> Result<String, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.ask(
            SupervisorCommand::Start {
                test_id,
                bucket,
                prefix,
                reply,
            },
            response,
        )
        .await?
    }

    pub async fn status(&self, test_id: TestId) -> Result<Option<TestStatus>, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.ask(SupervisorCommand::Status { test_id, reply }, response)
            .await
    }

    pub async fn queue_status(&self) -> Result<QueueStatusResponse, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.ask(SupervisorCommand::QueueStatus { reply }, response)
            .await
    }

    pub async fn cancel(&self, test_id: TestId) -> Result<CancelResult, OrchestratorError> {
        let (reply, response) = oneshot::channel();
        self.ask(SupervisorCommand::Cancel { test_id, reply }, response)
            .await
    }
}

/// Spawn the root supervisor: constructs the queue, owns its crash-restart
/// policy, and answers the control plane.
pub async fn spawn_supervisor(
    spawner: Arc<dyn FsmSpawner>,
    settings: SupervisorSettings,
    health: Option<HealthRegistry>,
) -> SupervisorHandle {
    let (tx, rx) = mpsc::channel(64);

    let supervisor_health = match &health {
        Some(registry) => Some(
            registry
                .register(
                    "supervisor".to_string(),
                    time::Duration::seconds(HEALTH_DEADLINE_SECONDS),
                )
                .await,
        ),
        None => None,
    };

    let (queue, queue_join) = respawn_queue(&spawner, &settings, &health).await;

    let supervisor = Supervisor {
        spawner,
        settings,
        health,
        supervisor_health,
        queue,
        queue_join,
        restarts: VecDeque::new(),
    };
    tokio::spawn(supervisor.run(rx));

    SupervisorHandle {
        tx,
        ask_timeout: settings.ask_timeout,
    }
}

async fn respawn_queue(
    spawner: &Arc<dyn FsmSpawner>,
    settings: &SupervisorSettings,
    health: &Option<HealthRegistry>,
) -> (QueueHandle, JoinHandle<()>) {
    let queue_health = match health {
        Some(registry) => Some(
            registry
                .register(
                    "queue".to_string(),
                    time::Duration::seconds(HEALTH_DEADLINE_SECONDS),
                )
                .await,
        ),
        None => None,
    };
    spawn_queue(spawner.clone(), settings.queue, queue_health)
}

enum Turn {
    Command(Option<SupervisorCommand>),
    QueueExited(Option<String>),
    Heartbeat,
}

struct Supervisor {
    spawner: Arc<dyn FsmSpawner>,
    settings: SupervisorSettings,
    health: Option<HealthRegistry>,
    supervisor_health: Option<health::HealthHandle>,
    queue: QueueHandle,
    queue_join: JoinHandle<()>,
    restarts: VecDeque<Instant>,
}

impl Supervisor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<SupervisorCommand>) {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            // Resolve the select before touching self: the queue JoinHandle
            // future borrows it.
            let turn = tokio::select! {
                command = mailbox.recv() => Turn::Command(command),
                result = &mut self.queue_join => Turn::QueueExited(result.err().map(|e| e.to_string())),
                _ = heartbeat.tick() => Turn::Heartbeat,
            };

            match turn {
                Turn::Command(None) => break,
                Turn::Command(Some(command)) => self.handle(command).await,
                Turn::QueueExited(error) => {
                    match error {
                        None => info!("queue stopped"),
                        Some(e) => warn!("queue crashed: {}", e),
                    }
                    if !self.restart_queue().await {
                        error!(
                            "queue restart budget exceeded ({} in {:?}), stopping the process",
                            self.settings.max_queue_restarts, self.settings.restart_window
                        );
                        std::process::exit(1);
                    }
                }
                Turn::Heartbeat => {
                    if let Some(handle) = &self.supervisor_health {
                        handle.report_healthy().await;
                    }
                }
            }
        }
    }

    /// Restart the queue with empty state. Returns false once the bounded
    /// restart budget is exhausted.
    async fn restart_queue(&mut self) -> bool {
        let now = Instant::now();
        while self
            .restarts
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.settings.restart_window)
        {
            self.restarts.pop_front();
        }
        if self.restarts.len() >= self.settings.max_queue_restarts {
            return false;
        }

        self.restarts.push_back(now);
        counter!("probe_queue_restarts_total").increment(1);
        warn!("restarting the admission queue; pending submissions are lost");
        let (queue, queue_join) = respawn_queue(&self.spawner, &self.settings, &self.health).await;
        self.queue = queue;
        self.queue_join = queue_join;
        true
    }

    async fn handle(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Initialize { reply } => {
                let test_id = TestId::generate();
                counter!("probe_tests_initialized_total").increment(1);
                info!(test_id = %test_id, "initialized test");
                let _ = reply.send(test_id);
            }
            SupervisorCommand::Start {
                test_id,
                bucket,
                prefix,
                reply,
            } => {
                let (queue_reply, queue_response) = oneshot::channel();
                let sent = self
                    .queue
                    .send(QueueCommand::Enqueue {
                        test_id,
                        bucket,
                        prefix,
                        reply: queue_reply,
                    })
                    .await;
                if !sent {
                    drop(reply.send(Err(OrchestratorError::ServiceUnavailable(
                        "queue is not running".to_string(),
                    ))));
                    return;
                }
                // Map the queue's answer off-loop so the supervisor stays
                // responsive while the queue dispatches.
                tokio::spawn(async move {
                    let result = match queue_response.await {
                        Ok(Ok(())) => Ok("test accepted for execution".to_string()),
                        Ok(Err(QueueRejection::CapacityExceeded)) => Err(
                            OrchestratorError::ServiceUnavailable("queue is full".to_string()),
                        ),
                        Ok(Err(QueueRejection::Duplicate)) => {
                            Err(OrchestratorError::ServiceUnavailable(
                                "test is already queued or running".to_string(),
                            ))
                        }
                        Err(_) => Err(OrchestratorError::ServiceUnavailable(
                            "queue dropped the submission".to_string(),
                        )),
                    };
                    drop(reply.send(result));
                });
            }
            SupervisorCommand::Status { test_id, reply } => {
                // A dropped reply surfaces as ServiceUnavailable to the caller
                let _ = self.queue.send(QueueCommand::Status { test_id, reply }).await;
            }
            SupervisorCommand::QueueStatus { reply } => {
                let _ = self.queue.send(QueueCommand::Snapshot { reply }).await;
            }
            SupervisorCommand::Cancel { test_id, reply } => {
                let _ = self.queue.send(QueueCommand::Cancel { test_id, reply }).await;
            }
        }
    }
}
