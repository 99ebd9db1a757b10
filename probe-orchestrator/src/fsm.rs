use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use probe_common::api::TestState;
use probe_common::{KafkaSecurityDirective, TestId};
use probe_cucumber::runner::RunResult;
use probe_storage::TestWorkspace;

use crate::children::{ChildError, FetchedTestPackage, TestChildren};
use crate::status::TestStatus;

const MAILBOX_CAPACITY: usize = 32;

/// Wall-clock deadlines per state. Testing has no timer of its own; the
/// scenario run is bounded by the Kafka and step timeouts inside it.
#[derive(Debug, Clone, Copy)]
pub struct FsmTimers {
    pub setup: Duration,
    pub loading: Duration,
    pub completed: Duration,
    pub exception: Duration,
    pub shutting_down: Duration,
}

impl Default for FsmTimers {
    fn default() -> Self {
        FsmTimers {
            setup: Duration::from_secs(30),
            loading: Duration::from_secs(120),
            completed: Duration::from_secs(60),
            exception: Duration::from_secs(60),
            shutting_down: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancel recorded; the test is shutting down.
    Accepted,
    /// The test already reached a terminal stretch; nothing to cancel.
    Noop,
}

#[derive(Debug)]
pub enum FsmCommand {
    Start {
        bucket: String,
        prefix: Option<String>,
    },
    Cancel {
        reply: oneshot::Sender<CancelOutcome>,
    },
}

#[derive(Debug)]
enum FsmEvent {
    PackageFetched(FetchedTestPackage),
    SecurityReady(Vec<KafkaSecurityDirective>),
    StreamsReady,
    Execute,
    RunFinished(RunResult),
    ChildFailed(ChildError),
    UploadFinished(usize),
    UploadFailed(ChildError),
    ChildrenStopped,
}

#[derive(Debug)]
enum FsmMsg {
    Command(FsmCommand),
    Event(FsmEvent),
}

/// The serial chain inside Loading: package, then credentials, then streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadingPhase {
    FetchingPackage,
    FetchingCredentials,
    StartingStreams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Setup,
    Loading(LoadingPhase),
    Loaded,
    Testing,
    Completed,
    Exception,
    ShuttingDown,
    Stopped,
}

impl State {
    fn as_test_state(&self) -> TestState {
        match self {
            State::Setup => TestState::Setup,
            State::Loading(_) => TestState::Loading,
            State::Loaded => TestState::Loaded,
            State::Testing => TestState::Testing,
            State::Completed => TestState::Completed,
            State::Exception => TestState::Exception,
            State::ShuttingDown => TestState::ShuttingDown,
            State::Stopped => TestState::Stopped,
        }
    }
}

/// Sent to the queue when the FSM reaches Stopped.
#[derive(Debug)]
pub struct TerminalReport {
    pub test_id: TestId,
    pub status: TestStatus,
}

/// Cheap-clone handle to one test execution FSM.
#[derive(Clone)]
pub struct FsmHandle {
    pub test_id: TestId,
    tx: mpsc::Sender<FsmMsg>,
    status_rx: watch::Receiver<TestStatus>,
}

impl FsmHandle {
    /// Snapshot of the latest published status; never blocks on the FSM.
    pub fn status(&self) -> TestStatus {
        self.status_rx.borrow().clone()
    }

    pub async fn start(&self, bucket: String, prefix: Option<String>) -> bool {
        self.tx
            .send(FsmMsg::Command(FsmCommand::Start { bucket, prefix }))
            .await
            .is_ok()
    }

    pub async fn cancel(&self) -> CancelOutcome {
        let (reply, response) = oneshot::channel();
        if self
            .tx
            .send(FsmMsg::Command(FsmCommand::Cancel { reply }))
            .await
            .is_err()
        {
            return CancelOutcome::Noop;
        }
        response.await.unwrap_or(CancelOutcome::Noop)
    }
}

/// Spawn the per-test state machine. It owns its children, its scratch
/// workspace, and its streams; everything is released before the terminal
/// report reaches the queue.
pub fn spawn_fsm(
    test_id: TestId,
    children: TestChildren,
    timers: FsmTimers,
    stash_capacity: usize,
    terminal_tx: mpsc::Sender<TerminalReport>,
) -> FsmHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let initial = TestStatus::new(test_id, TestState::Setup);
    let (status_tx, status_rx) = watch::channel(initial.clone());

    let execution = TestExecution {
        test_id,
        children,
        timers,
        stash_capacity,
        stash: Vec::new(),
        replay: Vec::new(),
        state: State::Setup,
        status: initial,
        status_tx,
        self_tx: tx.clone(),
        terminal_tx,
        workspace: None,
        package: None,
        security: None,
        bucket: None,
        // The Setup clock starts ticking at spawn, before Start arrives
        deadline: Some(Instant::now() + timers.setup),
        terminal_state: None,
    };
    tokio::spawn(execution.run(rx));

    FsmHandle {
        test_id,
        tx,
        status_rx,
    }
}

struct TestExecution {
    test_id: TestId,
    children: TestChildren,
    timers: FsmTimers,
    stash_capacity: usize,
    /// Commands deferred while still in Setup, replayed in order on the
    /// first transition out of it.
    stash: Vec<FsmMsg>,
    replay: Vec<FsmMsg>,
    state: State,
    status: TestStatus,
    status_tx: watch::Sender<TestStatus>,
    self_tx: mpsc::Sender<FsmMsg>,
    terminal_tx: mpsc::Sender<TerminalReport>,
    workspace: Option<Arc<TestWorkspace>>,
    package: Option<Arc<FetchedTestPackage>>,
    security: Option<Vec<KafkaSecurityDirective>>,
    bucket: Option<String>,
    deadline: Option<Instant>,
    /// Completed or Exception, recorded so the terminal report keeps the
    /// outcome after the FSM walks through ShuttingDown and Stopped.
    terminal_state: Option<TestState>,
}

impl TestExecution {
    async fn run(mut self, mut mailbox: mpsc::Receiver<FsmMsg>) {
        loop {
            let message = match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        message = mailbox.recv() => message,
                        _ = tokio::time::sleep_until(deadline) => {
                            self.on_state_timeout();
                            while let Some(replayed) = self.take_replayed() {
                                self.handle(replayed);
                            }
                            if self.state == State::Stopped {
                                break;
                            }
                            continue;
                        }
                    }
                }
                None => mailbox.recv().await,
            };

            // The owner dropped us; release everything and leave.
            let Some(message) = message else {
                self.workspace = None;
                break;
            };

            self.handle(message);
            while let Some(replayed) = self.take_replayed() {
                self.handle(replayed);
            }

            if self.state == State::Stopped {
                break;
            }
        }
    }

    fn take_replayed(&mut self) -> Option<FsmMsg> {
        if self.replay.is_empty() {
            None
        } else {
            Some(self.replay.remove(0))
        }
    }

    fn handle(&mut self, message: FsmMsg) {
        match message {
            FsmMsg::Command(command) => self.handle_command(command),
            FsmMsg::Event(event) => self.handle_event(event),
        }
    }

    fn handle_command(&mut self, command: FsmCommand) {
        match command {
            FsmCommand::Start { bucket, prefix } => match self.state {
                State::Setup => self.on_start(bucket, prefix),
                _ => warn!(test_id = %self.test_id, "ignoring duplicate Start"),
            },
            FsmCommand::Cancel { reply } => {
                let outcome = match self.state {
                    State::Completed
                    | State::Exception
                    | State::ShuttingDown
                    | State::Stopped => CancelOutcome::Noop,
                    _ => CancelOutcome::Accepted,
                };
                let _ = reply.send(outcome);
                if outcome == CancelOutcome::Accepted {
                    info!(test_id = %self.test_id, "cancel requested, shutting down");
                    self.status.cancel_requested = true;
                    self.status.message = Some("cancelled by request".to_string());
                    self.transition(State::ShuttingDown);
                }
            }
        }
    }

    fn handle_event(&mut self, event: FsmEvent) {
        match (self.state, event) {
            // Commands raced ahead of Setup completing; defer them.
            (State::Setup, event) => self.stash(FsmMsg::Event(event)),

            (State::Loading(LoadingPhase::FetchingPackage), FsmEvent::PackageFetched(package)) => {
                self.package = Some(Arc::new(package));
                self.transition(State::Loading(LoadingPhase::FetchingCredentials));
            }
            (State::Loading(LoadingPhase::FetchingCredentials), FsmEvent::SecurityReady(security)) => {
                self.security = Some(security);
                self.transition(State::Loading(LoadingPhase::StartingStreams));
            }
            (State::Loading(LoadingPhase::StartingStreams), FsmEvent::StreamsReady) => {
                self.transition(State::Loaded);
            }
            (State::Loaded, FsmEvent::Execute) => {
                self.transition(State::Testing);
            }
            (State::Testing, FsmEvent::RunFinished(result)) => {
                self.status.scenarios_passed = Some(result.summary.scenarios_passed);
                self.status.scenarios_failed = Some(result.summary.scenarios_failed);
                self.status.success = Some(result.passed);
                if !result.passed {
                    // The test itself failed: terminal-expected, not Exception
                    self.status.error = Some("CucumberFail".to_string());
                    self.status.message = Some(format!(
                        "{} scenario(s) failed",
                        result.summary.scenarios_failed
                    ));
                }
                self.transition(State::Completed);
            }
            (State::Loading(_) | State::Loaded | State::Testing, FsmEvent::ChildFailed(error)) => {
                self.fail(error);
            }
            (State::Completed | State::Exception, FsmEvent::UploadFinished(files)) => {
                if files > 0 {
                    if let Some(bucket) = &self.bucket {
                        self.status.evidence_path = Some(format!("{}/evidence", bucket));
                    }
                }
                self.transition(State::ShuttingDown);
            }
            (State::Completed | State::Exception, FsmEvent::UploadFailed(error)) => {
                warn!(test_id = %self.test_id, "evidence upload failed: {}", error);
                if self.status.error.is_none() {
                    self.status.error = Some(error.kind);
                    self.status.message = Some(error.message);
                }
                self.transition(State::ShuttingDown);
            }
            (State::ShuttingDown, FsmEvent::ChildrenStopped) => {
                self.transition(State::Stopped);
            }
            // I/O that completed after the state moved on; drop it.
            (state, event) => {
                debug!(test_id = %self.test_id, ?state, ?event, "ignoring stale message")
            }
        }
    }

    fn on_start(&mut self, bucket: String, prefix: Option<String>) {
        self.status.started_at = Some(time::OffsetDateTime::now_utc());
        let bucket = match prefix {
            Some(prefix) => format!(
                "{}/{}",
                bucket.trim_end_matches('/'),
                prefix.trim_matches('/')
            ),
            None => bucket,
        };
        self.bucket = Some(bucket);

        match TestWorkspace::create() {
            Ok(workspace) => {
                self.workspace = Some(Arc::new(workspace));
                self.transition(State::Loading(LoadingPhase::FetchingPackage));
            }
            Err(e) => {
                self.fail(ChildError::new(
                    "WorkspaceCreate",
                    format!("failed to create scratch workspace: {}", e),
                ));
            }
        }
    }

    fn fail(&mut self, error: ChildError) {
        warn!(test_id = %self.test_id, "test failed: {}", error);
        self.status.success = Some(false);
        self.status.error = Some(error.kind);
        self.status.message = Some(error.message);
        self.transition(State::Exception);
    }

    fn stash(&mut self, message: FsmMsg) {
        if self.stash.len() >= self.stash_capacity {
            self.fail(ChildError::new(
                "BackpressureExceeded",
                format!("stash buffer overflow at {} messages", self.stash_capacity),
            ));
            return;
        }
        debug!(test_id = %self.test_id, "stashing message until Setup completes");
        self.stash.push(message);
    }

    fn transition(&mut self, next: State) {
        let leaving_setup = self.state == State::Setup && next != State::Setup;
        debug!(test_id = %self.test_id, from = ?self.state, to = ?next, "state transition");
        counter!(
            "probe_fsm_transitions_total",
            "to" => next.as_test_state().to_string()
        )
        .increment(1);

        self.state = next;
        self.status.state = next.as_test_state();
        self.deadline = self.deadline_for(next);

        match next {
            State::Setup => {}
            State::Loading(LoadingPhase::FetchingPackage) => self.spawn_fetch(),
            State::Loading(LoadingPhase::FetchingCredentials) => self.spawn_vault(),
            State::Loading(LoadingPhase::StartingStreams) => self.spawn_streams(),
            State::Loaded => self.send_self(FsmEvent::Execute),
            State::Testing => self.spawn_runner(),
            State::Completed | State::Exception => {
                self.terminal_state = Some(next.as_test_state());
                self.status.completed_at = Some(time::OffsetDateTime::now_utc());
                self.spawn_upload();
            }
            State::ShuttingDown => self.spawn_teardown(),
            State::Stopped => {
                // Workspace (and with it the scratch tree) goes before the
                // terminal report: completion implies release.
                self.workspace = None;
                self.status.state = self.terminal_state.unwrap_or(TestState::Stopped);
                let report = TerminalReport {
                    test_id: self.test_id,
                    status: self.status.clone(),
                };
                let terminal_tx = self.terminal_tx.clone();
                tokio::spawn(async move {
                    drop(terminal_tx.send(report).await);
                });
                info!(test_id = %self.test_id, "test execution stopped");
            }
        }

        drop(self.status_tx.send(self.status.clone()));

        if leaving_setup && !self.stash.is_empty() {
            self.replay.append(&mut self.stash);
        }
    }

    fn deadline_for(&self, state: State) -> Option<Instant> {
        let timeout = match state {
            State::Setup => Some(self.timers.setup),
            State::Loading(_) => Some(self.timers.loading),
            State::Loaded | State::Testing => None,
            State::Completed => Some(self.timers.completed),
            State::Exception => Some(self.timers.exception),
            State::ShuttingDown => Some(self.timers.shutting_down),
            State::Stopped => None,
        };
        timeout.map(|t| Instant::now() + t)
    }

    fn on_state_timeout(&mut self) {
        match self.state {
            State::Setup | State::Loading(_) | State::Loaded => {
                self.fail(ChildError::new(
                    "StateTimeout",
                    format!("{} deadline elapsed", self.status.state),
                ));
            }
            State::Completed | State::Exception => {
                warn!(test_id = %self.test_id, "evidence upload deadline elapsed, abandoning");
                if self.status.error.is_none() {
                    self.status.error = Some("UploadTimeout".to_string());
                }
                self.transition(State::ShuttingDown);
            }
            State::ShuttingDown => {
                warn!(test_id = %self.test_id, "child teardown deadline elapsed, forcing stop");
                self.transition(State::Stopped);
            }
            State::Testing | State::Stopped => {}
        }
    }

    fn send_self(&self, event: FsmEvent) {
        if let Err(e) = self.self_tx.try_send(FsmMsg::Event(event)) {
            // Mailbox full: fall back to an async send off-loop
            let tx = self.self_tx.clone();
            if let tokio::sync::mpsc::error::TrySendError::Full(message) = e {
                tokio::spawn(async move {
                    drop(tx.send(message).await);
                });
            }
        }
    }

    fn spawn_fetch(&self) {
        let store = self.children.store.clone();
        let tx = self.self_tx.clone();
        let bucket = self.bucket.clone().unwrap_or_default();
        let Some(workspace) = self.workspace.clone() else {
            self.send_self(FsmEvent::ChildFailed(ChildError::new(
                "WorkspaceCreate",
                "workspace missing before fetch",
            )));
            return;
        };
        tokio::spawn(async move {
            let event = match store.fetch(&bucket, &workspace).await {
                Ok(package) => FsmEvent::PackageFetched(package),
                Err(error) => FsmEvent::ChildFailed(error),
            };
            drop(tx.send(FsmMsg::Event(event)).await);
        });
    }

    fn spawn_vault(&self) {
        let credentials = self.children.credentials.clone();
        let tx = self.self_tx.clone();
        let Some(package) = self.package.clone() else {
            return;
        };
        tokio::spawn(async move {
            let event = match credentials
                .security_directives(&package.directive.topic_directives)
                .await
            {
                Ok(security) => FsmEvent::SecurityReady(security),
                Err(error) => FsmEvent::ChildFailed(error),
            };
            drop(tx.send(FsmMsg::Event(event)).await);
        });
    }

    fn spawn_streams(&self) {
        let streams = self.children.streams.clone();
        let tx = self.self_tx.clone();
        let test_id = self.test_id;
        let (Some(package), Some(security)) = (self.package.clone(), self.security.clone())
        else {
            return;
        };
        tokio::spawn(async move {
            let event = match streams
                .bring_up(test_id, &package.directive.topic_directives, &security)
                .await
            {
                Ok(()) => FsmEvent::StreamsReady,
                Err(error) => FsmEvent::ChildFailed(error),
            };
            drop(tx.send(FsmMsg::Event(event)).await);
        });
    }

    fn spawn_runner(&self) {
        let runner = self.children.runner.clone();
        let tx = self.self_tx.clone();
        let test_id = self.test_id;
        let Some(package) = self.package.clone() else {
            return;
        };
        tokio::spawn(async move {
            let event = match runner.run(test_id, &package).await {
                Ok(result) => FsmEvent::RunFinished(result),
                Err(error) => FsmEvent::ChildFailed(error),
            };
            drop(tx.send(FsmMsg::Event(event)).await);
        });
    }

    fn spawn_upload(&self) {
        let store = self.children.store.clone();
        let tx = self.self_tx.clone();
        let bucket = self.bucket.clone();
        let evidence_dir = self.package.as_ref().map(|p| p.evidence_dir.clone());
        tokio::spawn(async move {
            let event = match (bucket, evidence_dir) {
                (Some(bucket), Some(evidence_dir)) => {
                    match store.upload(&bucket, &evidence_dir).await {
                        Ok(files) => FsmEvent::UploadFinished(files),
                        Err(error) => FsmEvent::UploadFailed(error),
                    }
                }
                // Nothing was fetched; there is no evidence to move.
                _ => FsmEvent::UploadFinished(0),
            };
            drop(tx.send(FsmMsg::Event(event)).await);
        });
    }

    fn spawn_teardown(&self) {
        let streams = self.children.streams.clone();
        let tx = self.self_tx.clone();
        let test_id = self.test_id;
        tokio::spawn(async move {
            streams.tear_down(test_id).await;
            drop(tx.send(FsmMsg::Event(FsmEvent::ChildrenStopped)).await);
        });
    }
}
