use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use probe_common::api::{TestState, TestStatusResponse};
use probe_common::TestId;

/// Mutable per-test status the FSM publishes on every transition and the
/// queue keeps in history after the FSM is gone.
#[derive(Debug, Clone)]
pub struct TestStatus {
    pub test_id: TestId,
    pub state: TestState,
    pub success: Option<bool>,
    /// Machine-readable error kind from the error table.
    pub error: Option<String>,
    /// Human-readable account of the terminal condition.
    pub message: Option<String>,
    pub scenarios_passed: Option<u32>,
    pub scenarios_failed: Option<u32>,
    pub evidence_path: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub cancel_requested: bool,
}

impl TestStatus {
    pub fn new(test_id: TestId, state: TestState) -> Self {
        TestStatus {
            test_id,
            state,
            success: None,
            error: None,
            message: None,
            scenarios_passed: None,
            scenarios_failed: None,
            evidence_path: None,
            started_at: None,
            completed_at: None,
            cancel_requested: false,
        }
    }

    pub fn to_response(&self) -> TestStatusResponse {
        let format = |t: &OffsetDateTime| t.format(&Rfc3339).ok();
        TestStatusResponse {
            test_id: self.test_id,
            state: self.state,
            success: self.success,
            error: self.error.clone(),
            scenarios_passed: self.scenarios_passed,
            scenarios_failed: self.scenarios_failed,
            evidence_path: self.evidence_path.clone(),
            started_at: self.started_at.as_ref().and_then(format),
            completed_at: self.completed_at.as_ref().and_then(format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carries_terminal_fields() {
        let mut status = TestStatus::new(TestId::generate(), TestState::Completed);
        status.success = Some(true);
        status.scenarios_passed = Some(3);
        status.scenarios_failed = Some(0);
        status.started_at = Some(OffsetDateTime::now_utc());
        status.completed_at = Some(OffsetDateTime::now_utc());

        let response = status.to_response();
        assert_eq!(response.state, TestState::Completed);
        assert_eq!(response.success, Some(true));
        assert_eq!(response.scenarios_passed, Some(3));
        assert!(response.started_at.is_some());
        assert!(response.completed_at.is_some());
    }
}
