use std::fmt;

use serde::{Deserialize, Serialize};

use crate::test_id::TestId;

/// Lifecycle state of a test as observed through the control plane. The
/// first seven are the execution FSM's states; `Queued` and `Unknown` only
/// exist in status answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestState {
    Setup,
    Loading,
    Loaded,
    Testing,
    Completed,
    Exception,
    ShuttingDown,
    Stopped,
    Queued,
    Unknown,
}

impl TestState {
    /// Non-terminal states hold resources; at most one test may be in any
    /// of them at a time.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            TestState::Completed
                | TestState::Exception
                | TestState::Stopped
                | TestState::Queued
                | TestState::Unknown
        )
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestState::Setup => "Setup",
            TestState::Loading => "Loading",
            TestState::Loaded => "Loaded",
            TestState::Testing => "Testing",
            TestState::Completed => "Completed",
            TestState::Exception => "Exception",
            TestState::ShuttingDown => "ShuttingDown",
            TestState::Stopped => "Stopped",
            TestState::Queued => "Queued",
            TestState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

// Wire shapes for the control plane. Field names below are exactly what
// goes on the wire; conversion from the internal camelCase names happens
// only here, in the serde annotations.

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "actorSystem")]
    pub actor_system: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct InitializeResponse {
    #[serde(rename = "test-id")]
    pub test_id: TestId,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(rename = "test-id")]
    pub test_id: TestId,
    #[serde(rename = "block-storage-path")]
    pub block_storage_path: String,
    #[serde(rename = "test-type", default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(rename = "test-id")]
    pub test_id: TestId,
    pub accepted: bool,
    #[serde(rename = "test-type", skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatusResponse {
    #[serde(rename = "test-id")]
    pub test_id: TestId,
    pub state: TestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "scenarios-passed", skip_serializing_if = "Option::is_none")]
    pub scenarios_passed: Option<u32>,
    #[serde(rename = "scenarios-failed", skip_serializing_if = "Option::is_none")]
    pub scenarios_failed: Option<u32>,
    #[serde(rename = "evidence-path", skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
    #[serde(rename = "started-at", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(rename = "completed-at", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl TestStatusResponse {
    pub fn unknown(test_id: TestId) -> Self {
        TestStatusResponse {
            test_id,
            state: TestState::Unknown,
            success: None,
            error: None,
            scenarios_passed: None,
            scenarios_failed: None,
            evidence_path: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    #[serde(rename = "test-id")]
    pub test_id: TestId,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    #[serde(rename = "totalTests")]
    pub total_tests: u32,
    #[serde(rename = "setupCount")]
    pub setup_count: u32,
    #[serde(rename = "loadingCount")]
    pub loading_count: u32,
    #[serde(rename = "loadedCount")]
    pub loaded_count: u32,
    #[serde(rename = "testingCount")]
    pub testing_count: u32,
    #[serde(rename = "completedCount")]
    pub completed_count: u32,
    #[serde(rename = "exceptionCount")]
    pub exception_count: u32,
    #[serde(rename = "currentlyTesting", skip_serializing_if = "Option::is_none")]
    pub currently_testing: Option<TestId>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn start_request_uses_kebab_case_on_the_wire() {
        let body = r#"{
            "test-id": "0190b5a8-7a3e-7cc1-8f30-2e0d5a3b7f11",
            "block-storage-path": "s3://bucket/prefix",
            "test-type": "functional"
        }"#;
        let request: StartRequest = serde_json::from_str(body).expect("failed to decode");
        assert_eq!(request.block_storage_path, "s3://bucket/prefix");
        assert_eq!(request.test_type.as_deref(), Some("functional"));
    }

    #[test]
    fn status_response_omits_unset_fields() {
        let test_id = TestId::from_str("0190b5a8-7a3e-7cc1-8f30-2e0d5a3b7f11").unwrap();
        let json = serde_json::to_value(TestStatusResponse::unknown(test_id)).unwrap();
        assert_eq!(json["state"], "Unknown");
        assert!(json.get("success").is_none());
        assert!(json.get("scenarios-passed").is_none());
    }

    #[test]
    fn queue_status_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(QueueStatusResponse {
            total_tests: 3,
            completed_count: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["totalTests"], 3);
        assert_eq!(json["completedCount"], 2);
        assert!(json.get("currentlyTesting").is_none());
    }

    #[test]
    fn state_renders_fsm_names() {
        assert_eq!(TestState::ShuttingDown.to_string(), "ShuttingDown");
        assert!(TestState::Testing.is_active());
        assert!(!TestState::Completed.is_active());
        assert!(!TestState::Queued.is_active());
    }
}
