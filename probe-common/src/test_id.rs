use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique identifier for one test invocation, allocated by
/// Initialize and used as the partition key for all per-test state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(Uuid);

impl TestId {
    /// Allocate a fresh id. Time-ordered so queue history sorts naturally.
    pub fn generate() -> Self {
        TestId(Uuid::now_v7())
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TestId(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::TestId;

    #[test]
    fn generate_returns_distinct_ids() {
        let a = TestId::generate();
        let b = TestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_display() {
        let id = TestId::generate();
        let parsed = TestId::from_str(&id.to_string()).expect("failed to parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!(TestId::from_str("not-a-test-id").is_err());
    }
}
