use serde::Deserialize;
use thiserror::Error;

/// Subset of the Cucumber JSON report format the probe needs to derive a
/// test outcome: features contain elements, scenario elements contain steps,
/// steps carry a result status.
#[derive(Debug, Deserialize)]
pub struct FeatureReport {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub elements: Vec<ElementReport>,
}

#[derive(Debug, Deserialize)]
pub struct ElementReport {
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepReport>,
}

impl ElementReport {
    fn is_scenario(&self) -> bool {
        self.element_type.as_deref() == Some("scenario")
    }
}

#[derive(Debug, Deserialize)]
pub struct StepReport {
    #[serde(default)]
    pub result: Option<StepResult>,
}

#[derive(Debug, Deserialize)]
pub struct StepResult {
    pub status: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub scenarios_passed: u32,
    pub scenarios_failed: u32,
    /// Scenarios that neither passed nor failed: some step was skipped,
    /// undefined, or pending and none failed.
    pub scenarios_other: u32,
}

impl ReportSummary {
    pub fn total(&self) -> u32 {
        self.scenarios_passed + self.scenarios_failed + self.scenarios_other
    }
}

#[derive(Error, Debug)]
#[error("failed to parse cucumber report: {0}")]
pub struct ReportParseError(#[from] serde_json::Error);

pub fn parse_report(bytes: &[u8]) -> Result<Vec<FeatureReport>, ReportParseError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// A scenario passes when every step result is "passed"; it fails when any
/// step result is "failed"; anything else (skipped, undefined, pending)
/// lands in the third bucket.
pub fn summarize(features: &[FeatureReport]) -> ReportSummary {
    let mut summary = ReportSummary::default();

    for element in features
        .iter()
        .flat_map(|f| f.elements.iter())
        .filter(|e| e.is_scenario())
    {
        let statuses: Vec<&str> = element
            .steps
            .iter()
            .map(|s| s.result.as_ref().map_or("undefined", |r| r.status.as_str()))
            .collect();

        if statuses.iter().any(|s| *s == "failed") {
            summary.scenarios_failed += 1;
        } else if statuses.iter().all(|s| *s == "passed") {
            summary.scenarios_passed += 1;
        } else {
            summary.scenarios_other += 1;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(json: serde_json::Value) -> Vec<FeatureReport> {
        parse_report(json.to_string().as_bytes()).expect("failed to parse report")
    }

    #[test]
    fn counts_passed_and_failed_scenarios() {
        let features = report(serde_json::json!([
            {
                "name": "orders",
                "elements": [
                    {
                        "type": "scenario",
                        "name": "happy path",
                        "steps": [
                            {"result": {"status": "passed"}},
                            {"result": {"status": "passed"}}
                        ]
                    },
                    {
                        "type": "scenario",
                        "name": "broken",
                        "steps": [
                            {"result": {"status": "passed"}},
                            {"result": {"status": "failed"}},
                            {"result": {"status": "skipped"}}
                        ]
                    }
                ]
            }
        ]));

        let summary = summarize(&features);
        assert_eq!(summary.scenarios_passed, 1);
        assert_eq!(summary.scenarios_failed, 1);
        assert_eq!(summary.scenarios_other, 0);
    }

    #[test]
    fn skipped_and_undefined_steps_do_not_fail_a_scenario() {
        let features = report(serde_json::json!([
            {
                "elements": [
                    {
                        "type": "scenario",
                        "steps": [
                            {"result": {"status": "passed"}},
                            {"result": {"status": "undefined"}}
                        ]
                    },
                    {
                        "type": "scenario",
                        "steps": [
                            {"result": {"status": "pending"}}
                        ]
                    }
                ]
            }
        ]));

        let summary = summarize(&features);
        assert_eq!(summary.scenarios_passed, 0);
        assert_eq!(summary.scenarios_failed, 0);
        assert_eq!(summary.scenarios_other, 2);
    }

    #[test]
    fn non_scenario_elements_are_ignored() {
        let features = report(serde_json::json!([
            {
                "elements": [
                    {
                        "type": "background",
                        "steps": [{"result": {"status": "failed"}}]
                    },
                    {
                        "type": "scenario",
                        "steps": [{"result": {"status": "passed"}}]
                    }
                ]
            }
        ]));

        let summary = summarize(&features);
        assert_eq!(summary.scenarios_passed, 1);
        assert_eq!(summary.scenarios_failed, 0);
        assert_eq!(summary.total(), 1);
    }

    #[test]
    fn empty_report_summarizes_to_zero() {
        let summary = summarize(&[]);
        assert_eq!(summary, ReportSummary::default());
    }
}
