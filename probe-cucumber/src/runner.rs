use std::path::PathBuf;

use cucumber::writer::{self, Ext as _};
use cucumber::World as _;
use tracing::{info, warn};

use probe_common::report::{self, ReportSummary};

use crate::dsl::{self, DslContext};
use crate::error::RunnerError;
use crate::world::{warn_unknown_glue, ProbeWorld};

/// File name of the JSON report inside the evidence directory.
pub const REPORT_FILE_NAME: &str = "cucumber-report.json";

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub feature_root: PathBuf,
    pub glue_packages: Vec<String>,
    pub tags: Option<String>,
    pub evidence_dir: PathBuf,
}

/// Terminal result of one run. Scenario failures are a result, not an
/// error; `RunnerError` is reserved for the runner itself breaking.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub passed: bool,
    pub summary: ReportSummary,
    pub report_path: PathBuf,
}

/// Execute the feature tree synchronously on a dedicated blocking thread.
/// Scenarios run one at a time (the registry is shared state) and the JSON
/// report is always parsed for the outcome.
pub async fn run(context: DslContext, request: RunRequest) -> Result<RunResult, RunnerError> {
    dsl::install(context);
    let joined = tokio::task::spawn_blocking(move || run_blocking(request)).await;
    dsl::clear();

    match joined {
        Ok(result) => result,
        Err(join_error) => Err(RunnerError::Execution(format!(
            "runner thread panicked: {}",
            join_error
        ))),
    }
}

fn run_blocking(request: RunRequest) -> Result<RunResult, RunnerError> {
    warn_unknown_glue(&request.glue_packages);

    std::fs::create_dir_all(&request.evidence_dir)?;
    let report_path = request.evidence_dir.join(REPORT_FILE_NAME);
    let report_file = std::fs::File::create(&report_path)?;

    let tag_filter = request.tags.clone();
    let feature_root = request.feature_root.clone();

    // The runner owns its own single-threaded runtime; step code reaches the
    // main runtime's streams through channels, so blocking here is safe.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        ProbeWorld::cucumber()
            .max_concurrent_scenarios(1)
            .with_writer(writer::Json::new(report_file).normalized())
            .filter_run(feature_root, move |_feature, _rule, scenario| {
                match &tag_filter {
                    None => true,
                    Some(expr) => tag_matches(expr, &scenario.tags),
                }
            })
            .await;
    });

    let report_bytes = std::fs::read(&report_path)?;
    let features = report::parse_report(&report_bytes)?;
    let summary = report::summarize(&features);

    let passed = summary.scenarios_failed == 0;
    if passed {
        info!(
            passed = summary.scenarios_passed,
            other = summary.scenarios_other,
            "cucumber run passed"
        );
    } else {
        warn!(
            passed = summary.scenarios_passed,
            failed = summary.scenarios_failed,
            "cucumber run failed"
        );
    }

    Ok(RunResult {
        passed,
        summary,
        report_path,
    })
}

/// Match a directive tag filter (`@smoke`, or a comma/space separated list,
/// any-of semantics) against a scenario's tags.
fn tag_matches(expression: &str, scenario_tags: &[String]) -> bool {
    expression
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_start_matches('@'))
        .any(|wanted| scenario_tags.iter().any(|have| have == wanted))
}
