use cucumber::gherkin::Step;
use cucumber::{given, then, when, World};
use tracing::warn;

use probe_streaming::consumer::ConsumedRecord;

use crate::dsl;

/// Glue modules compiled into this binary. `userGluePackages` entries are
/// matched against these names; unknown entries are logged and skipped
/// since step definitions cannot be loaded at runtime.
pub const GLUE_MODULES: &[&str] = &["events", "correlation"];

pub fn warn_unknown_glue(requested: &[String]) {
    for package in requested {
        if !GLUE_MODULES.contains(&package.as_str()) {
            warn!(
                package = %package,
                "glue package has no compiled-in step module and will be ignored"
            );
        }
    }
}

/// Shared state across the steps of one scenario. Scenarios run one at a
/// time so there is never more than one live world driving the registry.
#[derive(Debug, Default, World)]
pub struct ProbeWorld {
    last_correlation: Option<String>,
    last_fetched: Option<ConsumedRecord>,
}

// --- glue module "events" ---

#[given(expr = "the test streams are ready")]
fn streams_ready(_world: &mut ProbeWorld) {
    // The runner only starts once Loaded is reached; this step documents
    // the precondition in feature files.
}

#[when(expr = "an event of type {word} version {word} with correlation {word} is produced to {word}")]
fn produce_event(
    world: &mut ProbeWorld,
    step: &Step,
    event_type: String,
    payload_version: String,
    correlation_id: String,
    topic: String,
) {
    let payload = step
        .docstring()
        .map(|raw| serde_json::from_str(raw).expect("step docstring is not valid JSON"))
        .unwrap_or_else(|| serde_json::json!({}));

    dsl::produce_blocking(&topic, &event_type, &payload_version, &correlation_id, &payload)
        .expect("failed to produce event");
    world.last_correlation = Some(correlation_id);
}

// --- glue module "correlation" ---

#[then(expr = "an event with correlation {word} is consumed from {word}")]
fn consume_event(world: &mut ProbeWorld, correlation_id: String, topic: String) {
    let record = dsl::fetch_blocking(&topic, &correlation_id, dsl::ask_timeout())
        .expect("fetch failed")
        .unwrap_or_else(|| {
            panic!(
                "no event with correlation {} arrived on {} in time",
                correlation_id, topic
            )
        });
    world.last_correlation = Some(correlation_id);
    world.last_fetched = Some(record);
}

#[then(expr = "no event with correlation {word} is consumed from {word}")]
fn no_event_consumed(_world: &mut ProbeWorld, correlation_id: String, topic: String) {
    let record = dsl::fetch_blocking(&topic, &correlation_id, std::time::Duration::ZERO)
        .expect("fetch failed");
    assert!(
        record.is_none(),
        "unexpected event with correlation {} on {}",
        correlation_id,
        topic
    );
}

#[then(expr = "the consumed payload contains {string}")]
fn consumed_payload_contains(world: &mut ProbeWorld, needle: String) {
    let record = world
        .last_fetched
        .as_ref()
        .expect("no event was consumed in this scenario");
    let payload = String::from_utf8_lossy(&record.value);
    assert!(
        payload.contains(&needle),
        "payload {} does not contain {}",
        payload,
        needle
    );
}
