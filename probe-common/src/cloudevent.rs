use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// CloudEvents 1.0 envelope carried as the Kafka message key. The
/// `correlationid` extension is the sole lookup dimension for consumed
/// events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: String,
    pub subject: String,
    pub datacontenttype: String,
    pub correlationid: String,
    pub payloadversion: String,
    pub time_epoch_micro_source: Option<i64>,
}

impl CloudEvent {
    pub fn new(
        source: &str,
        event_type: &str,
        subject: &str,
        correlationid: &str,
        payloadversion: &str,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        CloudEvent {
            id: Uuid::now_v7().to_string(),
            source: source.to_string(),
            specversion: "1.0".to_string(),
            event_type: event_type.to_string(),
            time: now
                .format(&Rfc3339)
                .unwrap_or_else(|_| now.unix_timestamp().to_string()),
            subject: subject.to_string(),
            datacontenttype: "application/json".to_string(),
            correlationid: correlationid.to_string(),
            payloadversion: payloadversion.to_string(),
            time_epoch_micro_source: Some(
                (now.unix_timestamp_nanos() / 1_000) as i64,
            ),
        }
    }

    /// Whether this event matches an `(eventType, payloadVersion)` filter.
    pub fn matches(&self, event_type: &str, payload_version: &str) -> bool {
        self.event_type == event_type && self.payloadversion == payload_version
    }
}
