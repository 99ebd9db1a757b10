use prost::Message;

use probe_common::CloudEvent;

/// Protobuf full name registered for the CloudEvent key message.
pub const CLOUD_EVENT_FULL_NAME: &str = "io.probe.v1.CloudEvent";

/// Wire message for CloudEvent keys on protobuf topics. Field numbers are
/// part of the registered schema; do not renumber.
#[derive(Clone, PartialEq, Message)]
pub struct CloudEventRecord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub specversion: String,
    #[prost(string, tag = "4")]
    pub event_type: String,
    #[prost(string, tag = "5")]
    pub time: String,
    #[prost(string, tag = "6")]
    pub subject: String,
    #[prost(string, tag = "7")]
    pub datacontenttype: String,
    #[prost(string, tag = "8")]
    pub correlationid: String,
    #[prost(string, tag = "9")]
    pub payloadversion: String,
    #[prost(int64, optional, tag = "10")]
    pub time_epoch_micro_source: Option<i64>,
}

impl From<&CloudEvent> for CloudEventRecord {
    fn from(event: &CloudEvent) -> Self {
        CloudEventRecord {
            id: event.id.clone(),
            source: event.source.clone(),
            specversion: event.specversion.clone(),
            event_type: event.event_type.clone(),
            time: event.time.clone(),
            subject: event.subject.clone(),
            datacontenttype: event.datacontenttype.clone(),
            correlationid: event.correlationid.clone(),
            payloadversion: event.payloadversion.clone(),
            time_epoch_micro_source: event.time_epoch_micro_source,
        }
    }
}

impl From<CloudEventRecord> for CloudEvent {
    fn from(record: CloudEventRecord) -> Self {
        CloudEvent {
            id: record.id,
            source: record.source,
            specversion: record.specversion,
            event_type: record.event_type,
            time: record.time,
            subject: record.subject,
            datacontenttype: record.datacontenttype,
            correlationid: record.correlationid,
            payloadversion: record.payloadversion,
            time_epoch_micro_source: record.time_epoch_micro_source,
        }
    }
}
