use once_cell::sync::OnceCell;
use prost::Message;
use schema_registry_converter::async_impl::easy_avro::{EasyAvroDecoder, EasyAvroEncoder};
use schema_registry_converter::async_impl::easy_json::{EasyJsonDecoder, EasyJsonEncoder};
use schema_registry_converter::async_impl::easy_proto_raw::{
    EasyProtoRawDecoder, EasyProtoRawEncoder,
};
use schema_registry_converter::async_impl::schema_registry::{get_schema_by_subject, SrSettings};
use schema_registry_converter::error::SRCError;
use schema_registry_converter::schema_registry_common::{SchemaType, SubjectNameStrategy};
use tracing::debug;

use probe_common::CloudEvent;

use crate::error::SerdeError;
use crate::proto::{CloudEventRecord, CLOUD_EVENT_FULL_NAME};

/// Record name used for CloudEvent keys; the registry subject becomes
/// `{topic}-CloudEvent`.
pub const CLOUD_EVENT_TYPE_NAME: &str = "CloudEvent";

/// Which codec the registry selected for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Avro,
    Protobuf,
    Json,
}

/// Subject naming is fixed to `{topic}-{TypeName}`.
pub fn subject_for(topic: &str, type_name: &str) -> String {
    format!("{}-{}", topic, type_name)
}

/// Pure dispatch: which codec handles a registry schema type.
pub fn codec_for(schema_type: &SchemaType) -> Option<Codec> {
    match schema_type {
        SchemaType::Avro => Some(Codec::Avro),
        SchemaType::Protobuf => Some(Codec::Protobuf),
        SchemaType::Json => Some(Codec::Json),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

struct RegistryCodecs {
    avro_encoder: EasyAvroEncoder,
    avro_decoder: EasyAvroDecoder,
    json_encoder: EasyJsonEncoder,
    json_decoder: EasyJsonDecoder,
    proto_encoder: EasyProtoRawEncoder,
    proto_decoder: EasyProtoRawDecoder,
    settings: SrSettings,
}

/// The registry client is inherently global state: one set of settings and
/// codec caches for the whole process, initialized at startup.
static CODECS: OnceCell<RegistryCodecs> = OnceCell::new();

pub fn init_schema_registry(url: &str) {
    _ = CODECS.get_or_init(|| {
        let settings = SrSettings::new(url.to_string());
        RegistryCodecs {
            avro_encoder: EasyAvroEncoder::new(settings.clone()),
            avro_decoder: EasyAvroDecoder::new(settings.clone()),
            json_encoder: EasyJsonEncoder::new(settings.clone()),
            json_decoder: EasyJsonDecoder::new(settings.clone()),
            proto_encoder: EasyProtoRawEncoder::new(settings.clone()),
            proto_decoder: EasyProtoRawDecoder::new(settings.clone()),
            settings,
        }
    });
}

fn codecs() -> Result<&'static RegistryCodecs, SerdeError> {
    CODECS.get().ok_or(SerdeError::SchemaRegistryNotInitialized)
}

fn registry_error(subject: &str, error: SRCError) -> SerdeError {
    let message = error.to_string();
    if message.contains("404") || message.contains("40401") {
        SerdeError::SchemaNotFound(subject.to_string())
    } else {
        SerdeError::Registry {
            subject: subject.to_string(),
            message,
        }
    }
}

/// One "describe subject" call decides the codec for every serialize and
/// deserialize on that subject.
pub async fn describe_subject(topic: &str, type_name: &str) -> Result<Codec, SerdeError> {
    let codecs = codecs()?;
    let subject = subject_for(topic, type_name);
    let strategy =
        SubjectNameStrategy::TopicRecordNameStrategy(topic.to_string(), type_name.to_string());

    let registered = get_schema_by_subject(&codecs.settings, &strategy)
        .await
        .map_err(|e| registry_error(&subject, e))?;

    debug!(subject = %subject, schema_type = ?registered.schema_type, "described subject");
    codec_for(&registered.schema_type).ok_or_else(|| SerdeError::UnsupportedSchemaType {
        subject,
        schema_type: format!("{:?}", registered.schema_type),
    })
}

/// Serialize a CloudEvent key for a topic, using whichever codec the
/// registry mandates for `{topic}-CloudEvent`.
pub async fn serialize_cloud_event_key(
    topic: &str,
    event: &CloudEvent,
) -> Result<Vec<u8>, SerdeError> {
    let codec = describe_subject(topic, CLOUD_EVENT_TYPE_NAME).await?;
    let codecs = codecs()?;
    let subject = subject_for(topic, CLOUD_EVENT_TYPE_NAME);
    let strategy = SubjectNameStrategy::TopicRecordNameStrategy(
        topic.to_string(),
        CLOUD_EVENT_TYPE_NAME.to_string(),
    );

    match codec {
        Codec::Avro => codecs
            .avro_encoder
            .encode_struct(event, &strategy)
            .await
            .map_err(|e| registry_error(&subject, e)),
        Codec::Json => {
            let value = serde_json::to_value(event)
                .map_err(|e| SerdeError::Encode(e.to_string()))?;
            codecs
                .json_encoder
                .encode(&value, strategy)
                .await
                .map_err(|e| registry_error(&subject, e))
        }
        Codec::Protobuf => {
            let bytes = CloudEventRecord::from(event).encode_to_vec();
            codecs
                .proto_encoder
                .encode(&bytes, CLOUD_EVENT_FULL_NAME, strategy)
                .await
                .map_err(|e| registry_error(&subject, e))
        }
    }
}

/// Inverse of `serialize_cloud_event_key`. The key must round-trip exactly,
/// `correlationid` included: it is the lookup dimension for consumed events.
pub async fn deserialize_cloud_event_key(
    topic: &str,
    bytes: &[u8],
) -> Result<CloudEvent, SerdeError> {
    let codec = describe_subject(topic, CLOUD_EVENT_TYPE_NAME).await?;
    let codecs = codecs()?;

    match codec {
        Codec::Avro => {
            let decoded = codecs
                .avro_decoder
                .decode(Some(bytes))
                .await
                .map_err(|e| SerdeError::Decode(e.to_string()))?;
            apache_avro::from_value::<CloudEvent>(&decoded.value)
                .map_err(|e| SerdeError::Decode(e.to_string()))
        }
        Codec::Json => {
            let decoded = codecs
                .json_decoder
                .decode(Some(bytes))
                .await
                .map_err(|e| SerdeError::Decode(e.to_string()))?
                .ok_or_else(|| SerdeError::Decode("empty key payload".to_string()))?;
            serde_json::from_value(decoded.value)
                .map_err(|e| SerdeError::Decode(e.to_string()))
        }
        Codec::Protobuf => {
            let decoded = codecs
                .proto_decoder
                .decode(Some(bytes))
                .await
                .map_err(|e| SerdeError::Decode(e.to_string()))?
                .ok_or_else(|| SerdeError::Decode("empty key payload".to_string()))?;
            let record = CloudEventRecord::decode(decoded.bytes.as_slice())
                .map_err(|e| SerdeError::Decode(e.to_string()))?;
            Ok(CloudEvent::from(record))
        }
    }
}

/// Serialize an event payload expressed as a JSON tree. Avro and JSON-Schema
/// topics resolve against the registered schema; protobuf payloads must come
/// pre-encoded through `serialize_proto_payload` since a JSON tree carries no
/// field numbers.
pub async fn serialize_event_payload(
    topic: &str,
    type_name: &str,
    value: &serde_json::Value,
) -> Result<Vec<u8>, SerdeError> {
    let codec = describe_subject(topic, type_name).await?;
    let codecs = codecs()?;
    let subject = subject_for(topic, type_name);
    let strategy =
        SubjectNameStrategy::TopicRecordNameStrategy(topic.to_string(), type_name.to_string());

    match codec {
        Codec::Avro => codecs
            .avro_encoder
            .encode_struct(value, &strategy)
            .await
            .map_err(|e| registry_error(&subject, e)),
        Codec::Json => codecs
            .json_encoder
            .encode(value, strategy)
            .await
            .map_err(|e| registry_error(&subject, e)),
        Codec::Protobuf => Err(SerdeError::Encode(format!(
            "subject {} is protobuf; use serialize_proto_payload with message bytes",
            subject
        ))),
    }
}

/// Serialize a pre-encoded protobuf payload under the subject's schema id.
pub async fn serialize_proto_payload(
    topic: &str,
    type_name: &str,
    full_name: &str,
    message_bytes: &[u8],
) -> Result<Vec<u8>, SerdeError> {
    let codec = describe_subject(topic, type_name).await?;
    if codec != Codec::Protobuf {
        return Err(SerdeError::Encode(format!(
            "subject {} is not protobuf",
            subject_for(topic, type_name)
        )));
    }

    let codecs = codecs()?;
    let subject = subject_for(topic, type_name);
    let strategy =
        SubjectNameStrategy::TopicRecordNameStrategy(topic.to_string(), type_name.to_string());
    codecs
        .proto_encoder
        .encode(message_bytes, full_name, strategy)
        .await
        .map_err(|e| registry_error(&subject, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_topic_dash_type_name() {
        assert_eq!(subject_for("t-events", "CloudEvent"), "t-events-CloudEvent");
        assert_eq!(subject_for("orders", "OrderPlaced"), "orders-OrderPlaced");
    }

    #[test]
    fn codec_dispatch_is_schema_type_specific() {
        assert_eq!(codec_for(&SchemaType::Avro), Some(Codec::Avro));
        assert_eq!(codec_for(&SchemaType::Protobuf), Some(Codec::Protobuf));
        assert_eq!(codec_for(&SchemaType::Json), Some(Codec::Json));
    }

    #[tokio::test]
    async fn uninitialized_registry_is_an_error() {
        // CODECS is process-wide; this test must run before any init in this
        // binary, which holds because nothing in this test target calls
        // init_schema_registry.
        let result = describe_subject("t", CLOUD_EVENT_TYPE_NAME).await;
        assert!(matches!(
            result,
            Err(SerdeError::SchemaRegistryNotInitialized)
        ));
    }
}
