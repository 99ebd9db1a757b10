pub mod api;
pub mod cloudevent;
pub mod directive;
pub mod metrics;
pub mod report;
pub mod test_id;
pub mod validator;

pub use cloudevent::CloudEvent;
pub use directive::{
    BlockStorageDirective, KafkaSecurityDirective, OauthBearerConfig, SecurityProtocol,
    TopicDirective, TopicRole,
};
pub use test_id::TestId;
