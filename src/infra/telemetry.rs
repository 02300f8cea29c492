use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "entity_loader_cache_hit_total",
            Unit::Count,
            "Total number of loader requests served from the TTL cache."
        );
        describe_counter!(
            "entity_loader_cache_miss_total",
            Unit::Count,
            "Total number of loader requests that joined a batch."
        );
        describe_histogram!(
            "entity_loader_batch_size",
            Unit::Count,
            "Distinct keys per bulk fetch."
        );
        describe_histogram!(
            "entity_loader_fetch_ms",
            Unit::Milliseconds,
            "Bulk fetch latency in milliseconds."
        );
        describe_counter!(
            "entity_loader_invalidation_published_total",
            Unit::Count,
            "Total number of invalidation messages published to peers."
        );
        describe_counter!(
            "entity_loader_invalidation_publish_failed_total",
            Unit::Count,
            "Total number of invalidation messages that could not be published."
        );
        describe_counter!(
            "entity_loader_invalidation_received_total",
            Unit::Count,
            "Total number of remote invalidation messages applied."
        );
    });
}
