use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const PIPELINE_TOTAL: &str = "rasterslot_pipeline_total";
pub const PIPELINE_MS: &str = "rasterslot_pipeline_ms";
pub const PIPELINE_INFLIGHT: &str = "rasterslot_pipeline_inflight";
pub const SLOT_PUBLISH_TOTAL: &str = "rasterslot_slot_publish_total";

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            PIPELINE_TOTAL,
            Unit::Count,
            "Total number of finished pipeline runs, labelled by result."
        );
        describe_histogram!(
            PIPELINE_MS,
            Unit::Milliseconds,
            "Raster, encode and publish latency in milliseconds."
        );
        describe_gauge!(
            PIPELINE_INFLIGHT,
            Unit::Count,
            "Detached pipeline tasks currently in flight."
        );
        describe_counter!(
            SLOT_PUBLISH_TOTAL,
            Unit::Count,
            "Total number of artifacts published into slots."
        );
    });
}
