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

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// When logging is disabled the filter is pinned to `off` and `RUST_LOG` is ignored.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = if logging.disabled {
        EnvFilter::new("off")
    } else {
        EnvFilter::builder()
            .with_default_directive(logging.level.into())
            .from_env_lossy()
    };

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

/// Register descriptions for every metric the server emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "coffee_ssr_cache_hit_total",
            Unit::Count,
            "Total number of render cache hits, labelled by freshness."
        );
        describe_counter!(
            "coffee_ssr_cache_miss_total",
            Unit::Count,
            "Total number of render cache misses."
        );
        describe_counter!(
            "coffee_ssr_cache_cleared_total",
            Unit::Count,
            "Total number of entries removed through cache clears."
        );
        describe_gauge!(
            "coffee_ssr_cache_entries",
            Unit::Count,
            "Current number of rendered pages held in the cache."
        );
        describe_counter!(
            "coffee_ssr_render_error_total",
            Unit::Count,
            "Total number of failed engine renders."
        );
        describe_counter!(
            "coffee_ssr_render_joined_total",
            Unit::Count,
            "Total number of requests that joined an in-flight render."
        );
        describe_histogram!(
            "coffee_ssr_render_ms",
            Unit::Milliseconds,
            "Engine render latency in milliseconds."
        );
        describe_counter!(
            "coffee_ssr_refresh_scheduled_total",
            Unit::Count,
            "Total number of background refreshes handed off."
        );
        describe_counter!(
            "coffee_ssr_refresh_failed_total",
            Unit::Count,
            "Total number of background refreshes dropped or failed."
        );
    });
}
