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

const DEBUG_DIRECTIVE: &str = "tidemark=debug";

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = build_filter(logging)?;

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

fn build_filter(logging: &LoggingSettings) -> Result<EnvFilter, InfraError> {
    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    if !logging.debug {
        return Ok(filter);
    }

    let directive = DEBUG_DIRECTIVE
        .parse()
        .map_err(|err| InfraError::telemetry(format!("invalid debug directive: {err}")))?;
    Ok(filter.add_directive(directive))
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tidemark_transition_cache_hit_total",
            Unit::Count,
            "Next-transition lookups answered from the per-request cache."
        );
        describe_counter!(
            "tidemark_transition_cache_miss_total",
            Unit::Count,
            "Next-transition lookups that had to query the content store."
        );
        describe_counter!(
            "tidemark_batch_events_total",
            Unit::Count,
            "Transition events processed by the batch runner."
        );
        describe_counter!(
            "tidemark_batch_errors_total",
            Unit::Count,
            "Transition events whose processing failed."
        );
        describe_counter!(
            "tidemark_batch_runs_total",
            Unit::Count,
            "Batch runs, labelled by outcome."
        );
        describe_histogram!(
            "tidemark_batch_duration_ms",
            Unit::Milliseconds,
            "Wall-clock duration of one batch run."
        );
        describe_counter!(
            "tidemark_tags_flushed_total",
            Unit::Count,
            "Cache tags handed to the purge sink."
        );
    });
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn debug_toggle_adds_crate_directive() {
        let logging = LoggingSettings {
            level: LevelFilter::WARN,
            format: LogFormat::Compact,
            debug: true,
        };
        let filter = build_filter(&logging).expect("filter");
        assert!(filter.to_string().contains(DEBUG_DIRECTIVE));
    }

    #[test]
    fn plain_level_has_no_crate_directive() {
        let logging = LoggingSettings {
            level: LevelFilter::INFO,
            format: LogFormat::Json,
            debug: false,
        };
        let filter = build_filter(&logging).expect("filter");
        assert!(!filter.to_string().contains(DEBUG_DIRECTIVE));
    }
}
