use crate::{FormatFlavor, LoggingConfig};
use tracing_core::Subscriber;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::fmt::format::Format;
use tracing_subscriber::fmt::{FormatFields, layer as fmt_layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{Layer, Registry};

/// Boxes the given formatted layer behind the timestamp choice and the
/// per-target filter. Dropping the timer changes the layer type, hence the
/// macro.
macro_rules! finish {
    ($layer:expr, $config:expr, $targets:expr) => {{
        let layer = apply_display($layer, $config);

        if $config.show_timestamp() {
            Box::new(layer.with_filter($targets))
        } else {
            Box::new(layer.without_time().with_filter($targets))
        }
    }};
}

/// Creates a formatted [`Layer`] as described by the given
/// [`LoggingConfig`], filtered by its root and per-target verbosity.
pub fn make_layer<S>(config: impl AsRef<LoggingConfig>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let config = config.as_ref();
    let targets = make_targets(config);

    match config.flavor() {
        FormatFlavor::Full => finish!(fmt_layer::<S>(), config, targets),
        FormatFlavor::Compact => finish!(fmt_layer::<S>().compact(), config, targets),
        FormatFlavor::Pretty => finish!(fmt_layer::<S>().pretty(), config, targets),
        #[cfg(feature = "json")]
        FormatFlavor::Json => finish!(fmt_layer::<S>().json(), config, targets),
    }
}

/// Installs the layer described by the given [`LoggingConfig`] as the global
/// default subscriber. Fails if a global subscriber is already installed.
pub fn init(config: impl AsRef<LoggingConfig>) -> Result<(), TryInitError> {
    Registry::default().with(make_layer(config)).try_init()
}

/// Applies the metadata choices of the given config to a formatted layer.
fn apply_display<S, N, L, T, W>(
    mut layer: FmtLayer<S, N, Format<L, T>, W>,
    config: &LoggingConfig,
) -> FmtLayer<S, N, Format<L, T>, W>
where
    N: for<'writer> FormatFields<'writer> + 'static,
{
    #[allow(unused_mut)]
    let mut color = config.color();

    #[cfg(feature = "json")]
    if config.flavor() == FormatFlavor::Json {
        color = false;
    }

    if !color {
        layer = layer.with_ansi(false);
    }

    layer
        .with_target(config.show_target())
        .with_file(config.show_file())
        .with_line_number(config.show_line_number())
        .with_level(config.show_level())
        .with_thread_ids(config.show_thread_id())
}

fn make_targets(config: &LoggingConfig) -> Targets {
    Targets::new()
        .with_default(config.verbosity())
        .with_targets(config.targets().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Verbosity;

    fn emit_through(config: &LoggingConfig) {
        let subscriber = Registry::default().with(make_layer(config));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(client = "test", "Visible at the default verbosity");
            tracing::debug!(client = "test", "Filtered out at the default verbosity");
        });
    }

    #[test]
    fn every_flavor_builds() {
        for flavor in [FormatFlavor::Full, FormatFlavor::Compact, FormatFlavor::Pretty] {
            emit_through(&LoggingConfig::default().with_flavor(flavor));
        }
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_flavor_builds() {
        emit_through(&LoggingConfig::default().with_flavor(FormatFlavor::Json));
    }

    #[test]
    fn builds_without_timestamp_or_color() {
        let config = serde_yml::from_str::<LoggingConfig>(
            "show_timestamp: false\ncolor: false\nverbosity: trace",
        )
        .unwrap();

        emit_through(&config);
    }

    #[test]
    fn targets_carry_overrides() {
        // Given
        let config = LoggingConfig::default()
            .with_verbosity(Verbosity::Warn)
            .with_target("tether", Verbosity::Debug);

        // When
        let targets = make_targets(&config);

        // Then
        assert!(targets.would_enable("tether::client", &tracing_core::Level::DEBUG));
        assert!(!targets.would_enable("lapin", &tracing_core::Level::INFO));
        assert!(targets.would_enable("lapin", &tracing_core::Level::WARN));
    }
}
