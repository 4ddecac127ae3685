use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use unfurl_core::{ReportContext, TelemetryReporter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter; `json` switches the fmt layer to JSON lines.
pub fn init_telemetry(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "unfurl=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    tracing::debug!(json, "Telemetry initialized");
    Ok(())
}

/// Reports errors as structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl TelemetryReporter for TracingReporter {
    fn report(&self, message: &str, context: &ReportContext) {
        tracing::error!(
            url = context.url.as_deref().unwrap_or_default(),
            key_id = context.key_id.as_deref().unwrap_or_default(),
            provider = context.provider.as_deref().unwrap_or_default(),
            error_code = context.error_code.as_deref().unwrap_or_default(),
            error_body = ?context.error_body,
            "{}",
            message
        );
    }
}
