//! Console logging for Xcom-CAN tools
//!
//! Output format: `2025-12-02T00:50:44.809123Z [INFO] message`.
//! `RUST_LOG` overrides the level passed to [`init`].

use std::sync::OnceLock;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::{Result, XcomError};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter writing `timestamp [LEVEL] message`
pub struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    let spec = std::env::var("RUST_LOG")
        .ok()
        .filter(|spec| !spec.trim().is_empty())
        .unwrap_or_else(|| level.to_string());
    EnvFilter::try_new(&spec)
        .map_err(|e| XcomError::config(format!("Invalid log filter '{spec}': {e}")))
}

/// Install the global console subscriber
///
/// `level` is a level name (`debug`) or a full filter (`info,xcom_can=trace`).
pub fn init(level: &str) -> Result<()> {
    let filter = build_filter(level)?;
    let (reload_filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(
            fmt::layer()
                .with_ansi(true)
                .event_format(BracketedLevelFormat),
        )
        .try_init()
        .map_err(|e| XcomError::config(format!("Logging already initialized: {e}")))?;

    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Change the active filter after [`init`]
pub fn set_log_level(level: &str) -> Result<()> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| XcomError::config("Logging not initialized"))?;
    let filter = EnvFilter::try_new(level)
        .map_err(|e| XcomError::config(format!("Invalid log level '{level}': {e}")))?;
    handle
        .reload(filter)
        .map_err(|e| XcomError::config(format!("Failed to reload log filter: {e}")))
}
