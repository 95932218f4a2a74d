//! Logging setup
//!
//! Console output in the form `2025-12-02T00:50:44.809123Z [INFO] message`.
//! `RUST_LOG` always wins; otherwise the level follows the settings file:
//! `Troubleshoot >= 1` traces this crate (including hex dumps of every
//! frame), `debug` enables DEBUG, and INFO is the default.

use std::fmt;
use std::io::IsTerminal;

use tracing::Level;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{MeterError, MeterResult};

/// Space-separated upper-case hex, formatted only when the event is emitted.
///
/// ```rust
/// use voltage_meter_logger::HexDump;
///
/// assert_eq!(HexDump(&[0x00, 0x01, 0xAB]).to_string(), "00 01 AB");
/// ```
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// `timestamp [LEVEL] message`
struct BracketedLevelFormat;

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
    ) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(debug: bool, troubleshoot: u8) -> String {
    let base = if debug { "debug" } else { "info" };
    if troubleshoot >= 1 {
        format!("{},{}=trace", base, env!("CARGO_CRATE_NAME"))
    } else {
        base.to_string()
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(debug: bool, troubleshoot: u8) -> MeterResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(debug, troubleshoot)))
        .map_err(|e| MeterError::configuration(format!("Invalid log filter: {}", e)))?;

    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stdout().is_terminal())
        .event_format(BracketedLevelFormat)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
        .map_err(|e| MeterError::internal(format!("Failed to initialize logging: {}", e)))
}
