//! Subscriber setup for the `escrowd` binary.
//!
//! Filter comes from `RUST_LOG` (default `info`). `ESCROW_LOG_FORMAT` picks
//! `json`, `compact` or `pretty`; the older `ESCROW_LOG_JSON=1` still selects
//! JSON. Everything goes to stderr so stdout carries only command output.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    Json,
    #[default]
    Compact,
    Pretty,
}

impl LogFormat {
    /// Resolve from the raw `ESCROW_LOG_FORMAT` and `ESCROW_LOG_JSON` values.
    /// An unrecognised format name falls back to compact.
    pub fn from_env_values(format: Option<&str>, legacy_json: Option<&str>) -> Self {
        match format.map(|f| f.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => Self::Json,
            Some("pretty") => Self::Pretty,
            Some("compact") => Self::Compact,
            _ if legacy_json == Some("1") => Self::Json,
            _ => Self::Compact,
        }
    }

    pub fn from_env() -> Self {
        let format = std::env::var("ESCROW_LOG_FORMAT").ok();
        let legacy = std::env::var("ESCROW_LOG_JSON").ok();
        Self::from_env_values(format.as_deref(), legacy.as_deref())
    }
}

/// Install the global subscriber with the format from the environment.
/// A second call is a no-op.
pub fn init_logging() {
    init_logging_with(LogFormat::from_env());
}

pub fn init_logging_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Compact => builder.compact().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(LogFormat::from_env_values(Some("json"), None), LogFormat::Json);
        assert_eq!(LogFormat::from_env_values(Some(" Pretty "), None), LogFormat::Pretty);
        assert_eq!(LogFormat::from_env_values(Some("compact"), Some("1")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_values(Some("xml"), None), LogFormat::Compact);
    }

    #[test]
    fn test_legacy_json_flag() {
        assert_eq!(LogFormat::from_env_values(None, Some("1")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_values(None, Some("0")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_values(None, None), LogFormat::Compact);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging_with(LogFormat::Compact);
        init_logging_with(LogFormat::Json);
    }
}
