//! Tracing setup
//!
//! Logs go to stderr without ANSI colors. The filter comes from
//! `SQL_PREVIEW_LOG_LEVEL`, then `RUST_LOG`, then a crate-level `info`
//! default. Set `LOG_FORMAT=json` for JSON lines.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "sql_preview_daemon=info,sql_connectors=info";

/// Build the filter from an explicit level, `RUST_LOG`, or the default
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    if let Some(level) = level {
        // A bare level ("debug") applies to our crates only
        let directives = if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("sql_preview_daemon={0},sql_connectors={0}", level)
        };
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter(level));

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_level_scoped_to_crates() {
        let filter = env_filter(Some("debug"));
        let rendered = filter.to_string();
        assert!(rendered.contains("sql_preview_daemon=debug"));
        assert!(rendered.contains("sql_connectors=debug"));
    }

    #[test]
    fn test_full_directive_passthrough() {
        let filter = env_filter(Some("warn,sql_preview_daemon=trace"));
        assert!(filter.to_string().contains("sql_preview_daemon=trace"));
    }
}
