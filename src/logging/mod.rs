//! Tracing setup shared by both binaries

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset
pub fn default_directive(log_level: &str) -> String {
    format!("ledger_mirror={},info", log_level)
}

/// Install the global subscriber. `RUST_LOG` overrides `log_level`; a
/// `log_format` of `json` switches to one JSON object per line.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    let fmt_layer = match log_format {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer().boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_parses() {
        let directive = default_directive("debug");
        assert_eq!(directive, "ledger_mirror=debug,info");
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
