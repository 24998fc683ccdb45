//! Logging sink construction.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

const TRANSCRIPT_DIRECTIVE: &str = "dap_client::transcript=trace";

/// `EnvFilter` directives for `settings`. `RUST_LOG` is not consulted here.
#[must_use]
pub fn filter_directives(settings: &LogSettings) -> String {
    let mut directives = match &settings.filter {
        Some(filter) => filter.clone(),
        None if settings.info => "info".to_string(),
        None if settings.errors => "warn".to_string(),
        None if settings.exceptions => "error".to_string(),
        None => "off".to_string(),
    };
    if settings.transcript {
        directives.push(',');
        directives.push_str(TRANSCRIPT_DIRECTIVE);
    }
    directives
}

/// Build a stderr `fmt` subscriber for `settings`, to be handed to the
/// client through `ClientOptions::dispatch`. `RUST_LOG` overrides the settings.
#[must_use]
pub fn dispatch(settings: &LogSettings) -> Dispatch {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(settings)));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    Dispatch::new(subscriber)
}
