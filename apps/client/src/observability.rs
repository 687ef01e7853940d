use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

static SESSION_TRACE_ID: OnceLock<String> = OnceLock::new();

/// Logs go to stderr so stdout stays free for the command prompt.
pub fn init_tracing() {
    let env_filter = std::env::var("APP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let json = std::env::var("LOG_FORMAT")
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(env_filter));
    if json {
        let subscriber = builder
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let _ = tracing::subscriber::set_global_default(builder.finish());
    }

    tracing::info!(
        component = "bootstrap",
        trace_id = %trace_id(),
        protocol_version = shared_proto::signaling::PROTOCOL_VERSION,
        "structured tracing initialized"
    );
}

pub fn trace_id() -> &'static str {
    SESSION_TRACE_ID.get_or_init(|| Uuid::new_v4().to_string())
}
