use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Workspace crates that default to `debug`; everything else stays at
/// `info` unless `RUST_LOG` overrides the whole filter.
const APP_CRATES: &[&str] = &["hearth_shared", "hearth_session", "hearth_resources"];

fn default_filter() -> EnvFilter {
    let directives = APP_CRATES
        .iter()
        .map(|name| format!("{name}=debug"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("info,{directives}"))
}

/// Install the global tracing subscriber.
///
/// Development output is human-readable with source locations;
/// `HEARTH_ENV=production` switches to JSON lines for log shipping.
pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let is_production = std::env::var("HEARTH_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    if is_production {
        let json_layer = tracing_subscriber::fmt::layer().json().with_target(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    tracing::info!(service = service_name, "tracing initialized");
}
