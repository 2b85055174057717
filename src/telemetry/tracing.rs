use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Default directives when `RUST_LOG` is unset; `debug` widens both the crate
/// and its dependencies.
pub fn default_directives(debug: bool) -> &'static str {
    if debug {
        "debug,mailora_warmup=debug"
    } else {
        "info,mailora_warmup=info"
    }
}

pub fn init_tracing(debug: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));
    let fmt_layer = fmt::layer().with_target(debug);

    if Registry::default().with(env_filter).with(fmt_layer).try_init().is_err() {
        // already installed (tests, repeated init)
        return;
    }

    // `debug` collides with `tracing::field::debug` inside the macro expansion
    let debug_enabled = debug;
    info!(debug = debug_enabled, "tracing initialized");
}
