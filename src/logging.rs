// Logging initialisation.
//
// Structured logs go to stdout and to `./logs/mission-control.log`.
// The level comes from `RUST_LOG` (default `info`, noisy crates at `warn`).
//
//   RUST_LOG=debug                     everything, including claim conflicts
//   RUST_LOG=info,mission_control=debug  engine internals only

use tracing_appender::non_blocking;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Install the global subscriber. Keep the returned guard alive for the whole
// program or buffered file output is lost.
pub fn init() -> non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never("./logs", "mission-control.log");
    let (file_writer, guard) = non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,sqlx=warn,hyper=warn,tower=warn,h2=warn,reqwest=warn")
    });

    let stdout_layer = fmt::layer().with_target(true).with_ansi(true);

    // no ANSI escapes in the file
    let file_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
