//! Tracing subscriber setup for the `wisp` binary.
//!
//! `RUST_LOG` controls the level, `info` when unset. Logs go to stderr so
//! stdout only carries command output.

use tracing_subscriber::EnvFilter;

pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
