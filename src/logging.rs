use env_logger::{Builder, Env};

/// `info` by default; `RUST_LOG` overrides (e.g. `RUST_LOG=kioskflow=debug`).
pub fn init() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
