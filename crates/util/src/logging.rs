// SPDX-License-Identifier: PolyForm-Shield-1.0

use tracing_subscriber::EnvFilter;

/// install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example
/// `"info"` or `"serving=debug,info"`) is used. calling this twice is
/// harmless, the second call is ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
