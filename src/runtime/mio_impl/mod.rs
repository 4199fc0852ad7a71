//! mio-based listener implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).

mod event_loop;

use crate::config::Config;

/// Accept mirrored connections and decode their traffic until killed.
pub fn run(config: Config) -> std::io::Result<()> {
    event_loop::run(config)
}
