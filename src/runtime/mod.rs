//! Stream plumbing around the decoder.
//!
//! - `buffer`: receive buffer implementing the decoder's `ByteSource`
//! - `session`: buffer + decoder + counters for one byte stream
//! - `mio_impl`: readiness-based listener for mirrored traffic
//! - `replay`: offline decoding of a captured byte stream

pub mod buffer;
#[cfg(unix)]
mod mio_impl;
pub mod replay;
pub mod session;

pub use session::{Session, SessionOptions, SessionStats};

use crate::config::Config;

/// Run the listener with the platform's readiness backend.
pub fn run(config: Config) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        mio_impl::run(config)
    }

    #[cfg(not(unix))]
    {
        let _ = config;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unsupported platform: only Unix targets are supported",
        ))
    }
}
