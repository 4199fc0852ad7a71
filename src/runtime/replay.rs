//! Offline replay of a captured byte stream.
//!
//! The capture is read in `read_buffer_size` chunks through a single
//! session, exactly as a socket would deliver it, so chunk boundaries fall
//! anywhere inside values.

use crate::config::Config;
use crate::protocols::resp::{DecodeError, Value};
use crate::runtime::session::{log_value, Session, SessionOptions, SessionStats};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{info, warn};

/// Connection id used in logs for replayed streams.
const REPLAY_CONN_ID: usize = 0;

/// Replay failure.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read capture: {0}")]
    Io(#[from] io::Error),
    #[error("decode failed near byte {offset}: {source}")]
    Decode { offset: u64, source: DecodeError },
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub stats: SessionStats,
    /// The stream ended inside a value.
    pub truncated: bool,
}

/// Replay the capture at `path`, logging every decoded value.
pub fn run_file(config: &Config, path: &Path) -> Result<ReplaySummary, ReplayError> {
    let file = File::open(path)?;
    info!(path = %path.display(), "Replaying capture");

    let summary = replay(file, &config.session_options(), |value| {
        log_value(REPLAY_CONN_ID, &value)
    })?;

    if summary.truncated {
        warn!("Capture ends inside a value");
    }
    info!(
        bytes = summary.stats.bytes_received,
        values = summary.stats.values,
        error_replies = summary.stats.error_replies,
        omitted_bulks = summary.stats.omitted_bulks,
        "Replay finished"
    );
    Ok(summary)
}

/// Decode everything `reader` produces, passing values to `on_value`.
pub fn replay<R, F>(
    mut reader: R,
    options: &SessionOptions,
    mut on_value: F,
) -> Result<ReplaySummary, ReplayError>
where
    R: Read,
    F: FnMut(Value),
{
    let mut session = Session::new(options);

    loop {
        let n = match session.fill_from(&mut reader) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        session
            .drain(&mut on_value)
            .map_err(|source| ReplayError::Decode {
                offset: session.stats().bytes_received,
                source,
            })?;
    }

    Ok(ReplaySummary {
        stats: session.stats(),
        truncated: session.has_partial(),
    })
}
