//! The per-peer log sink.
//!
//! Every peer process writes exactly one file, `log_peer_<id>.log`,
//! truncated at the start of each run. Unlike `env_logger`, which the wider
//! Rust BitTorrent ecosystem reaches for when logging to stderr is enough,
//! this crate needs a specific file per process, so it implements its own
//! small [`log::Log`] sink instead.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    sync::Mutex,
};

use log::{LevelFilter, Log, Metadata, Record};

use crate::{error::Result, PeerId};

/// Installs the global logger for `peer_id`, writing to `log_peer_<id>.log`
/// in the current directory.
///
/// The maximum level defaults to `Info`, which is exactly the set of events
/// the protocol is required to record (§6.4); set `RUST_LOG` to enable the
/// crate's `debug!`/`trace!` call sites for local troubleshooting.
pub fn init(peer_id: PeerId) -> Result<()> {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Info);

    let path = format!("log_peer_{}.log", peer_id);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;

    let logger = PeerLogger {
        file: Mutex::new(file),
        level,
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| crate::error::Error::Config(e.to_string()))?;
    log::set_max_level(level);
    Ok(())
}

struct PeerLogger {
    file: Mutex<File>,
    level: LevelFilter,
}

impl Log for PeerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("{}: {}\n", timestamp, record.args());
        if let Ok(mut file) = self.file.lock() {
            // best-effort: a failed log write must not bring down the peer
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}
