//! Parsing of `Common.cfg` and `PeerInfo.cfg` into the configuration records
//! the rest of the engine operates on.
//!
//! This is the sole place in the crate that knows about the on-disk
//! configuration file format; everything downstream works with strongly
//! typed [`CommonConfig`] and [`PeerEntry`] values.

use std::{fs, path::Path, time::Duration};

use crate::{
    error::{Error, Result},
    PeerId,
};

/// Parameters shared by every peer in the swarm, read from `Common.cfg`.
#[derive(Clone, Debug)]
pub struct CommonConfig {
    /// Number of preferred neighbors selected on each unchoking cycle (*k*).
    pub preferred_count: usize,
    /// Interval at which preferred neighbors are reselected (*p*).
    pub unchoke_interval: Duration,
    /// Interval at which the optimistic unchoke is rotated (*m*).
    pub optimistic_interval: Duration,
    /// Name of the file being shared, relative to each peer's directory.
    pub file_name: String,
    /// Total size of the shared file, in bytes (*F*).
    pub file_size: u64,
    /// Size of a single piece, in bytes (*S*). The last piece may be shorter.
    pub piece_size: u32,
    /// Resolves the optimistic-unchoke persistence question left open by the
    /// original design: when set, a preferred-neighbor reselection clears
    /// every session's optimistic flag before applying choke decisions, so a
    /// neighbor that falls out of optimistic status loses its immunity to
    /// re-choking on the very next cycle. Off by default, matching the
    /// original's documented (if surprising) behavior of letting the
    /// optimistic flag persist until the next optimistic-unchoke cycle
    /// reassigns it.
    pub clear_optimistic_on_reselect: bool,
}

impl CommonConfig {
    /// The number of pieces the shared file is split into.
    pub fn num_pieces(&self) -> usize {
        if self.file_size == 0 {
            return 0;
        }
        ((self.file_size + self.piece_size as u64 - 1) / self.piece_size as u64) as usize
    }

    /// The length, in bytes, of the piece at `index`.
    ///
    /// The last piece may be shorter than [`Self::piece_size`] if
    /// `file_size` is not an exact multiple of it.
    pub fn piece_len(&self, index: crate::PieceIndex) -> Option<u32> {
        let num_pieces = self.num_pieces();
        if num_pieces == 0 || index >= num_pieces {
            return None;
        }
        if index == num_pieces - 1 {
            let len = self.file_size - self.piece_size as u64 * (num_pieces - 1) as u64;
            Some(len as u32)
        } else {
            Some(self.piece_size)
        }
    }

    pub(crate) fn parse(contents: &str) -> Result<Self> {
        let mut preferred_count = None;
        let mut unchoke_interval = None;
        let mut optimistic_interval = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;
        let mut clear_optimistic_on_reselect = false;

        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let key = match fields.next() {
                Some(key) => key,
                None => continue,
            };
            let value = fields
                .next()
                .ok_or_else(|| Error::Config(format!("missing value for key {}", key)))?;

            match key {
                "NumberOfPreferredNeighbors" => {
                    preferred_count = Some(parse_field(key, value)?);
                }
                "UnchokingInterval" => {
                    unchoke_interval =
                        Some(Duration::from_secs(parse_field::<u64>(key, value)?));
                }
                "OptimisticUnchokingInterval" => {
                    optimistic_interval =
                        Some(Duration::from_secs(parse_field::<u64>(key, value)?));
                }
                "FileName" => file_name = Some(value.to_owned()),
                "FileSize" => file_size = Some(parse_field(key, value)?),
                "PieceSize" => piece_size = Some(parse_field(key, value)?),
                "OptimisticUnchokeClearOnReselect" => {
                    clear_optimistic_on_reselect = parse_field::<u8>(key, value)? != 0;
                }
                // forward-compatible: unrecognized keys are ignored rather
                // than rejected
                _ => {}
            }
        }

        Ok(Self {
            preferred_count: preferred_count
                .ok_or_else(|| Error::Config("missing NumberOfPreferredNeighbors".into()))?,
            unchoke_interval: unchoke_interval
                .ok_or_else(|| Error::Config("missing UnchokingInterval".into()))?,
            optimistic_interval: optimistic_interval
                .ok_or_else(|| Error::Config("missing OptimisticUnchokingInterval".into()))?,
            file_name: file_name.ok_or_else(|| Error::Config("missing FileName".into()))?,
            file_size: file_size.ok_or_else(|| Error::Config("missing FileSize".into()))?,
            piece_size: piece_size.ok_or_else(|| Error::Config("missing PieceSize".into()))?,
            clear_optimistic_on_reselect,
        })
    }
}

/// A single line of `PeerInfo.cfg`.
#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
    pub has_file_initially: bool,
}

/// The ordered membership list, as read from `PeerInfo.cfg`.
///
/// Order matters: a peer dials every entry that appears *before* its own in
/// this list (§4.6) and never dials entries that appear after.
#[derive(Clone, Debug)]
pub struct Membership {
    peers: Vec<PeerEntry>,
}

impl Membership {
    pub(crate) fn parse(contents: &str) -> Result<Self> {
        let mut peers = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let peer_id = fields
                .next()
                .ok_or_else(|| Error::Config("missing peer_id field".into()))
                .and_then(|f| parse_field("peer_id", f))?;
            let host = fields
                .next()
                .ok_or_else(|| Error::Config("missing host field".into()))?
                .to_owned();
            let port = fields
                .next()
                .ok_or_else(|| Error::Config("missing port field".into()))
                .and_then(|f| parse_field("port", f))?;
            let has_file: u8 = fields
                .next()
                .ok_or_else(|| Error::Config("missing has_file field".into()))
                .and_then(|f| parse_field("has_file", f))?;
            peers.push(PeerEntry {
                peer_id,
                host,
                port,
                has_file_initially: has_file == 1,
            });
        }
        if peers.is_empty() {
            return Err(Error::Config("PeerInfo.cfg has no entries".into()));
        }
        Ok(Self { peers })
    }

    /// All configured peers, in file order.
    pub fn peers(&self) -> &[PeerEntry] {
        &self.peers
    }

    /// The total number of configured peers (including the local one).
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Looks up a peer's entry by id.
    pub fn get(&self, peer_id: PeerId) -> Option<&PeerEntry> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    /// Returns the entries that the given peer must dial on startup: every
    /// entry appearing strictly before it in the configuration file.
    pub fn predecessors_of(&self, peer_id: PeerId) -> &[PeerEntry] {
        match self.peers.iter().position(|p| p.peer_id == peer_id) {
            Some(pos) => &self.peers[..pos],
            None => &[],
        }
    }
}

/// The fully resolved configuration for one running peer process.
#[derive(Clone, Debug)]
pub struct Config {
    pub common: CommonConfig,
    pub membership: Membership,
    pub local: PeerEntry,
}

impl Config {
    /// Reads `Common.cfg` and `PeerInfo.cfg` from `dir` and resolves the
    /// local peer's own entry, returning [`Error::Config`] if either file is
    /// missing or malformed, or [`Error::UnknownPeerId`] if `local_id` is not
    /// listed.
    pub fn load(dir: impl AsRef<Path>, local_id: PeerId) -> Result<Self> {
        let dir = dir.as_ref();
        let common = read_to_string(&dir.join("Common.cfg"))?;
        let common = CommonConfig::parse(&common)?;

        let membership = read_to_string(&dir.join("PeerInfo.cfg"))?;
        let membership = Membership::parse(&membership)?;

        let local = membership
            .get(local_id)
            .cloned()
            .ok_or(Error::UnknownPeerId(local_id))?;

        Ok(Self {
            common,
            membership,
            local,
        })
    }

    /// The peer directory this process reads and writes its file in:
    /// `peer_<id>/`.
    pub fn peer_dir(&self) -> std::path::PathBuf {
        peer_dir(self.local.peer_id)
    }
}

/// The per-peer working directory `peer_<id>/`.
pub fn peer_dir(peer_id: PeerId) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("peer_{}", peer_id))
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))
}

fn parse_field<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(value)
        .map_err(|e| Error::Config(format!("invalid value for {}: {} ({})", key, value, e)))
}
