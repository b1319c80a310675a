//! The piece store: the local availability bitmap, the at-most-once
//! outstanding-request set, and random access reads/writes of piece data on
//! a single flat file (§4.2).
//!
//! Unlike cratetorrent's own `disk` module, there is no archive/multi-file
//! structure or content hashing to support here (no cryptographic piece
//! verification is in scope, per spec's Non-goals) — just one file, accessed
//! by offset, with an in-memory bitmap and request set guarded by a single
//! internal lock, per §4.2 and §5.

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

use rand::seq::IteratorRandom;

use crate::{error::Result, Bitfield, PieceIndex};

struct Inner {
    bitfield: Bitfield,
    outstanding: HashSet<PieceIndex>,
}

/// The store backing one peer's copy of the shared file.
pub struct PieceStore {
    inner: Mutex<Inner>,
    file: Mutex<File>,
    piece_count: usize,
    piece_size: u32,
    file_size: u64,
}

impl PieceStore {
    /// Opens (or creates) `path` and initializes the local bitmap.
    ///
    /// If `has_file_initially` is true the file is expected to already exist
    /// and hold the complete contents, and every bit starts set; otherwise
    /// the file is created empty (or truncated, if present) and every bit
    /// starts clear, to be filled in by offset as pieces arrive.
    pub fn open(
        path: impl AsRef<Path>,
        piece_count: usize,
        piece_size: u32,
        file_size: u64,
        has_file_initially: bool,
    ) -> Result<Self> {
        let file = if has_file_initially {
            OpenOptions::new().read(true).write(true).open(path)?
        } else {
            OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(true)
                .open(path)?
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                bitfield: Bitfield::repeat(has_file_initially, piece_count),
                outstanding: HashSet::new(),
            }),
            file: Mutex::new(file),
            piece_count,
            piece_size,
            file_size,
        })
    }

    /// The length, in bytes, of the piece at `index`; the last piece may be
    /// shorter than `piece_size` (§3).
    pub fn piece_len(&self, index: PieceIndex) -> Option<u32> {
        if index >= self.piece_count {
            return None;
        }
        if index == self.piece_count - 1 {
            let len = self.file_size - self.piece_size as u64 * (self.piece_count - 1) as u64;
            Some(len as u32)
        } else {
            Some(self.piece_size)
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_count
    }

    /// Whether piece `index` has already been persisted locally.
    pub fn has(&self, index: PieceIndex) -> bool {
        let inner = self.inner.lock().unwrap();
        index < inner.bitfield.len() && inner.bitfield[index]
    }

    /// Whether every piece has been persisted locally.
    pub fn has_all(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.bitfield.all()
    }

    /// The number of pieces currently held locally.
    pub fn count_owned(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        (0..inner.bitfield.len()).filter(|&i| inner.bitfield[i]).count()
    }

    /// Encodes the local bitmap into its wire representation (§4.1): piece
    /// `i` is bit `7 - i % 8` of byte `i / 8`, trailing bits beyond
    /// `num_pieces` zero.
    pub fn encode_bitfield(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        inner.bitfield.clone().into_vec()
    }

    /// Decodes a neighbor's raw bitfield payload into a [`Bitfield`] exactly
    /// `num_pieces` bits long, discarding any padding bits past that length.
    pub fn decode_bitfield(&self, bytes: &[u8]) -> Bitfield {
        let mut bitfield = Bitfield::from_vec(bytes.to_vec());
        bitfield.resize(self.piece_count, false);
        bitfield
    }

    /// Reads the bytes of piece `index`, or `None` if it isn't held locally.
    pub fn read(&self, index: PieceIndex) -> Result<Option<Vec<u8>>> {
        if !self.has(index) {
            return Ok(None);
        }
        let len = match self.piece_len(index) {
            Some(len) => len,
            None => return Ok(None),
        };
        let offset = index as u64 * self.piece_size as u64;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// Persists `data` as piece `index`: seeks to its offset, writes it, sets
    /// the corresponding bit, and atomically removes `index` from the
    /// outstanding-request set. Returns `false` (without setting the bit) on
    /// I/O failure, leaving the piece requestable.
    pub fn write(&self, index: PieceIndex, data: &[u8]) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let offset = index as u64 * self.piece_size as u64;
        let written = {
            let mut file = match self.file.lock() {
                Ok(file) => file,
                Err(_) => return false,
            };
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(data))
                .is_ok()
        };
        if !written {
            return false;
        }

        let mut inner = self.inner.lock().unwrap();
        inner.bitfield.set(index, true);
        inner.outstanding.remove(&index);
        true
    }

    /// Atomically claims one index from `candidates` that is not already
    /// outstanding, chosen uniformly at random among the eligible ones, and
    /// adds it to the outstanding-request set.
    pub fn claim_request(&self, candidates: &[PieceIndex]) -> Option<PieceIndex> {
        let mut inner = self.inner.lock().unwrap();
        let choice = candidates
            .iter()
            .copied()
            .filter(|i| !inner.outstanding.contains(i))
            .choose(&mut rand::thread_rng())?;
        inner.outstanding.insert(choice);
        Some(choice)
    }

    /// Removes `index` from the outstanding-request set without marking it
    /// held. Exposed for a connection-loss recovery policy (§4.2, §9); the
    /// default engine does not call this, so indices requested from a
    /// neighbor that disconnects remain outstanding until some other
    /// neighbor serves them, matching the source design this engine is
    /// adapted from.
    pub fn release_request(&self, index: PieceIndex) {
        let mut inner = self.inner.lock().unwrap();
        inner.outstanding.remove(&index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::NamedTempDir;

    // A tiny stand-in for a temp-dir helper: avoids pulling in `tempfile` as
    // a dev-dependency for what is otherwise a handful of call sites.
    mod tempfile_shim {
        use std::path::{Path, PathBuf};

        pub struct NamedTempDir(PathBuf);

        impl NamedTempDir {
            pub fn new(tag: &str) -> Self {
                let mut dir = std::env::temp_dir();
                dir.push(format!(
                    "peershare-test-{}-{}-{:?}",
                    tag,
                    std::process::id(),
                    std::time::Instant::now()
                ));
                std::fs::create_dir_all(&dir).unwrap();
                Self(dir)
            }

            pub fn path(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for NamedTempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    fn seeder_store(dir: &Path, data: &[u8], piece_size: u32) -> PieceStore {
        let path = dir.join("file.dat");
        std::fs::write(&path, data).unwrap();
        let num_pieces = ((data.len() as u64 + piece_size as u64 - 1) / piece_size as u64) as usize;
        PieceStore::open(path, num_pieces, piece_size, data.len() as u64, true).unwrap()
    }

    fn leecher_store(dir: &Path, file_size: u64, piece_size: u32) -> PieceStore {
        let path = dir.join("file.dat");
        let num_pieces = ((file_size + piece_size as u64 - 1) / piece_size as u64) as usize;
        PieceStore::open(path, num_pieces, piece_size, file_size, false).unwrap()
    }

    #[test]
    fn seeder_has_all_pieces_from_the_start() {
        let tmp = NamedTempDir::new("seeder");
        let store = seeder_store(tmp.path(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 10);
        assert!(store.has_all());
        assert!(store.has(0));
    }

    #[test]
    fn leecher_starts_empty_and_fills_by_write() {
        let tmp = NamedTempDir::new("leecher");
        let store = leecher_store(tmp.path(), 10, 10);
        assert!(!store.has_all());
        assert!(!store.has(0));
        assert!(store.write(0, &[9; 10]));
        assert!(store.has(0));
        assert!(store.has_all());
        assert_eq!(store.read(0).unwrap().unwrap(), vec![9; 10]);
    }

    #[test]
    fn last_piece_may_be_shorter() {
        let tmp = NamedTempDir::new("lastpiece");
        // 25 bytes, piece size 10 -> 3 pieces, last is 5 bytes
        let store = leecher_store(tmp.path(), 25, 10);
        assert_eq!(store.num_pieces(), 3);
        assert_eq!(store.piece_len(0), Some(10));
        assert_eq!(store.piece_len(2), Some(5));
        assert!(store.write(2, &[1, 2, 3, 4, 5]));
        assert_eq!(store.read(2).unwrap().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn read_of_missing_piece_is_none() {
        let tmp = NamedTempDir::new("missing");
        let store = leecher_store(tmp.path(), 10, 10);
        assert_eq!(store.read(0).unwrap(), None);
    }

    #[test]
    fn claim_request_is_exclusive_and_removed_on_write() {
        let tmp = NamedTempDir::new("claim");
        let store = leecher_store(tmp.path(), 30, 10);
        let claimed = store.claim_request(&[0, 1, 2]).unwrap();
        // the same index must not be claimable again while outstanding
        let remaining: Vec<_> = (0..3).filter(|i| *i != claimed).collect();
        let second = store.claim_request(&remaining).unwrap();
        assert_ne!(claimed, second);

        assert!(store.write(claimed, &[0; 10]));
        // now claimed is held, so it must not be offered as a candidate by
        // the caller; but it must also no longer be outstanding
        store.release_request(claimed);
    }

    #[test]
    fn bitfield_round_trips_through_encode_decode() {
        let tmp = NamedTempDir::new("bitfield");
        let store = seeder_store(tmp.path(), &vec![0u8; 100], 10);
        let encoded = store.encode_bitfield();
        let decoded = store.decode_bitfield(&encoded);
        assert!(decoded.all());
        assert_eq!(decoded.len(), store.num_pieces());
    }

    #[test]
    fn bitfield_encoding_matches_spec_example() {
        // num_pieces = 10, only pieces 0 and 9 held -> 0x80 0x40
        let tmp = NamedTempDir::new("bitfield-example");
        let store = leecher_store(tmp.path(), 100, 10);
        assert!(store.write(0, &[0; 10]));
        assert!(store.write(9, &[0; 10]));
        let encoded = store.encode_bitfield();
        assert_eq!(encoded, vec![0x80, 0x40]);
    }

    #[test]
    fn write_failure_leaves_piece_requestable() {
        let tmp = NamedTempDir::new("write-failure");
        let store = leecher_store(tmp.path(), 10, 10);
        // an out of range index always fails without setting any bit
        assert!(!store.write(99, &[1, 2, 3]));
        assert!(!store.has(0));
    }
}
