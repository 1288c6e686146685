//! Single-file snapshots of the in-memory node database
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("MKVS_NDB")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes (u32 LE)
//!   - body_len: 8 bytes (u64 LE)
//!   - body_hash: 32 bytes (blake3 of the body)
//!   - reserved: 8 bytes
//!
//! [BODY: body_len bytes]
//!   - zstd-compressed bincode of the database state
//! ```

use super::state::State;
use crate::model::Hash;
use crate::{Error, Result, MAGIC, VERSION};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: usize = 64;

/// Set while an external tool is rewriting the database
pub(crate) const FLAG_UPGRADE_IN_PROGRESS: u32 = 1;

const COMPRESSION_LEVEL: i32 = 3;

struct Header {
    version: u32,
    flags: u32,
    body_len: u64,
    body_hash: Hash,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&self.version.to_le_bytes());
        header[12..16].copy_from_slice(&self.flags.to_le_bytes());
        header[16..24].copy_from_slice(&self.body_len.to_le_bytes());
        header[24..56].copy_from_slice(self.body_hash.as_bytes());
        header
    }

    fn decode(header: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &header[0..8] != MAGIC {
            return Err(Error::Corruption("invalid magic bytes".into()));
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&header[8..12]);
        let version = u32::from_le_bytes(word);
        word.copy_from_slice(&header[12..16]);
        let flags = u32::from_le_bytes(word);
        let mut len = [0u8; 8];
        len.copy_from_slice(&header[16..24]);

        Ok(Header {
            version,
            flags,
            body_len: u64::from_le_bytes(len),
            body_hash: Hash::from_slice(&header[24..56])?,
        })
    }
}

/// Write the state to `path`, replacing any previous snapshot
///
/// The snapshot is written next to the target and renamed into place.
pub(super) fn write(path: &Path, state: &State, fsync: bool) -> Result<()> {
    let encoded = bincode::serialize(state)?;
    let body = zstd::encode_all(encoded.as_slice(), COMPRESSION_LEVEL)?;
    let header = Header {
        version: VERSION,
        flags: 0,
        body_len: body.len() as u64,
        body_hash: Hash::digest(&body),
    };

    let tmp = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&header.encode())?;
        file.write_all(&body)?;
        if fsync {
            file.sync_all()?;
        }
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot written by [`write`]
pub(super) fn read(path: &Path) -> Result<State> {
    let mut file = File::open(path)?;
    let mut raw = [0u8; HEADER_SIZE];
    file.read_exact(&mut raw)?;
    let header = Header::decode(&raw)?;

    if header.version != VERSION {
        return Err(Error::FormatVersionMismatch {
            expected: VERSION,
            found: header.version,
        });
    }
    if header.flags & FLAG_UPGRADE_IN_PROGRESS != 0 {
        return Err(Error::UpgradeInProgress);
    }

    let stored_len = file.metadata()?.len().saturating_sub(HEADER_SIZE as u64);
    if stored_len != header.body_len {
        return Err(Error::Corruption(format!(
            "snapshot body is {} bytes, header says {}",
            stored_len, header.body_len
        )));
    }
    let mut body = Vec::new();
    file.read_to_end(&mut body)?;
    if body.len() as u64 != header.body_len {
        return Err(Error::Corruption("snapshot body changed while reading".into()));
    }
    if Hash::digest(&body) != header.body_hash {
        return Err(Error::Corruption("snapshot body hash mismatch".into()));
    }

    let decoded = zstd::decode_all(body.as_slice())?;
    Ok(bincode::deserialize(&decoded)?)
}

/// Set or clear the upgrade-in-progress flag of an existing snapshot
pub(crate) fn set_upgrade_in_progress(path: &Path, in_progress: bool) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut raw = [0u8; HEADER_SIZE];
    file.read_exact(&mut raw)?;
    let mut header = Header::decode(&raw)?;

    if in_progress {
        header.flags |= FLAG_UPGRADE_IN_PROGRESS;
    } else {
        header.flags &= !FLAG_UPGRADE_IN_PROGRESS;
    }

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.encode())?;
    file.sync_all()?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Namespace;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.db");
        let ns = Namespace::from_bytes([3u8; 32]);

        write(&path, &State::new(ns), false).unwrap();
        let state = read(&path).unwrap();

        assert_eq!(state.namespace, ns);
        assert_eq!(state.node_count(), 0);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_upgrade_flag_blocks_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.db");
        write(&path, &State::new(Namespace::default()), true).unwrap();

        set_upgrade_in_progress(&path, true).unwrap();
        assert!(matches!(read(&path), Err(Error::UpgradeInProgress)));

        set_upgrade_in_progress(&path, false).unwrap();
        assert!(read(&path).is_ok());
    }

    #[test]
    fn test_corrupted_snapshots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node.db");
        write(&path, &State::new(Namespace::default()), false).unwrap();

        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, &data).unwrap();
        assert!(matches!(read(&path), Err(Error::Corruption(_))));

        data[8..12].copy_from_slice(&99u32.to_le_bytes());
        fs::write(&path, &data).unwrap();
        assert!(matches!(
            read(&path),
            Err(Error::FormatVersionMismatch { found: 99, .. })
        ));

        data[8..12].copy_from_slice(&VERSION.to_le_bytes());
        data[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, &data).unwrap();
        assert!(matches!(read(&path), Err(Error::Corruption(_))));

        data.truncate(HEADER_SIZE + 4);
        data[16..24].copy_from_slice(&1024u64.to_le_bytes());
        fs::write(&path, &data).unwrap();
        assert!(matches!(read(&path), Err(Error::Corruption(_))));

        data[0] = b'X';
        fs::write(&path, &data).unwrap();
        assert!(matches!(read(&path), Err(Error::Corruption(_))));
    }
}
