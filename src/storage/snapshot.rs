//! Point-in-time image of the whole keyspace.
//!
//! A snapshot records the sequence number of the newest log file it covers.
//! Snapshots are written to a temporary file and atomically renamed over the
//! previous one, so a reader sees either the old image or the new one.

use crate::error::{Result, TesseraError};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_MAGIC: &[u8] = b"TESSERA_SNAPSHOT";
const SNAPSHOT_VERSION: u8 = 1;

/// Image loaded from disk.
#[derive(Debug, Default)]
pub struct SnapshotImage {
    /// Every log with a sequence number at or below this is folded in
    pub covered_seq: u64,
    pub entries: BTreeMap<Bytes, Bytes>,
}

pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the image, or `None` when no snapshot has been written yet.
    pub fn load(&self) -> Result<Option<SnapshotImage>> {
        if !self.exists() {
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }

        let mut reader = BufReader::new(file);
        Self::read_image(&mut reader).map(Some).map_err(|e| match e {
            TesseraError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                TesseraError::Corruption(format!(
                    "snapshot {} is truncated",
                    self.path.display()
                ))
            }
            other => other,
        })
    }

    fn read_image<R: Read>(reader: &mut R) -> Result<SnapshotImage> {
        let mut magic = vec![0u8; SNAPSHOT_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(TesseraError::Corruption(
                "snapshot has a bad magic header".to_string(),
            ));
        }

        let version = read_u8(reader)?;
        if version != SNAPSHOT_VERSION {
            return Err(TesseraError::Corruption(format!(
                "unsupported snapshot version {}",
                version
            )));
        }

        let covered_seq = read_u64(reader)?;
        let entry_count = read_u64(reader)?;
        let mut entries = BTreeMap::new();

        for _ in 0..entry_count {
            let key = read_bytes(reader)?;
            let value = read_bytes(reader)?;
            entries.insert(key, value);
        }

        Ok(SnapshotImage {
            covered_seq,
            entries,
        })
    }

    /// Replace the snapshot with `entries`, covering logs up to `covered_seq`.
    pub fn save(&self, covered_seq: u64, entries: &BTreeMap<Bytes, Bytes>, sync: bool) -> Result<()> {
        let temp_path = self.temp_path();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);

        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_all(&[SNAPSHOT_VERSION])?;
        write_u64(&mut writer, covered_seq)?;
        write_u64(&mut writer, entries.len() as u64)?;

        for (key, value) in entries {
            write_u64(&mut writer, key.len() as u64)?;
            writer.write_all(key)?;
            write_u64(&mut writer, value.len() as u64)?;
            writer.write_all(value)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if sync {
            file.sync_all()?;
        }
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        if sync {
            self.sync_parent_dir()?;
        }

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }

    fn sync_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<Bytes> {
    let len = read_u64(reader)? as usize;
    let mut buf = Vec::new();
    // `take` bounds the allocation by what the file actually holds.
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(TesseraError::Corruption(
            "snapshot entry ends early".to_string(),
        ));
    }
    Ok(Bytes::from(buf))
}
