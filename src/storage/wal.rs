//! Write-ahead log of whole batches.
//!
//! Every batch becomes one frame:
//!
//! ```text
//! 0xB7 | payload_len u32 | payload | payload_len u32
//! payload = op_count u32 | op*
//! op      = 0 | key_len u32 | key | value_len u32 | value     (put)
//!         | 1 | key_len u32 | key                             (delete)
//! ```
//!
//! All integers are big-endian. A frame cut short by a crash is a torn tail:
//! replay stops there and the batch is dropped as a whole. A torn frame is
//! always the last thing in the file, so a short frame followed by a
//! complete one means its length field was damaged, and replay reports
//! corruption instead of dropping the batches after it.

use super::{StorageOp, WriteBatch};
use crate::config::SyncMode;
use crate::error::{Result, TesseraError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const FRAME_MARKER: u8 = 0xB7;
const FRAME_HEADER_LEN: usize = 1 + 4;
const FRAME_TRAILER_LEN: usize = 4;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

const SCRATCH_INITIAL_CAPACITY: usize = 8 * 1024;
const SCRATCH_SHRINK_THRESHOLD: usize = 1 << 20;

/// Result of reading a log back.
#[derive(Debug, Default)]
pub struct WalReplay {
    pub batches: Vec<Vec<StorageOp>>,
    /// Bytes after the last complete frame that were ignored
    pub torn_bytes: usize,
}

/// Append-only log file for one generation of writes
pub struct WalFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    scratch: BytesMut,
}

impl WalFile {
    /// Open (or create) a log for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let writer_file = file.try_clone()?;
        let writer = BufWriter::new(writer_file);

        Ok(WalFile {
            file,
            writer,
            path,
            size,
            scratch: BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY),
        })
    }

    /// Get current file size
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one batch as a single frame. Returns the bytes written.
    pub fn append(&mut self, batch: &WriteBatch) -> Result<usize> {
        let written_len = self.serialize_batch(batch)?;
        self.writer.write_all(&self.scratch[..written_len])?;
        self.size += written_len as u64;

        if self.scratch.capacity() > SCRATCH_SHRINK_THRESHOLD
            && written_len <= SCRATCH_INITIAL_CAPACITY
        {
            self.scratch = BytesMut::with_capacity(SCRATCH_INITIAL_CAPACITY);
        }

        Ok(written_len)
    }

    fn serialize_batch(&mut self, batch: &WriteBatch) -> Result<usize> {
        let payload_len = Self::payload_capacity(batch);
        let payload_len_u32 = u32::try_from(payload_len).map_err(|_| {
            TesseraError::InvalidArgument(format!(
                "batch of {} bytes exceeds the log frame limit",
                payload_len
            ))
        })?;
        let op_count = u32::try_from(batch.len()).map_err(|_| {
            TesseraError::InvalidArgument(format!("batch of {} ops is too large", batch.len()))
        })?;

        let capacity = FRAME_HEADER_LEN + payload_len + FRAME_TRAILER_LEN;
        self.scratch.clear();
        if self.scratch.capacity() < capacity {
            self.scratch.reserve(capacity - self.scratch.capacity());
        }
        let buf = &mut self.scratch;

        buf.put_u8(FRAME_MARKER);
        buf.put_u32(payload_len_u32);

        buf.put_u32(op_count);
        for op in batch.ops() {
            match op {
                StorageOp::Put { key, value } => {
                    buf.put_u8(OP_PUT);
                    buf.put_u32(key.len() as u32);
                    buf.put(key.as_ref());
                    buf.put_u32(value.len() as u32);
                    buf.put(value.as_ref());
                }
                StorageOp::Delete { key } => {
                    buf.put_u8(OP_DELETE);
                    buf.put_u32(key.len() as u32);
                    buf.put(key.as_ref());
                }
            }
        }

        buf.put_u32(payload_len_u32);
        Ok(buf.len())
    }

    fn payload_capacity(batch: &WriteBatch) -> usize {
        const OP_TYPE_LEN: usize = 1;
        const LEN_FIELD_LEN: usize = 4;

        let ops: usize = batch
            .ops()
            .iter()
            .map(|op| match op {
                StorageOp::Put { key, value } => {
                    OP_TYPE_LEN + LEN_FIELD_LEN + key.len() + LEN_FIELD_LEN + value.len()
                }
                StorageOp::Delete { key } => OP_TYPE_LEN + LEN_FIELD_LEN + key.len(),
            })
            .sum();

        LEN_FIELD_LEN + ops
    }

    /// Read every complete frame of the log at `path`.
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<WalReplay> {
        let mut raw = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut raw)?;

        let mut replay = WalReplay::default();
        let mut buf = &raw[..];

        while !buf.is_empty() {
            if buf.len() < FRAME_HEADER_LEN {
                replay.torn_bytes = buf.len();
                break;
            }

            if buf[0] != FRAME_MARKER {
                return Err(TesseraError::Corruption(format!(
                    "bad frame marker at offset {} in {}",
                    raw.len() - buf.len(),
                    path.as_ref().display()
                )));
            }

            let payload_len = (&buf[1..FRAME_HEADER_LEN]).get_u32() as usize;
            let frame_len = FRAME_HEADER_LEN + payload_len + FRAME_TRAILER_LEN;
            if buf.len() < frame_len {
                if let Some(next) = Self::find_complete_frame(&buf[1..]) {
                    return Err(TesseraError::Corruption(format!(
                        "frame at offset {} in {} claims {} bytes, but a complete frame follows at offset {}",
                        raw.len() - buf.len(),
                        path.as_ref().display(),
                        payload_len,
                        raw.len() - buf.len() + 1 + next
                    )));
                }
                replay.torn_bytes = buf.len();
                break;
            }

            let payload = &buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len];
            let trailer = (&buf[FRAME_HEADER_LEN + payload_len..frame_len]).get_u32() as usize;
            if trailer != payload_len {
                return Err(TesseraError::Corruption(format!(
                    "frame length mismatch ({} vs {}) in {}",
                    payload_len,
                    trailer,
                    path.as_ref().display()
                )));
            }

            replay.batches.push(Self::decode_payload(payload)?);
            buf.advance(frame_len);
        }

        Ok(replay)
    }

    /// Offset of the first well-formed frame in `buf`, if any.
    fn find_complete_frame(buf: &[u8]) -> Option<usize> {
        buf.iter()
            .enumerate()
            .filter(|(_, byte)| **byte == FRAME_MARKER)
            .map(|(offset, _)| offset)
            .find(|&offset| Self::is_complete_frame(&buf[offset..]))
    }

    /// Whether `buf` starts with a frame whose trailer and payload check out.
    fn is_complete_frame(buf: &[u8]) -> bool {
        if buf.len() < FRAME_HEADER_LEN || buf[0] != FRAME_MARKER {
            return false;
        }
        let payload_len = (&buf[1..FRAME_HEADER_LEN]).get_u32() as usize;
        let frame_len = FRAME_HEADER_LEN + payload_len + FRAME_TRAILER_LEN;
        if buf.len() < frame_len {
            return false;
        }
        let trailer = (&buf[FRAME_HEADER_LEN + payload_len..frame_len]).get_u32() as usize;
        trailer == payload_len
            && Self::decode_payload(&buf[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len]).is_ok()
    }

    fn decode_payload(mut payload: &[u8]) -> Result<Vec<StorageOp>> {
        let op_count = read_u32(&mut payload)? as usize;
        let mut ops = Vec::with_capacity(op_count.min(payload.len()));

        for _ in 0..op_count {
            let op_type = read_u8(&mut payload)?;
            let key = read_bytes(&mut payload)?;
            match op_type {
                OP_PUT => {
                    let value = read_bytes(&mut payload)?;
                    ops.push(StorageOp::Put { key, value });
                }
                OP_DELETE => ops.push(StorageOp::Delete { key }),
                other => {
                    return Err(TesseraError::Corruption(format!(
                        "unknown log op type {}",
                        other
                    )));
                }
            }
        }

        if payload.has_remaining() {
            return Err(TesseraError::Corruption(
                "trailing bytes in log frame".to_string(),
            ));
        }

        Ok(ops)
    }

    /// Flush buffered writes to the OS
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and sync using the provided mode.
    pub fn sync_with_mode(&mut self, mode: SyncMode) -> Result<()> {
        self.writer.flush()?;
        match mode {
            SyncMode::All => self.file.sync_all()?,
            SyncMode::Data => self.file.sync_data()?,
        }
        Ok(())
    }
}

impl Drop for WalFile {
    fn drop(&mut self) {
        // Best effort flush on drop, ignore errors
        let _ = self.writer.flush();
    }
}

fn truncated() -> TesseraError {
    TesseraError::Corruption("log frame ends mid-record".to_string())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

fn read_bytes(buf: &mut &[u8]) -> Result<Bytes> {
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let bytes = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(bytes)
}
