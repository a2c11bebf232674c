// Collection log encoding/decoding
//
// File format (binary):
// header: [magic: u32 LE] [version: u16 LE]
// frame:  [length: u32 LE] [payload bytes] [crc32: u32 LE]
//
// One frame holds one bulk write. The payload is a bincode-encoded batch;
// document values are carried as JSON text because bincode cannot encode
// self-describing values.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use statelog_core::record::millis_to_datetime;
use statelog_core::{Error, Result, StoredDocument};

/// Log magic: "SLDC" (StateLog DoCuments)
pub const LOG_MAGIC: u32 = 0x534C4443;

/// Current log format version
pub const LOG_FORMAT_VERSION: u16 = 1;

/// Oldest log format version this build can read
pub const MIN_READ_VERSION: u16 = 1;

/// Size of the file header in bytes
pub const HEADER_LEN: usize = 6;

/// Length prefix plus trailing checksum
pub const FRAME_OVERHEAD: usize = 8;

/// Sanity limit on a single frame payload
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct DocumentFrame {
    id: String,
    ts_ms: i64,
    val_json: String,
    ack: bool,
    from: Option<String>,
    q: i64,
}

#[derive(Debug, Deserialize)]
struct BatchFrame {
    documents: Vec<DocumentFrame>,
}

// Serializes exactly like `BatchFrame`
#[derive(Serialize)]
struct BatchFrameRef<'a> {
    documents: &'a [DocumentFrame],
}

// bincode length prefix of the document sequence
const SEQ_PREFIX_LEN: usize = 8;

/// Encode the file header
pub fn encode_header() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&LOG_MAGIC.to_le_bytes());
    header[4..].copy_from_slice(&LOG_FORMAT_VERSION.to_le_bytes());
    header
}

/// Validate a file header and return its format version
pub fn decode_header(data: &[u8]) -> Result<u16> {
    if data.len() < HEADER_LEN {
        return Err(Error::Storage("Incomplete log header".to_string()));
    }

    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if magic != LOG_MAGIC {
        return Err(Error::Storage(format!(
            "Not a collection log: bad magic {:#010x}",
            magic
        )));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if !(MIN_READ_VERSION..=LOG_FORMAT_VERSION).contains(&version) {
        return Err(Error::Storage(format!(
            "Unsupported log format version {}",
            version
        )));
    }

    Ok(version)
}

/// A batch split into frames that each fit the frame limit
#[derive(Debug, Default)]
pub struct FramedBatch {
    /// Encoded frames, each with the batch positions of the documents it holds
    pub frames: Vec<(Vec<u8>, Vec<usize>)>,
    /// Batch positions of documents that cannot be stored, with the reason
    pub rejected: Vec<(usize, Error)>,
}

fn to_entry(doc: &StoredDocument) -> Result<DocumentFrame> {
    let val_json = serde_json::to_string(&doc.val)
        .map_err(|e| Error::Serialization(format!("Failed to serialize value: {}", e)))?;
    Ok(DocumentFrame {
        id: doc.id.clone(),
        ts_ms: doc.ts_millis(),
        val_json,
        ack: doc.ack,
        from: doc.from.clone(),
        q: doc.q,
    })
}

fn encode_frame(documents: &[DocumentFrame]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&BatchFrameRef { documents })
        .map_err(|e| Error::Serialization(format!("Failed to serialize batch: {}", e)))?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::Serialization(format!(
            "Batch too large: {} bytes",
            payload.len()
        )));
    }

    let mut hasher = Hasher::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// Encode a batch of documents into one checksummed frame
pub fn encode_batch(docs: &[StoredDocument]) -> Result<Vec<u8>> {
    let documents = docs.iter().map(to_entry).collect::<Result<Vec<_>>>()?;
    encode_frame(&documents)
}

/// Encode a batch as as many frames as needed to keep each payload within
/// `max_frame_len` (capped at [`MAX_FRAME_LEN`]).
///
/// A document that does not fit in a frame on its own is rejected instead
/// of failing the batch. Documents keep their batch order across frames.
pub fn frame_batch<'a, I>(docs: I, max_frame_len: usize) -> Result<FramedBatch>
where
    I: IntoIterator<Item = &'a StoredDocument>,
{
    let limit = max_frame_len.min(MAX_FRAME_LEN);
    let mut framed = FramedBatch::default();
    let mut entries = Vec::new();
    let mut positions = Vec::new();
    let mut payload_len = SEQ_PREFIX_LEN;

    for (index, doc) in docs.into_iter().enumerate() {
        let entry = match to_entry(doc) {
            Ok(entry) => entry,
            Err(e) => {
                framed.rejected.push((index, e));
                continue;
            }
        };
        let size = bincode::serialized_size(&entry)
            .map_err(|e| Error::Serialization(format!("Failed to size document: {}", e)))?
            as usize;

        if SEQ_PREFIX_LEN + size > limit {
            framed.rejected.push((
                index,
                Error::InvalidRecord(format!(
                    "document of {} bytes exceeds the {} byte frame limit",
                    size, limit
                )),
            ));
            continue;
        }

        if payload_len + size > limit {
            framed
                .frames
                .push((encode_frame(&entries)?, std::mem::take(&mut positions)));
            entries.clear();
            payload_len = SEQ_PREFIX_LEN;
        }
        entries.push(entry);
        positions.push(index);
        payload_len += size;
    }

    if !entries.is_empty() {
        framed.frames.push((encode_frame(&entries)?, positions));
    }
    Ok(framed)
}

/// Decode one frame from the front of `data`.
///
/// Returns `Ok(None)` when `data` ends before the frame does, which is
/// what a crash in the middle of an append leaves behind. Returns the
/// documents and the number of bytes consumed otherwise.
pub fn decode_batch(data: &[u8]) -> Result<Option<(Vec<StoredDocument>, usize)>> {
    if data.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_LEN {
        return Err(Error::Storage(format!(
            "Frame length too large: {} bytes",
            length
        )));
    }

    let total_size = FRAME_OVERHEAD + length;
    if data.len() < total_size {
        return Ok(None);
    }

    let payload = &data[4..4 + length];
    let crc_offset = 4 + length;
    let expected_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);

    let mut hasher = Hasher::new();
    hasher.update(payload);
    let actual_crc = hasher.finalize();

    if actual_crc != expected_crc {
        return Err(Error::Storage(format!(
            "CRC mismatch: expected {}, got {}",
            expected_crc, actual_crc
        )));
    }

    let batch: BatchFrame = bincode::deserialize(payload)
        .map_err(|e| Error::Serialization(format!("Failed to deserialize batch: {}", e)))?;

    let docs = batch
        .documents
        .into_iter()
        .map(|frame| {
            let ts = millis_to_datetime(frame.ts_ms).ok_or_else(|| {
                Error::Storage(format!("Timestamp {} out of range", frame.ts_ms))
            })?;
            let val = serde_json::from_str(&frame.val_json).map_err(|e| {
                Error::Serialization(format!("Failed to deserialize value: {}", e))
            })?;
            Ok(StoredDocument {
                id: frame.id,
                ts,
                val,
                ack: frame.ack,
                from: frame.from,
                q: frame.q,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some((docs, total_size)))
}
