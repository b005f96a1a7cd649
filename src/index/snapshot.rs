//! Binary snapshot format for the index.
//!
//! Header (51 bytes):
//! - magic: [u8; 4] (`DSIX`)
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 of the embedding model name, zeroes if none)
//! - dimensions: u16 (little-endian, 0 if no embeddings)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id, title: string
//! - summary, long_summary: optional string
//! - category, source: string
//! - created_at: optional string
//! - embedding: optional [f32; dimensions] (little-endian)
//!
//! Strings are a u32 length followed by UTF-8 bytes; optional values are a
//! presence byte (0/1) followed by the value.
//!
//! Trailer:
//! - body_checksum: u32 (CRC32 of all entry bytes)

use std::io::{Cursor, Read};

use crate::index::IndexedDocument;

const MAGIC: &[u8; 4] = b"DSIX";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// magic(4) + version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 51;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is truncated")]
    Truncated,

    #[error("not an index snapshot")]
    BadMagic,

    #[error("Version mismatch: snapshot version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Checksum mismatch: snapshot may be corrupted")]
    ChecksumMismatch,

    #[error("Model mismatch: snapshot uses a different embedding model")]
    ModelMismatch,

    #[error("Dimension mismatch: expected {expected}, snapshot has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid utf-8 in snapshot: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("trailing bytes after snapshot body")]
    TrailingBytes,
}

/// Decoded snapshot contents.
#[derive(Debug)]
pub struct Snapshot {
    pub model_id: [u8; 32],
    pub dimensions: usize,
    pub documents: Vec<IndexedDocument>,
}

/// Header fields carried alongside the documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub model_id: [u8; 32],
    pub dimensions: u16,
}

pub fn encode<'a>(
    header: SnapshotHeader,
    documents: impl ExactSizeIterator<Item = &'a IndexedDocument>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);

    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&header.model_id);
    buf.extend_from_slice(&header.dimensions.to_le_bytes());
    buf.extend_from_slice(&(documents.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    let body_start = buf.len();
    for doc in documents {
        write_entry(&mut buf, doc, header.dimensions as usize);
    }

    let body_checksum = crc32fast::hash(&buf[body_start..]);
    buf.extend_from_slice(&body_checksum.to_le_bytes());

    buf
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(SnapshotError::Truncated);
    }

    let header = &bytes[..HEADER_SIZE];
    if &header[0..4] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let version = header[4];
    if version > FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([header[47], header[48], header[49], header[50]]);
    if crc32fast::hash(&header[0..47]) != stored_checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header[5..37]);
    let dimensions = u16::from_le_bytes([header[37], header[38]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[39..47]);
    let entry_count = u64::from_le_bytes(count_bytes);

    let body = &bytes[HEADER_SIZE..bytes.len() - 4];
    let trailer = &bytes[bytes.len() - 4..];
    let stored_body_checksum = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != stored_body_checksum {
        return Err(SnapshotError::ChecksumMismatch);
    }

    let mut reader = Cursor::new(body);
    // entry_count is untrusted; cap the preallocation
    let mut documents = Vec::with_capacity(entry_count.min(4096) as usize);
    for _ in 0..entry_count {
        documents.push(read_entry(&mut reader, dimensions)?);
    }

    if (reader.position() as usize) != body.len() {
        return Err(SnapshotError::TrailingBytes);
    }

    Ok(Snapshot {
        model_id,
        dimensions,
        documents,
    })
}

fn write_entry(buf: &mut Vec<u8>, doc: &IndexedDocument, dimensions: usize) {
    write_str(buf, &doc.id);
    write_str(buf, &doc.title);
    write_opt_str(buf, doc.summary.as_deref());
    write_opt_str(buf, doc.long_summary.as_deref());
    write_str(buf, &doc.category);
    write_str(buf, &doc.source);
    write_opt_str(buf, doc.created_at.as_deref());

    match doc.embedding.as_deref() {
        Some(embedding) if dimensions > 0 && embedding.len() == dimensions => {
            buf.push(1);
            for value in embedding {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        _ => buf.push(0),
    }
}

fn write_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn write_opt_str(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(value) => {
            buf.push(1);
            write_str(buf, value);
        }
        None => buf.push(0),
    }
}

fn read_entry(
    reader: &mut Cursor<&[u8]>,
    dimensions: usize,
) -> Result<IndexedDocument, SnapshotError> {
    let id = read_str(reader)?;
    let title = read_str(reader)?;
    let summary = read_opt_str(reader)?;
    let long_summary = read_opt_str(reader)?;
    let category = read_str(reader)?;
    let source = read_str(reader)?;
    let created_at = read_opt_str(reader)?;

    let embedding = if read_flag(reader)? {
        if dimensions == 0 {
            return Err(SnapshotError::DimensionMismatch {
                expected: 0,
                got: 1,
            });
        }
        let mut embedding = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let mut float_bytes = [0u8; 4];
            read_exact(reader, &mut float_bytes)?;
            embedding.push(f32::from_le_bytes(float_bytes));
        }
        Some(embedding)
    } else {
        None
    };

    Ok(IndexedDocument {
        id,
        title,
        summary,
        long_summary,
        category,
        source,
        created_at,
        embedding,
    })
}

fn read_exact(reader: &mut Cursor<&[u8]>, buf: &mut [u8]) -> Result<(), SnapshotError> {
    reader.read_exact(buf).map_err(|_| SnapshotError::Truncated)
}

fn read_flag(reader: &mut Cursor<&[u8]>) -> Result<bool, SnapshotError> {
    let mut flag = [0u8; 1];
    read_exact(reader, &mut flag)?;
    Ok(flag[0] != 0)
}

fn read_str(reader: &mut Cursor<&[u8]>) -> Result<String, SnapshotError> {
    let mut len_bytes = [0u8; 4];
    read_exact(reader, &mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    let remaining = reader.get_ref().len() - reader.position() as usize;
    if len > remaining {
        return Err(SnapshotError::Truncated);
    }

    let mut bytes = vec![0u8; len];
    read_exact(reader, &mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

fn read_opt_str(reader: &mut Cursor<&[u8]>) -> Result<Option<String>, SnapshotError> {
    if read_flag(reader)? {
        Ok(Some(read_str(reader)?))
    } else {
        Ok(None)
    }
}
