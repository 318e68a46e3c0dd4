//! Marker encoding.
//!
//! ```text
//! | size (4) | crc (4) | type (1) + tick (7) | payload (size - 16) | padding to 8 |
//! ```
//!
//! `size` excludes the padding. The CRC-32 covers the first `size` bytes
//! with the crc field zeroed. Type and tick share one little-endian u64:
//! the type lives in the top byte, the tick in the low 56 bits.

use crate::error::{CoreError, CoreResult};
use crate::types::{CollectionId, SegmentId, MAX_TICK};
use crc32fast::Hasher;

/// Size of the common marker header.
pub const MARKER_HEADER_SIZE: usize = 16;

/// Alignment of every marker on disk.
pub const MARKER_ALIGNMENT: u64 = 8;

/// Segment format version written into every header marker.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the segment header marker.
pub const DATAFILE_HEADER_SIZE: u64 = 32;

/// Size of the collection header marker.
pub const COLLECTION_HEADER_SIZE: u64 = 24;

/// Size of the footer marker.
pub const FOOTER_SIZE: u64 = MARKER_HEADER_SIZE as u64;

/// Bytes taken by the two leading markers of every segment.
pub const SEGMENT_OVERHEAD: u64 = DATAFILE_HEADER_SIZE + COLLECTION_HEADER_SIZE;

/// Rounds `size` up to the marker alignment.
#[must_use]
pub const fn aligned_size(size: u64) -> u64 {
    (size + MARKER_ALIGNMENT - 1) & !(MARKER_ALIGNMENT - 1)
}

/// Marker type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MarkerType {
    /// First marker of every segment.
    Header = 10,
    /// Last marker of a sealed segment.
    Footer = 11,
    /// Padding, skipped on replay.
    Blank = 12,
    /// Names the owning collection.
    CollectionHeader = 20,
    /// A full document body.
    Document = 30,
    /// A tombstone.
    Remove = 31,
}

impl MarkerType {
    /// Decodes a type tag.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            10 => Some(Self::Header),
            11 => Some(Self::Footer),
            12 => Some(Self::Blank),
            20 => Some(Self::CollectionHeader),
            30 => Some(Self::Document),
            31 => Some(Self::Remove),
            _ => None,
        }
    }

    /// Returns the type tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for markers that carry document data.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Document | Self::Remove)
    }

    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Footer => "footer",
            Self::Blank => "blank",
            Self::CollectionHeader => "collection-header",
            Self::Document => "document",
            Self::Remove => "remove",
        }
    }
}

/// The fixed header shared by all markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerHeader {
    /// Unpadded marker size, header included.
    pub size: u32,
    /// Stored checksum.
    pub crc: u32,
    /// Marker type.
    pub marker_type: MarkerType,
    /// Tick at which the marker was written.
    pub tick: u64,
}

impl MarkerHeader {
    /// Decodes a header from the first 16 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the input is short, the size is smaller
    /// than a header, or the type tag is unknown.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < MARKER_HEADER_SIZE {
            return Err(CoreError::corrupt(format!(
                "marker header needs {MARKER_HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let size = read_u32(bytes, 0);
        let crc = read_u32(bytes, 4);
        let type_and_tick = read_u64(bytes, 8);

        if (size as usize) < MARKER_HEADER_SIZE {
            return Err(CoreError::corrupt(format!("marker size {size} is below header size")));
        }
        // Top byte of the u64 is the type tag.
        let tag = (type_and_tick >> 56) as u8;
        let marker_type = MarkerType::from_byte(tag)
            .ok_or_else(|| CoreError::corrupt(format!("unknown marker type {tag}")))?;

        Ok(Self {
            size,
            crc,
            marker_type,
            tick: type_and_tick & MAX_TICK,
        })
    }

    /// Size the marker occupies on disk, padding included.
    #[must_use]
    pub const fn aligned_size(&self) -> u64 {
        aligned_size(self.size as u64)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn marker_crc(marker: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&marker[..4]);
    hasher.update(&[0u8; 4]);
    hasher.update(&marker[8..]);
    hasher.finalize()
}

/// Builds a complete, padded marker.
///
/// # Errors
///
/// Returns `InvalidArgument` if the tick exceeds 56 bits or the payload is
/// too large for a u32 size field.
pub fn encode_marker(marker_type: MarkerType, tick: u64, payload: &[u8]) -> CoreResult<Vec<u8>> {
    if tick > MAX_TICK {
        return Err(CoreError::invalid_argument(format!(
            "tick {tick} does not fit a marker header"
        )));
    }
    let size = u32::try_from(MARKER_HEADER_SIZE + payload.len()).map_err(|_| {
        CoreError::invalid_argument(format!("marker payload of {} bytes is too large", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(aligned_size(u64::from(size)) as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    let type_and_tick = (u64::from(marker_type.as_byte()) << 56) | tick;
    buf.extend_from_slice(&type_and_tick.to_le_bytes());
    buf.extend_from_slice(payload);

    let crc = marker_crc(&buf);
    buf[4..8].copy_from_slice(&crc.to_le_bytes());
    buf.resize(aligned_size(u64::from(size)) as usize, 0);
    Ok(buf)
}

/// Checks the CRC of an unpadded marker.
///
/// # Errors
///
/// Returns `ChecksumMismatch` on a mismatch.
pub fn verify_marker(header: &MarkerHeader, marker: &[u8]) -> CoreResult<()> {
    let actual = marker_crc(marker);
    if actual != header.crc {
        return Err(CoreError::ChecksumMismatch {
            expected: header.crc,
            actual,
        });
    }
    Ok(())
}

/// Payload of the header marker that opens every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatafileHeader {
    /// Format version.
    pub version: u32,
    /// Maximum size the segment may grow to.
    pub max_size: u32,
    /// Segment id.
    pub segment_id: SegmentId,
}

impl DatafileHeader {
    /// Encodes the complete header marker.
    ///
    /// # Errors
    ///
    /// See [`encode_marker`].
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&self.version.to_le_bytes());
        payload.extend_from_slice(&self.max_size.to_le_bytes());
        payload.extend_from_slice(&self.segment_id.as_u64().to_le_bytes());
        encode_marker(MarkerType::Header, self.segment_id.as_u64() & MAX_TICK, &payload)
    }

    /// Decodes a header marker payload.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` for a short payload or an unsupported version.
    pub fn decode_payload(payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < 16 {
            return Err(CoreError::corrupt("segment header payload too short"));
        }
        let version = read_u32(payload, 0);
        if version != FORMAT_VERSION {
            return Err(CoreError::corrupt(format!(
                "unsupported segment format version {version}"
            )));
        }
        Ok(Self {
            version,
            max_size: read_u32(payload, 4),
            segment_id: SegmentId::new(read_u64(payload, 8)),
        })
    }
}

/// Encodes the collection header marker.
///
/// # Errors
///
/// See [`encode_marker`].
pub fn encode_collection_header(collection: CollectionId, tick: u64) -> CoreResult<Vec<u8>> {
    encode_marker(
        MarkerType::CollectionHeader,
        tick,
        &collection.as_u64().to_le_bytes(),
    )
}

/// Decodes a collection header marker payload.
///
/// # Errors
///
/// Returns `CorruptData` for a short payload.
pub fn decode_collection_header(payload: &[u8]) -> CoreResult<CollectionId> {
    if payload.len() < 8 {
        return Err(CoreError::corrupt("collection header payload too short"));
    }
    Ok(CollectionId::new(read_u64(payload, 0)))
}

/// Encodes a footer marker.
///
/// # Errors
///
/// See [`encode_marker`].
pub fn encode_footer(tick: u64) -> CoreResult<Vec<u8>> {
    encode_marker(MarkerType::Footer, tick, &[])
}
