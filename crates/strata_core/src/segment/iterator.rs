//! Sequential marker scanning.

use super::marker::{verify_marker, MarkerHeader, MarkerType, MARKER_HEADER_SIZE};
use crate::error::CoreResult;

/// One marker inside a scanned buffer.
#[derive(Debug, Clone, Copy)]
pub struct MarkerRef<'a> {
    /// Offset of the marker within its segment.
    pub offset: u64,
    /// Decoded header.
    pub header: MarkerHeader,
    /// The unpadded marker bytes, header included.
    pub bytes: &'a [u8],
}

impl<'a> MarkerRef<'a> {
    /// Marker type.
    #[must_use]
    pub fn marker_type(&self) -> MarkerType {
        self.header.marker_type
    }

    /// Bytes after the header.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[MARKER_HEADER_SIZE..]
    }

    /// Size on disk, padding included.
    #[must_use]
    pub fn aligned_size(&self) -> u64 {
        self.header.aligned_size()
    }
}

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// A footer marker closed the segment.
    Footer,
    /// The data ended cleanly (end of buffer or zero padding).
    EndOfData,
    /// A marker ran past the end of the buffer.
    Truncated {
        /// Offset of the incomplete marker.
        offset: u64,
    },
    /// A damaged marker stopped the scan.
    Corrupt {
        /// Offset of the damaged marker.
        offset: u64,
    },
}

/// Iterates over the markers of a segment image.
///
/// Iteration yields `Err` at most once, for a marker that fails its
/// checksum or has an impossible header, and then stops. A marker whose
/// declared size runs past the end of the data ends the scan quietly with
/// [`ScanEnd::Truncated`].
#[derive(Debug)]
pub struct MarkerIterator<'a> {
    data: &'a [u8],
    offset: usize,
    end: Option<ScanEnd>,
}

impl<'a> MarkerIterator<'a> {
    /// Starts scanning `data` at offset 0.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            end: None,
        }
    }

    /// Returns why iteration stopped, once it has.
    #[must_use]
    pub fn end(&self) -> Option<ScanEnd> {
        self.end
    }

    /// Offset just past the last marker yielded successfully.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset as u64
    }

    fn finish(&mut self, end: ScanEnd) -> Option<CoreResult<MarkerRef<'a>>> {
        self.end = Some(end);
        None
    }
}

impl<'a> Iterator for MarkerIterator<'a> {
    type Item = CoreResult<MarkerRef<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }

        let start = self.offset;
        let rest = &self.data[start..];
        if rest.is_empty() {
            return self.finish(ScanEnd::EndOfData);
        }
        if rest.len() < MARKER_HEADER_SIZE {
            return if rest.iter().all(|b| *b == 0) {
                self.finish(ScanEnd::EndOfData)
            } else {
                self.finish(ScanEnd::Truncated {
                    offset: start as u64,
                })
            };
        }

        let size = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if size == 0 {
            return self.finish(ScanEnd::EndOfData);
        }
        if size > rest.len() {
            return self.finish(ScanEnd::Truncated {
                offset: start as u64,
            });
        }

        let checked = MarkerHeader::decode(rest).and_then(|header| {
            verify_marker(&header, &rest[..size])?;
            Ok(header)
        });
        let header = match checked {
            Ok(header) => header,
            Err(err) => {
                self.end = Some(ScanEnd::Corrupt {
                    offset: start as u64,
                });
                return Some(Err(err));
            }
        };

        let advance = usize::try_from(header.aligned_size()).unwrap_or(usize::MAX);
        self.offset = start.saturating_add(advance).min(self.data.len());
        if header.marker_type == MarkerType::Footer {
            self.end = Some(ScanEnd::Footer);
        }

        Some(Ok(MarkerRef {
            offset: start as u64,
            header,
            bytes: &rest[..size],
        }))
    }
}
