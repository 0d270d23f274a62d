//! # Firmware Parsing Seam
//!
//! A [`FirmwareParser`] turns raw image bytes into a [`ParsedFirmware`]: a
//! list of [`Region`]s, each flagged volatile or not, plus the BIOS
//! identification found in the image.
//!
//! The **stable hash** of an image covers only its non-volatile regions.
//! Two images that differ only in volatile data (NVRAM variables, event
//! logs, padding the platform rewrites at boot) share a stable hash.
//!
//! Parsing is CPU-bound and synchronous; async callers run it on the
//! blocking pool.

use std::ops::Range;

use fwa_core::{BiosInfo, HashValue};

use crate::error::ParseError;

/// Marker preceding the BIOS identification string in a flat image.
pub const BIOS_INFO_MARKER: &[u8] = b"$BIOSINFO$";

const BIOS_INFO_MAX_LEN: usize = 256;

/// A contiguous span of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub offset: usize,
    pub len: usize,
    /// Contents may change without changing what the firmware does.
    pub volatile: bool,
}

impl Region {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Structure extracted from an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFirmware {
    /// Regions in offset order.
    pub regions: Vec<Region>,
    pub bios_info: BiosInfo,
}

impl ParsedFirmware {
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Bytes of `region` within `image`, if the region fits.
    pub fn region_bytes<'a>(&self, image: &'a [u8], region: &Region) -> Option<&'a [u8]> {
        image.get(region.range())
    }

    pub fn non_volatile(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| !r.volatile)
    }

    /// BLAKE3 over the offset, length and bytes of every non-volatile
    /// region of `image`.
    pub fn stable_hash(&self, image: &[u8]) -> HashValue {
        let mut hasher = blake3::Hasher::new();
        for region in self.non_volatile() {
            hasher.update(&(region.offset as u64).to_le_bytes());
            hasher.update(&(region.len as u64).to_le_bytes());
            if let Some(bytes) = self.region_bytes(image, region) {
                hasher.update(bytes);
            }
        }
        HashValue::new(hasher.finalize().as_bytes().to_vec())
    }
}

/// Parses raw image bytes.
pub trait FirmwareParser: Send + Sync {
    fn parse(&self, image: &[u8]) -> Result<ParsedFirmware, ParseError>;
}

/// Parser for flat images with a fixed, configured layout.
///
/// Configured volatile ranges become volatile regions; the gaps between
/// them become non-volatile `body` regions. BIOS identification is read
/// from a `$BIOSINFO$` marker followed by `key=value` pairs separated by
/// `;` and terminated by NUL, e.g.
/// `$BIOSINFO$vendor=Acme;version=1.4.2;date=2024-03-01\0`.
#[derive(Debug, Clone, Default)]
pub struct FlatImageParser {
    volatile: Vec<(String, Range<usize>)>,
}

impl FlatImageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `range` as volatile. Ranges past the end of an image are
    /// clipped at parse time.
    pub fn with_volatile_region(mut self, name: impl Into<String>, range: Range<usize>) -> Self {
        self.volatile.push((name.into(), range));
        self
    }

    fn layout(&self, len: usize) -> Result<Vec<Region>, ParseError> {
        let mut volatile: Vec<(&str, Range<usize>)> = self
            .volatile
            .iter()
            .map(|(name, r)| (name.as_str(), r.start.min(len)..r.end.min(len)))
            .filter(|(_, r)| !r.is_empty())
            .collect();
        volatile.sort_by_key(|(_, r)| r.start);

        let mut regions = Vec::with_capacity(volatile.len() * 2 + 1);
        let mut cursor = 0;
        for (name, range) in volatile {
            if range.start < cursor {
                return Err(ParseError::Layout(format!(
                    "volatile region {name} overlaps the previous region at offset {}",
                    range.start
                )));
            }
            if range.start > cursor {
                regions.push(body_region(regions.len(), cursor, range.start));
            }
            regions.push(Region {
                name: name.to_string(),
                offset: range.start,
                len: range.len(),
                volatile: true,
            });
            cursor = range.end;
        }
        if cursor < len {
            regions.push(body_region(regions.len(), cursor, len));
        }
        Ok(regions)
    }
}

fn body_region(index: usize, start: usize, end: usize) -> Region {
    Region {
        name: format!("body{index}"),
        offset: start,
        len: end - start,
        volatile: false,
    }
}

impl FirmwareParser for FlatImageParser {
    fn parse(&self, image: &[u8]) -> Result<ParsedFirmware, ParseError> {
        if image.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(ParsedFirmware {
            regions: self.layout(image.len())?,
            bios_info: read_bios_info(image),
        })
    }
}

/// Extract BIOS identification from the first `$BIOSINFO$` marker.
/// Images without one yield an empty [`BiosInfo`].
pub fn read_bios_info(image: &[u8]) -> BiosInfo {
    let mut info = BiosInfo::default();
    let Some(start) = image
        .windows(BIOS_INFO_MARKER.len())
        .position(|w| w == BIOS_INFO_MARKER)
        .map(|p| p + BIOS_INFO_MARKER.len())
    else {
        return info;
    };
    let tail = &image[start..image.len().min(start + BIOS_INFO_MAX_LEN)];
    let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
    let text = String::from_utf8_lossy(&tail[..end]);

    for pair in text.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "vendor" => info.vendor = Some(value.to_string()),
            "version" => info.version = Some(value.to_string()),
            "date" | "release_date" => info.release_date = Some(value.to_string()),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_image_rejected() {
        assert_eq!(FlatImageParser::new().parse(b""), Err(ParseError::Empty));
    }

    #[test]
    fn test_layout_alternates_body_and_volatile() {
        let parser = FlatImageParser::new()
            .with_volatile_region("nvram", 4..8)
            .with_volatile_region("log", 12..100);
        let parsed = parser.parse(&[0u8; 16]).unwrap();
        let shape: Vec<_> = parsed
            .regions
            .iter()
            .map(|r| (r.offset, r.len, r.volatile))
            .collect();
        assert_eq!(shape, vec![(0, 4, false), (4, 4, true), (8, 4, false), (12, 4, true)]);
        assert_eq!(parsed.region("nvram").unwrap().range(), 4..8);
    }

    #[test]
    fn test_overlapping_volatile_regions_rejected() {
        let parser = FlatImageParser::new()
            .with_volatile_region("a", 0..8)
            .with_volatile_region("b", 4..10);
        assert!(matches!(parser.parse(&[0u8; 16]), Err(ParseError::Layout(_))));
    }

    #[test]
    fn test_stable_hash_ignores_volatile_bytes() {
        let parser = FlatImageParser::new().with_volatile_region("nvram", 4..8);
        let a = b"codeAAAAcode".to_vec();
        let b = b"codeBBBBcode".to_vec();
        let c = b"CODEAAAAcode".to_vec();
        let hash = |img: &[u8]| parser.parse(img).unwrap().stable_hash(img);
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(hash(&a), hash(&c));
    }

    #[test]
    fn test_bios_info_extraction() {
        let image = b"\xff\xff$BIOSINFO$vendor=Acme;version=1.4.2;date=2024-03-01\0trailing";
        let info = read_bios_info(image);
        assert_eq!(info.vendor.as_deref(), Some("Acme"));
        assert_eq!(info.version.as_deref(), Some("1.4.2"));
        assert_eq!(info.release_date.as_deref(), Some("2024-03-01"));

        assert_eq!(read_bios_info(b"no marker here"), BiosInfo::default());
    }
}
