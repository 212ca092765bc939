// MFT file record parsing
// Fix-up resolution plus the attribute walk that yields names, sizes and
// timestamps; all pure functions over record buffers

use super::data_runs::DataRunIter;
use findex_core::FILETIME_TICKS_PER_MINUTE;

/// MFT records are fixed at 1 KiB on every volume that matters.
pub const FILE_RECORD_SIZE: usize = 1024;
/// Fix-up stamps protect each 512-byte chunk of a record.
pub const FIXUP_SECTOR_SIZE: usize = 512;
/// The NTFS root directory always lives in record 5.
pub const ROOT_RECORD_NUMBER: u32 = 5;

const FILE_MAGIC: &[u8; 4] = b"FILE";

const FLAG_IN_USE: u16 = 0x01;
const FLAG_DIRECTORY: u16 = 0x02;

const ATTR_STANDARD_INFORMATION: u32 = 0x10;
const ATTR_FILE_NAME: u32 = 0x30;
const ATTR_DATA: u32 = 0x80;
const ATTR_BITMAP: u32 = 0xB0;
const ATTR_END: u32 = 0xFFFF_FFFF;

/// Full attribute header for resident attributes is 24 bytes; the value
/// follows at `value_offset`.
const RESIDENT_HEADER_SIZE: u64 = 24;

const ATTR_FLAG_SPARSE: u16 = 0x8000;
/// $FILE_NAME namespace 2 is the DOS short name; those are aliases of the
/// Win32 name and never emitted.
const NAMESPACE_DOS: u8 = 2;

/// A name emitted by one $FILE_NAME attribute. A record carries one per
/// hard link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordName {
    pub name: String,
    pub parent_record: u32,
}

/// Everything the walker stages from one in-use file record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecord {
    pub record_number: u32,
    /// Nonzero when this record extends another record's attribute list;
    /// its size contribution belongs to the base record.
    pub base_record: u32,
    pub is_dir: bool,
    pub mtime_minutes: u32,
    pub size_bytes: u64,
    pub names: Vec<RecordName>,
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().ok()?))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(data.get(offset..offset + 4)?.try_into().ok()?))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(data.get(offset..offset + 8)?.try_into().ok()?))
}

/// Apply the update-sequence fix-up to a record in place.
///
/// The array at `update_sequence_offset` holds one check word followed by
/// one replacement word per 512-byte chunk. The last two bytes of every
/// chunk must equal the check word and are restored from the corresponding
/// replacement. Returns false (record must be dropped) on any mismatch.
pub fn apply_fixup(record: &mut [u8]) -> bool {
    let usa_offset = match read_u16(record, 4) {
        Some(v) => v as usize,
        None => return false,
    };
    let usa_count = match read_u16(record, 6) {
        Some(v) => v as usize,
        None => return false,
    };
    if usa_count < 2 || usa_offset + usa_count * 2 > record.len() {
        return false;
    }

    let check = [record[usa_offset], record[usa_offset + 1]];
    let max_sectors = record.len() / FIXUP_SECTOR_SIZE;
    let mut all_matched = true;
    for i in 1..usa_count.min(max_sectors + 1) {
        let sector_end = i * FIXUP_SECTOR_SIZE - 2;
        all_matched &= record[sector_end] == check[0] && record[sector_end + 1] == check[1];
        record[sector_end] = record[usa_offset + i * 2];
        record[sector_end + 1] = record[usa_offset + i * 2 + 1];
    }
    all_matched
}

/// Parse one fixed-up 1024-byte record.
///
/// Returns `None` for records that are free, foreign, or fail the fix-up.
/// Decoding oddities inside attributes never fail the whole record; the
/// walker prefers a partial entry over a dropped one. `volume_label`
/// replaces the root directory's on-disk name ".".
pub fn parse_file_record(
    record: &mut [u8],
    cluster_bytes: u32,
    volume_label: &str,
) -> Option<ParsedRecord> {
    if record.get(..4)? != FILE_MAGIC {
        return None;
    }
    let flags = read_u16(record, 22)?;
    if flags & FLAG_IN_USE == 0 {
        return None;
    }
    if !apply_fixup(record) {
        return None;
    }

    let mut parsed = ParsedRecord {
        record_number: read_u32(record, 44)?,
        base_record: (read_u64(record, 32)? & 0xFFFF_FFFF_FFFF) as u32,
        is_dir: flags & FLAG_DIRECTORY != 0,
        ..ParsedRecord::default()
    };

    let mut offset = read_u16(record, 20)? as usize;
    loop {
        let attr_type = match read_u32(record, offset) {
            Some(t) => t,
            None => break,
        };
        if attr_type == ATTR_END {
            break;
        }
        let attr_len = match read_u32(record, offset + 4) {
            Some(l) => l as usize,
            None => break,
        };
        if attr_len == 0 || offset + attr_len > record.len() {
            break;
        }
        let attr = &record[offset..offset + attr_len];

        match attr_type {
            ATTR_STANDARD_INFORMATION => {
                if let Some(value) = resident_value(attr) {
                    if let Some(altered) = read_u64(value, 8) {
                        parsed.mtime_minutes = (altered / FILETIME_TICKS_PER_MINUTE) as u32;
                    }
                }
            }
            ATTR_DATA => {
                parsed.size_bytes += data_attribute_size(attr, cluster_bytes);
            }
            ATTR_FILE_NAME => {
                if let Some(name) = parse_file_name_attribute(attr, volume_label) {
                    parsed.names.push(name);
                }
            }
            _ => {}
        }

        offset += attr_len;
    }

    Some(parsed)
}

/// Resident attribute value slice, or `None` for non-resident attributes.
fn resident_value(attr: &[u8]) -> Option<&[u8]> {
    if *attr.get(8)? != 0 {
        return None;
    }
    let value_len = read_u32(attr, 16)? as usize;
    let value_offset = read_u16(attr, 20)? as usize;
    attr.get(value_offset..value_offset + value_len)
}

/// Size contribution of one $DATA attribute.
fn data_attribute_size(attr: &[u8], cluster_bytes: u32) -> u64 {
    let non_resident = attr.get(8).copied().unwrap_or(0) != 0;
    if !non_resident {
        let total_len = read_u32(attr, 4).unwrap_or(0) as u64;
        let name_len = attr.get(9).copied().unwrap_or(0) as u64;
        return total_len.saturating_sub(RESIDENT_HEADER_SIZE + name_len);
    }

    let flags = read_u16(attr, 12).unwrap_or(0);
    if flags & ATTR_FLAG_SPARSE != 0 {
        // Sparse: charge only the allocated extents.
        let runs_offset = read_u16(attr, 32).unwrap_or(0) as usize;
        let runs = attr.get(runs_offset..).unwrap_or(&[]);
        return DataRunIter::new(runs).remaining_clusters() * cluster_bytes as u64;
    }

    let first_cluster = read_u64(attr, 16).unwrap_or(u64::MAX);
    if first_cluster == 0 {
        // Primary extent carries the whole stream's valid length.
        return read_u64(attr, 56).unwrap_or(0);
    }
    0
}

fn parse_file_name_attribute(attr: &[u8], volume_label: &str) -> Option<RecordName> {
    let value = resident_value(attr)?;
    let namespace = *value.get(65)?;
    if namespace == NAMESPACE_DOS {
        return None;
    }

    let parent_record = (read_u64(value, 0)? & 0xFFFF_FFFF_FFFF) as u32;
    let name_len = *value.get(64)? as usize;
    let name_bytes = value.get(66..66 + name_len * 2)?;
    let mut name: String = char::decode_utf16(
        name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
    )
    .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
    .collect();

    if name == "." {
        // The root directory names itself "."; present it as the volume.
        name = volume_label.to_string();
    }

    Some(RecordName { name, parent_record })
}

/// Where the MFT itself lives, read from record 0.
#[derive(Debug, Clone)]
pub struct MftGeometry {
    /// Runlist of the $MFT $DATA attribute.
    pub data_runs: Vec<u8>,
    /// Total record count, derived from the $BITMAP size.
    pub record_count: u64,
}

/// Extract the $MFT geometry from record 0 (as returned by the volume's
/// file-record control; no fix-up is applied to it).
pub fn mft_geometry(record: &[u8]) -> Option<MftGeometry> {
    let mut data_runs = None;
    let mut record_count = None;

    let mut offset = read_u16(record, 20)? as usize;
    loop {
        let attr_type = read_u32(record, offset)?;
        if attr_type == ATTR_END {
            break;
        }
        let attr_len = read_u32(record, offset + 4)? as usize;
        if attr_len == 0 || offset + attr_len > record.len() {
            break;
        }
        let attr = &record[offset..offset + attr_len];
        let non_resident = attr.get(8).copied().unwrap_or(0) != 0;

        if non_resident {
            match attr_type {
                ATTR_DATA => {
                    let runs_offset = read_u16(attr, 32)? as usize;
                    data_runs = Some(attr.get(runs_offset..)?.to_vec());
                }
                ATTR_BITMAP => {
                    // One bit per record.
                    record_count = Some(read_u64(attr, 48)? * 8);
                }
                _ => {}
            }
        }
        offset += attr_len;
    }

    Some(MftGeometry {
        data_runs: data_runs?,
        record_count: record_count?,
    })
}
