// Persisted-index codec
// Six little-endian i32 header fields followed by an LZ4 block blob that
// holds the packed entry array and the name arena

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use findex_core::{FileEntry, FileIndex, FindexError};
use log::warn;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Serialized width of one entry: parent_id, size, name_and_kind,
/// mtime_minutes.
pub const ENTRY_BYTES: usize = 20;

/// Write the index to `path`, replacing any previous file. Callers
/// serialize on the service's file mutex.
pub fn save_index(path: &Path, index: &FileIndex) -> Result<(), FindexError> {
    let file_count = index.entries.len();
    let name_table_size = index.names.len();
    let original_size = file_count * ENTRY_BYTES + name_table_size;

    let mut payload = Vec::with_capacity(original_size);
    for entry in &index.entries {
        payload.extend_from_slice(&entry.parent_id.to_le_bytes());
        payload.extend_from_slice(&{ entry.size }.to_le_bytes());
        payload.extend_from_slice(&entry.name_and_kind.to_le_bytes());
        payload.extend_from_slice(&entry.mtime_minutes.to_le_bytes());
    }
    payload.extend_from_slice(&index.names);

    let compressed = lz4_flex::block::compress(&payload);

    let mut out = BufWriter::new(File::create(path)?);
    out.write_i32::<LittleEndian>(original_size as i32)?;
    out.write_i32::<LittleEndian>(compressed.len() as i32)?;
    out.write_i32::<LittleEndian>(file_count as i32)?;
    out.write_i32::<LittleEndian>(name_table_size as i32)?;
    out.write_i32::<LittleEndian>(0)?;
    out.write_i32::<LittleEndian>((file_count * ENTRY_BYTES) as i32)?;
    out.write_all(&compressed)?;
    out.flush()?;
    Ok(())
}

/// Load an index from `path`.
///
/// A missing or corrupt file loads as an empty index (corruption is
/// logged); other I/O failures surface. Callers serialize on the
/// service's file mutex.
pub fn load_index(path: &Path) -> Result<FileIndex, FindexError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileIndex::default());
        }
        Err(e) => return Err(FindexError::Io(e)),
    };

    match read_index(file) {
        Ok(index) => Ok(index),
        Err(FindexError::CorruptIndexFile(reason)) => {
            warn!("Ignoring corrupt index file {}: {reason}", path.display());
            Ok(FileIndex::default())
        }
        Err(other) => Err(other),
    }
}

fn corrupt(reason: String) -> FindexError {
    FindexError::CorruptIndexFile(reason)
}

/// Strict parse; any inconsistency is corruption.
fn read_index(file: File) -> Result<FileIndex, FindexError> {
    let mut reader = BufReader::new(file);

    let original_size = read_header_field(&mut reader, "original_size")?;
    let compressed_size = read_header_field(&mut reader, "compressed_size")?;
    let file_count = read_header_field(&mut reader, "file_count")?;
    let name_table_size = read_header_field(&mut reader, "name_table_size")?;
    let files_offset = read_header_field(&mut reader, "files_offset")?;
    let names_offset = read_header_field(&mut reader, "names_offset")?;

    if files_offset != 0
        || names_offset != file_count * ENTRY_BYTES
        || original_size != file_count * ENTRY_BYTES + name_table_size
    {
        return Err(corrupt(format!(
            "inconsistent header (count {file_count}, names {name_table_size}, \
             offsets {files_offset}/{names_offset})"
        )));
    }

    let mut compressed = vec![0u8; compressed_size];
    reader
        .read_exact(&mut compressed)
        .map_err(|e| corrupt(format!("short compressed blob: {e}")))?;

    let payload = lz4_flex::block::decompress(&compressed, original_size)
        .map_err(|e| corrupt(format!("decompression failed: {e}")))?;
    if payload.len() != original_size {
        return Err(corrupt(format!(
            "decompressed {} bytes, expected {original_size}",
            payload.len()
        )));
    }

    let mut entries = Vec::with_capacity(file_count);
    for chunk in payload[..names_offset].chunks_exact(ENTRY_BYTES) {
        entries.push(FileEntry {
            parent_id: u32::from_le_bytes(chunk[0..4].try_into().unwrap_or_default()),
            size: u64::from_le_bytes(chunk[4..12].try_into().unwrap_or_default()),
            name_and_kind: u32::from_le_bytes(chunk[12..16].try_into().unwrap_or_default()),
            mtime_minutes: u32::from_le_bytes(chunk[16..20].try_into().unwrap_or_default()),
        });
    }

    let mut index = FileIndex {
        entries,
        names: payload[names_offset..].to_vec(),
        lower_names: Vec::new(),
    };
    index.rebuild_lower_names();
    Ok(index)
}

fn read_header_field(reader: &mut impl Read, field: &str) -> Result<usize, FindexError> {
    let value = reader
        .read_i32::<LittleEndian>()
        .map_err(|e| corrupt(format!("truncated header at {field}: {e}")))?;
    if value < 0 {
        return Err(corrupt(format!("negative {field}: {value}")));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use findex_core::DIR_BIT;

    fn add_name(names: &mut Vec<u8>, s: &str) -> u32 {
        let offset = names.len() as u32;
        names.extend_from_slice(s.as_bytes());
        names.push(0);
        offset
    }

    fn sample_index() -> FileIndex {
        let mut names = vec![0u8];
        let root = add_name(&mut names, "C:");
        let a = add_name(&mut names, "alpha.TXT");
        let b = add_name(&mut names, "beta");
        let c = add_name(&mut names, "gamma.log");
        let d = add_name(&mut names, "delta");
        let entries = vec![
            FileEntry { parent_id: 0, size: 1 << 40, name_and_kind: root | DIR_BIT, mtime_minutes: 1 },
            FileEntry { parent_id: 0, size: 12, name_and_kind: a, mtime_minutes: 27_000_000 },
            FileEntry { parent_id: 0, size: (1 << 40) - 22, name_and_kind: b | DIR_BIT, mtime_minutes: 3 },
            FileEntry { parent_id: 2, size: 10, name_and_kind: c, mtime_minutes: 4 },
            FileEntry { parent_id: 2, size: (1 << 40) - 32, name_and_kind: d, mtime_minutes: 5 },
        ];
        let mut index = FileIndex { entries, names, lower_names: Vec::new() };
        index.rebuild_lower_names();
        index
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let index = sample_index();
        save_index(&path, &index).unwrap();
        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn header_layout_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        let index = sample_index();
        save_index(&path, &index).unwrap();

        let raw = std::fs::read(&path).unwrap();
        let field = |i: usize| {
            i32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap())
        };
        let expected_original = (index.entries.len() * ENTRY_BYTES + index.names.len()) as i32;
        assert_eq!(field(0), expected_original);
        assert_eq!(field(1) as usize, raw.len() - 24);
        assert_eq!(field(2), index.entries.len() as i32);
        assert_eq!(field(3), index.names.len() as i32);
        assert_eq!(field(4), 0);
        assert_eq!(field(5), (index.entries.len() * ENTRY_BYTES) as i32);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_index(&dir.path().join("absent.bin")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_blob_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_index(&path, &sample_index()).unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        for byte in raw.iter_mut().skip(24) {
            *byte = 0xFF;
        }
        std::fs::write(&path, &raw).unwrap();

        assert!(load_index(&path).unwrap().is_empty());
    }

    #[test]
    fn inconsistent_header_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_index(&path, &sample_index()).unwrap();

        let mut raw = std::fs::read(&path).unwrap();
        raw[8..12].copy_from_slice(&9999i32.to_le_bytes());
        std::fs::write(&path, &raw).unwrap();

        assert!(load_index(&path).unwrap().is_empty());
    }

    #[test]
    fn truncated_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_index(&path, &sample_index()).unwrap();

        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..10]).unwrap();

        assert!(load_index(&path).unwrap().is_empty());
    }

    #[test]
    fn empty_index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        save_index(&path, &FileIndex::default()).unwrap();
        assert!(load_index(&path).unwrap().is_empty());
    }
}
