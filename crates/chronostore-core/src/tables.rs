//! Small flat table files read eagerly at startup.
//!
//! ```text
//! token table:  i32 count, then count × (i32 key, u8 token)
//! int table:    i32 count, then count × (i32 key, i32 value)
//! ```
//!
//! All integers are big-endian. Entries are written in ascending key order.

use std::path::Path;

use chronostore_error::{ChronoError, Result};
use chronostore_spine::{ByteReader, put_i32, read_optional, write_atomic};

/// Read a `(key, token)` table; a missing file is an empty table.
pub fn read_token_table(path: &Path) -> Result<Vec<(i32, u8)>> {
    read_table(path, 5, |reader| {
        let key = reader.read_i32()?;
        let token = reader.read_u8()?;
        Ok((key, token))
    })
}

/// Read a `(key, value)` table; a missing file is an empty table.
pub fn read_int_table(path: &Path) -> Result<Vec<(i32, i32)>> {
    read_table(path, 8, |reader| {
        let key = reader.read_i32()?;
        let value = reader.read_i32()?;
        Ok((key, value))
    })
}

pub fn write_token_table(path: &Path, entries: &[(i32, u8)]) -> Result<()> {
    let mut sorted = entries.to_vec();
    sorted.sort_unstable_by_key(|(key, _)| *key);
    let mut out = Vec::with_capacity(4 + sorted.len() * 5);
    put_count(&mut out, sorted.len());
    for (key, token) in sorted {
        put_i32(&mut out, key);
        out.push(token);
    }
    write_atomic(path, &out)
}

pub fn write_int_table(path: &Path, entries: &[(i32, i32)]) -> Result<()> {
    let mut sorted = entries.to_vec();
    sorted.sort_unstable_by_key(|(key, _)| *key);
    let mut out = Vec::with_capacity(4 + sorted.len() * 8);
    put_count(&mut out, sorted.len());
    for (key, value) in sorted {
        put_i32(&mut out, key);
        put_i32(&mut out, value);
    }
    write_atomic(path, &out)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn put_count(out: &mut Vec<u8>, count: usize) {
    put_i32(out, count as i32);
}

fn read_table<E>(
    path: &Path,
    entry_width: usize,
    read_entry: impl FnMut(&mut ByteReader<'_>) -> Result<E>,
) -> Result<Vec<E>> {
    let Some(bytes) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    decode_table(&bytes, path, entry_width, read_entry).map_err(|err| match err {
        ChronoError::SpineCorrupt { path, detail } => ChronoError::TableCorrupt { path, detail },
        other => other,
    })
}

fn decode_table<E>(
    bytes: &[u8],
    path: &Path,
    entry_width: usize,
    mut read_entry: impl FnMut(&mut ByteReader<'_>) -> Result<E>,
) -> Result<Vec<E>> {
    let mut reader = ByteReader::new(bytes, path);
    let count = reader.read_i32()?;
    let count =
        usize::try_from(count).map_err(|_| reader.corrupt(format!("negative entry count {count}")))?;
    if count.saturating_mul(entry_width) != reader.remaining() {
        return Err(reader.corrupt(format!(
            "{count} entries need {} bytes, file holds {}",
            count.saturating_mul(entry_width),
            reader.remaining()
        )));
    }
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(read_entry(&mut reader)?);
    }
    reader.finish()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn missing_tables_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_token_table(&dir.path().join("none")).unwrap().is_empty());
        assert!(read_int_table(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn token_table_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assemblageToTypeMap");
        write_token_table(&path, &[(-5, 2), (-100, 1)]).unwrap();

        let raw = fs::read(&path).unwrap();
        assert_eq!(raw.len(), 4 + 2 * 5);
        assert_eq!(&raw[..4], &[0, 0, 0, 2]);
        assert_eq!(&raw[4..9], &[0xFF, 0xFF, 0xFF, 0x9C, 1]);
        assert_eq!(read_token_table(&path).unwrap(), vec![(-100, 1), (-5, 2)]);
    }

    #[test]
    fn int_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sequenceGeneratorMap");
        write_int_table(&path, &[(-100, 7), (-200, 1)]).unwrap();
        assert_eq!(read_int_table(&path).unwrap(), vec![(-200, 1), (-100, 7)]);
    }

    #[test]
    fn short_table_is_table_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t");
        fs::write(&path, [0, 0, 0, 3, 0xFF, 0xFF, 0xFF, 0xFF, 1]).unwrap();
        let err = read_token_table(&path).unwrap_err();
        assert!(matches!(err, ChronoError::TableCorrupt { .. }));
        assert!(err.is_corruption());
    }
}
