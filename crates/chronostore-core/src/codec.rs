//! Chronicle framing.
//!
//! An entity's canonical form is one buffer:
//!
//! ```text
//! header bytes | L1 payload1 | L2 payload2 | ... | 0x00000000
//!              ^ versions_start
//! ```
//!
//! where each `Ln` is a big-endian `i32` counting the whole version record,
//! its own four bytes included. The stored form is a list of byte arrays:
//! the header prefixed with four zero bytes, then each version record copied
//! whole (length prefix included). The terminator is not stored.
//!
//! Storing records separately means a new version is an append to the list,
//! never a rewrite of earlier bytes.

use chronostore_error::{ChronoError, Result};
use chronostore_spine::ByteArrays;

/// Width of a version length field and of the header / terminator markers.
pub const LENGTH_FIELD: usize = 4;

const ZERO_MARKER: [u8; LENGTH_FIELD] = [0; LENGTH_FIELD];

/// Split a canonical buffer into its stored byte-array list.
pub fn encode_chronicle(data: &[u8], versions_start: usize) -> Result<ByteArrays> {
    if versions_start > data.len() {
        return Err(ChronoError::chronicle_corrupt(format!(
            "version offset {versions_start} beyond buffer of {} bytes",
            data.len()
        )));
    }

    let mut header = Vec::with_capacity(LENGTH_FIELD + versions_start);
    header.extend_from_slice(&ZERO_MARKER);
    header.extend_from_slice(&data[..versions_start]);

    let mut records = vec![header];
    for record in VersionRecords::new(data, versions_start) {
        records.push(record?.to_vec());
    }
    Ok(records)
}

/// Rebuild the canonical buffer from the stored byte-array list.
pub fn decode_chronicle(records: &[Vec<u8>]) -> Result<Vec<u8>> {
    let Some((header, versions)) = records.split_first() else {
        return Err(ChronoError::chronicle_corrupt("stored chronicle has no header record"));
    };
    if header.len() < LENGTH_FIELD || header[..LENGTH_FIELD] != ZERO_MARKER {
        return Err(ChronoError::chronicle_corrupt(
            "header record is missing its zero-length marker",
        ));
    }

    let total = records.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&header[LENGTH_FIELD..]);
    for (position, record) in versions.iter().enumerate() {
        check_stored_version(record, position)?;
        out.extend_from_slice(record);
    }
    out.extend_from_slice(&ZERO_MARKER);
    Ok(out)
}

/// Merge a freshly encoded chronicle into the stored one.
///
/// The new header replaces the stored header. Stored versions keep their
/// order; incoming versions that are not byte-identical to a stored version
/// are appended in their incoming order.
#[must_use]
pub fn merge_chronicle(stored: Option<&ByteArrays>, incoming: ByteArrays) -> ByteArrays {
    let Some(stored) = stored.filter(|stored| !stored.is_empty()) else {
        return incoming;
    };
    let mut incoming = incoming.into_iter();
    let Some(header) = incoming.next() else {
        return stored.clone();
    };

    let mut merged = Vec::with_capacity(stored.len() + incoming.len());
    merged.push(header);
    merged.extend(stored[1..].iter().cloned());
    for version in incoming {
        if !merged[1..].contains(&version) {
            merged.push(version);
        }
    }
    merged
}

/// Payloads (length prefix stripped) of every version in a canonical buffer.
pub fn version_payloads(data: &[u8], versions_start: usize) -> Result<Vec<&[u8]>> {
    if versions_start > data.len() {
        return Err(ChronoError::chronicle_corrupt(format!(
            "version offset {versions_start} beyond buffer of {} bytes",
            data.len()
        )));
    }
    VersionRecords::new(data, versions_start)
        .map(|record| record.map(|record| &record[LENGTH_FIELD..]))
        .collect()
}

/// Iterator over whole version records (length prefix included).
///
/// Ends at the zero terminator or at the exact end of the buffer. Any other
/// framing problem yields one error and then ends.
struct VersionRecords<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> VersionRecords<'a> {
    const fn new(data: &'a [u8], start: usize) -> Self {
        Self {
            data,
            pos: start,
            done: false,
        }
    }

    fn fail(&mut self, detail: String) -> Option<Result<&'a [u8]>> {
        self.done = true;
        Some(Err(ChronoError::chronicle_corrupt(detail)))
    }
}

impl<'a> Iterator for VersionRecords<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            self.done = true;
            return None;
        }
        if remaining < LENGTH_FIELD {
            let pos = self.pos;
            return self.fail(format!(
                "truncated version length at offset {pos}: {remaining} bytes left"
            ));
        }
        let len = read_length(&self.data[self.pos..]);
        if len == 0 {
            self.done = true;
            return None;
        }
        let Ok(len) = usize::try_from(len) else {
            let pos = self.pos;
            return self.fail(format!("negative version length {len} at offset {pos}"));
        };
        if len < LENGTH_FIELD {
            let pos = self.pos;
            return self.fail(format!(
                "version length {len} at offset {pos} shorter than its own length field"
            ));
        }
        if len > remaining {
            let pos = self.pos;
            return self.fail(format!(
                "version length {len} at offset {pos} exceeds remaining {remaining} bytes"
            ));
        }
        let record = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(Ok(record))
    }
}

fn read_length(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; LENGTH_FIELD];
    raw.copy_from_slice(&bytes[..LENGTH_FIELD]);
    i32::from_be_bytes(raw)
}

fn check_stored_version(record: &[u8], position: usize) -> Result<()> {
    if record.len() < LENGTH_FIELD {
        return Err(ChronoError::chronicle_corrupt(format!(
            "stored version {position} is {} bytes, shorter than a length field",
            record.len()
        )));
    }
    let len = read_length(record);
    if usize::try_from(len).ok() != Some(record.len()) {
        return Err(ChronoError::chronicle_corrupt(format!(
            "stored version {position} declares {len} bytes but holds {}",
            record.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::{ProptestConfig, any};
    use proptest::proptest;

    use super::*;

    fn version(payload: &[u8]) -> Vec<u8> {
        let len = i32::try_from(payload.len() + LENGTH_FIELD).unwrap();
        let mut record = len.to_be_bytes().to_vec();
        record.extend_from_slice(payload);
        record
    }

    fn canonical(header: &[u8], payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = header.to_vec();
        for payload in payloads {
            buf.extend(version(payload));
        }
        buf.extend_from_slice(&ZERO_MARKER);
        buf
    }

    #[test]
    fn two_versions_round_trip() {
        let header = b"HDR".as_slice();
        let data = canonical(header, &[b"v1", b"version2"]);
        let stored = encode_chronicle(&data, header.len()).unwrap();

        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0], [0, 0, 0, 0, b'H', b'D', b'R']);
        assert_eq!(stored[1], version(b"v1"));
        assert_eq!(stored[2], version(b"version2"));
        assert_eq!(decode_chronicle(&stored).unwrap(), data);
    }

    #[test]
    fn zero_versions_is_header_then_terminator() {
        let data = canonical(b"H", &[]);
        let stored = encode_chronicle(&data, 1).unwrap();
        assert_eq!(stored, vec![vec![0, 0, 0, 0, b'H']]);
        assert_eq!(decode_chronicle(&stored).unwrap(), [b'H', 0, 0, 0, 0]);
    }

    #[test]
    fn missing_terminator_is_tolerated() {
        let mut data = b"H".to_vec();
        data.extend(version(b"x"));
        let stored = encode_chronicle(&data, 1).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn malformed_lengths_are_corruption() {
        for bad_len in [-3_i32, 2, 500] {
            let mut data = b"H".to_vec();
            data.extend_from_slice(&bad_len.to_be_bytes());
            data.extend_from_slice(b"abcd");
            let err = encode_chronicle(&data, 1).unwrap_err();
            assert!(err.is_corruption(), "length {bad_len}");
        }
        let err = encode_chronicle(&[1, 2, 3, 0, 0], 3).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(encode_chronicle(b"H", 5).unwrap_err().is_corruption());
    }

    #[test]
    fn decode_rejects_missing_header_marker() {
        assert!(decode_chronicle(&[]).unwrap_err().is_corruption());
        assert!(decode_chronicle(&[vec![0, 0, 1, 0]]).unwrap_err().is_corruption());
        let bad_version = vec![vec![0, 0, 0, 0], vec![0, 0, 0, 9, 1]];
        assert!(decode_chronicle(&bad_version).unwrap_err().is_corruption());
    }

    #[test]
    fn merge_replaces_header_and_appends_new_versions() {
        let first = encode_chronicle(&canonical(b"old", &[b"a", b"b"]), 3).unwrap();
        let second = encode_chronicle(&canonical(b"new", &[b"b", b"c"]), 3).unwrap();
        let merged = merge_chronicle(Some(&first), second);

        assert_eq!(
            decode_chronicle(&merged).unwrap(),
            canonical(b"new", &[b"a", b"b", b"c"])
        );
        assert_eq!(merge_chronicle(None, first.clone()), first);
    }

    #[test]
    fn payloads_strip_length_prefix() {
        let data = canonical(b"hd", &[b"hello", b""]);
        let payloads = version_payloads(&data, 2).unwrap();
        assert_eq!(payloads, vec![b"hello".as_slice(), b"".as_slice()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn stored_form_reproduces_canonical_buffer(
            header in vec(any::<u8>(), 0..32),
            payloads in vec(vec(any::<u8>(), 0..48), 0..6),
        ) {
            let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
            let data = canonical(&header, &refs);
            let stored = encode_chronicle(&data, header.len()).unwrap();
            assert_eq!(stored.len(), payloads.len() + 1);
            assert_eq!(decode_chronicle(&stored).unwrap(), data);
        }
    }
}
