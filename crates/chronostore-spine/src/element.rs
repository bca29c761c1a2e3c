//! Element codecs for spine pages.
//!
//! A page holds `capacity` slots of one element type. Each slot is encoded as
//! a big-endian, length-prefixed payload; absent slots have a distinct
//! encoding so a page file always carries exactly `capacity` elements.
//!
//! | Element          | Present                                   | Absent          |
//! |------------------|-------------------------------------------|-----------------|
//! | `i32`            | the value                                 | `i32::MAX`      |
//! | [`IntArray`]     | `len`, then `len` ints                    | `-1`            |
//! | [`ByteArrays`]   | `count`, then `count` × (`len`, bytes)    | `-1`            |

use chronostore_error::Result;
use chronostore_types::UNASSIGNED;

use crate::file_io::{ByteReader, put_i32};

/// Variable-length int array element (taxonomy and reverse-index payloads).
pub type IntArray = Vec<i32>;

/// Array of variable-length byte arrays (chronicle payloads).
pub type ByteArrays = Vec<Vec<u8>>;

/// A value type that can live in a spine slot.
pub trait SpineElement: Clone + Send + Sync + 'static {
    /// Short name used in logs.
    const KIND: &'static str;

    /// Append the encoding of one slot to `out`.
    fn encode_slot(slot: Option<&Self>, out: &mut Vec<u8>);

    /// Decode one slot.
    fn decode_slot(reader: &mut ByteReader<'_>) -> Result<Option<Self>>;

    /// Whether `value` is representable (not confusable with "absent").
    fn is_storable(&self) -> bool {
        true
    }
}

impl SpineElement for i32 {
    const KIND: &'static str = "int";

    fn encode_slot(slot: Option<&Self>, out: &mut Vec<u8>) {
        put_i32(out, slot.copied().unwrap_or(UNASSIGNED));
    }

    fn decode_slot(reader: &mut ByteReader<'_>) -> Result<Option<Self>> {
        let value = reader.read_i32()?;
        Ok((value != UNASSIGNED).then_some(value))
    }

    fn is_storable(&self) -> bool {
        *self != UNASSIGNED
    }
}

impl SpineElement for IntArray {
    const KIND: &'static str = "int[]";

    fn encode_slot(slot: Option<&Self>, out: &mut Vec<u8>) {
        match slot {
            None => put_i32(out, -1),
            Some(values) => {
                put_i32(out, len_i32(values.len()));
                for value in values {
                    put_i32(out, *value);
                }
            }
        }
    }

    fn decode_slot(reader: &mut ByteReader<'_>) -> Result<Option<Self>> {
        let Some(len) = reader.read_len("int array")? else {
            return Ok(None);
        };
        if len.saturating_mul(4) > reader.remaining() {
            return Err(reader.corrupt(format!(
                "int array of {len} elements overruns page ({} bytes left)",
                reader.remaining()
            )));
        }
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(reader.read_i32()?);
        }
        Ok(Some(values))
    }
}

impl SpineElement for ByteArrays {
    const KIND: &'static str = "byte[][]";

    fn encode_slot(slot: Option<&Self>, out: &mut Vec<u8>) {
        match slot {
            None => put_i32(out, -1),
            Some(arrays) => {
                put_i32(out, len_i32(arrays.len()));
                for bytes in arrays {
                    put_i32(out, len_i32(bytes.len()));
                    out.extend_from_slice(bytes);
                }
            }
        }
    }

    fn decode_slot(reader: &mut ByteReader<'_>) -> Result<Option<Self>> {
        let Some(count) = reader.read_len("byte array list")? else {
            return Ok(None);
        };
        // Each sub-array needs at least its 4-byte length.
        if count.saturating_mul(4) > reader.remaining() {
            return Err(reader.corrupt(format!(
                "byte array list of {count} entries overruns page ({} bytes left)",
                reader.remaining()
            )));
        }
        let mut arrays = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(len) = reader.read_len("byte array")? else {
                return Err(reader.corrupt("absent marker inside byte array list"));
            };
            arrays.push(reader.read_bytes(len)?.to_vec());
        }
        Ok(Some(arrays))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn len_i32(len: usize) -> i32 {
    debug_assert!(i32::try_from(len).is_ok(), "spine element length overflows i32");
    len as i32
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use proptest::collection::vec;
    use proptest::prelude::{ProptestConfig, any};
    use proptest::proptest;

    use super::*;

    fn round_trip<T: SpineElement + PartialEq + std::fmt::Debug>(slot: Option<&T>) -> Option<T> {
        let mut buf = Vec::new();
        T::encode_slot(slot, &mut buf);
        let path = Path::new("mem");
        let mut reader = ByteReader::new(&buf, path);
        let decoded = T::decode_slot(&mut reader).unwrap();
        reader.finish().unwrap();
        decoded
    }

    #[test]
    fn int_absent_is_sentinel() {
        let mut buf = Vec::new();
        i32::encode_slot(None, &mut buf);
        assert_eq!(buf, UNASSIGNED.to_be_bytes());
        assert_eq!(round_trip::<i32>(None), None);
        assert!(!UNASSIGNED.is_storable());
        assert!((-5_i32).is_storable());
    }

    #[test]
    fn empty_arrays_differ_from_absent() {
        assert_eq!(round_trip::<IntArray>(Some(&Vec::new())), Some(Vec::new()));
        assert_eq!(round_trip::<IntArray>(None), None);
        assert_eq!(
            round_trip::<ByteArrays>(Some(&vec![Vec::new()])),
            Some(vec![Vec::new()])
        );
        assert_eq!(round_trip::<ByteArrays>(None), None);
    }

    #[test]
    fn byte_arrays_layout_is_nested_length_prefixed() {
        let value: ByteArrays = vec![vec![0xAA], vec![0xBB, 0xCC]];
        let mut buf = Vec::new();
        ByteArrays::encode_slot(Some(&value), &mut buf);
        assert_eq!(
            buf,
            [
                0, 0, 0, 2, // count
                0, 0, 0, 1, 0xAA, // first
                0, 0, 0, 2, 0xBB, 0xCC, // second
            ]
        );
    }

    #[test]
    fn overlong_int_array_is_corruption() {
        let mut buf = Vec::new();
        put_i32(&mut buf, 3);
        put_i32(&mut buf, 1);
        let path = Path::new("page");
        let mut reader = ByteReader::new(&buf, path);
        assert!(IntArray::decode_slot(&mut reader).unwrap_err().is_corruption());
    }

    #[test]
    fn absent_marker_inside_list_is_corruption() {
        let mut buf = Vec::new();
        put_i32(&mut buf, 1);
        put_i32(&mut buf, -1);
        let path = Path::new("page");
        let mut reader = ByteReader::new(&buf, path);
        assert!(ByteArrays::decode_slot(&mut reader).unwrap_err().is_corruption());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn byte_arrays_survive_encoding(value in vec(vec(any::<u8>(), 0..40), 0..8)) {
            assert_eq!(round_trip::<ByteArrays>(Some(&value)), Some(value));
        }

        #[test]
        fn int_arrays_survive_encoding(value in vec(any::<i32>(), 0..64)) {
            assert_eq!(round_trip::<IntArray>(Some(&value)), Some(value));
        }
    }
}
