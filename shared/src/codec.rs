//! Codec registry: how each field type is laid out on the wire
//!
//! Every field type implements [`Wire`]. Primitives map straight onto the
//! [`ByteCursor`] accessors; `String` carries a u16 byte-length prefix and
//! `Vec<T>` a u16 element count followed by each record's fields in declared
//! order. Tuples encode their members left to right, which is how packet
//! descriptors express multi-field layouts.

use crate::bytes::ByteCursor;
use crate::error::{Error, Result};

/// Largest byte length a string field can carry.
pub const MAX_STRING_BYTES: usize = u16::MAX as usize;

/// Largest element count an array field can carry.
pub const MAX_ARRAY_LEN: usize = u16::MAX as usize;

pub trait Wire: Sized {
    /// Exact number of bytes `encode` will write.
    fn encoded_len(&self) -> usize;

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()>;

    fn decode(cursor: &mut ByteCursor) -> Result<Self>;
}

impl Wire for () {
    fn encoded_len(&self) -> usize {
        0
    }

    fn encode(&self, _cursor: &mut ByteCursor) -> Result<()> {
        Ok(())
    }

    fn decode(_cursor: &mut ByteCursor) -> Result<Self> {
        Ok(())
    }
}

impl Wire for bool {
    fn encoded_len(&self) -> usize {
        1
    }

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
        cursor.write_u8(u8::from(*self))
    }

    fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        Ok(cursor.read_u8()? != 0)
    }
}

macro_rules! primitive_wire {
    ($ty:ty, $width:expr, $read:ident, $write:ident) => {
        impl Wire for $ty {
            fn encoded_len(&self) -> usize {
                $width
            }

            fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
                cursor.$write(*self)
            }

            fn decode(cursor: &mut ByteCursor) -> Result<Self> {
                cursor.$read()
            }
        }
    };
}

primitive_wire!(u8, 1, read_u8, write_u8);
primitive_wire!(u16, 2, read_u16, write_u16);
primitive_wire!(u32, 4, read_u32, write_u32);
primitive_wire!(f32, 4, read_f32, write_f32);

impl Wire for String {
    fn encoded_len(&self) -> usize {
        2 + self.len()
    }

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
        let bytes = self.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| Error::Encoding {
            len: bytes.len(),
            limit: MAX_STRING_BYTES,
        })?;
        cursor.write_u16(len)?;
        cursor.write_bytes(bytes)
    }

    fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        let len = cursor.read_u16()? as usize;
        let bytes = cursor.read_bytes(len)?.to_vec();
        Ok(String::from_utf8(bytes)?)
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encoded_len(&self) -> usize {
        2 + self.iter().map(Wire::encoded_len).sum::<usize>()
    }

    fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
        let count = u16::try_from(self.len()).map_err(|_| Error::Encoding {
            len: self.len(),
            limit: MAX_ARRAY_LEN,
        })?;
        cursor.write_u16(count)?;
        for record in self {
            record.encode(cursor)?;
        }
        Ok(())
    }

    fn decode(cursor: &mut ByteCursor) -> Result<Self> {
        let count = cursor.read_u16()? as usize;
        // Cap the preallocation by what the frame could possibly hold.
        let mut records = Vec::with_capacity(count.min(cursor.remaining()));
        for _ in 0..count {
            records.push(T::decode(cursor)?);
        }
        Ok(records)
    }
}

macro_rules! tuple_wire {
    ($($name:ident),+) => {
        impl<$($name: Wire),+> Wire for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encoded_len(&self) -> usize {
                let ($($name,)+) = self;
                0 $(+ $name.encoded_len())+
            }

            #[allow(non_snake_case)]
            fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
                let ($($name,)+) = self;
                $($name.encode(cursor)?;)+
                Ok(())
            }

            fn decode(cursor: &mut ByteCursor) -> Result<Self> {
                Ok(($($name::decode(cursor)?,)+))
            }
        }
    };
}

tuple_wire!(A, B);
tuple_wire!(A, B, C);

/// Encodes `value` into a buffer sized exactly by `encoded_len`.
pub fn to_bytes<T: Wire>(value: &T) -> Result<Vec<u8>> {
    let mut cursor = ByteCursor::zeroed(value.encoded_len());
    value.encode(&mut cursor)?;
    Ok(cursor.into_inner())
}

pub fn from_bytes<T: Wire>(bytes: Vec<u8>) -> Result<T> {
    T::decode(&mut ByteCursor::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        flag: bool,
        value: u16,
        label: String,
    }

    impl Wire for Sample {
        fn encoded_len(&self) -> usize {
            self.flag.encoded_len() + self.value.encoded_len() + self.label.encoded_len()
        }

        fn encode(&self, cursor: &mut ByteCursor) -> Result<()> {
            self.flag.encode(cursor)?;
            self.value.encode(cursor)?;
            self.label.encode(cursor)
        }

        fn decode(cursor: &mut ByteCursor) -> Result<Self> {
            Ok(Self {
                flag: bool::decode(cursor)?,
                value: u16::decode(cursor)?,
                label: String::decode(cursor)?,
            })
        }
    }

    fn sample(i: usize) -> Sample {
        Sample {
            flag: i % 2 == 0,
            value: i as u16 * 31,
            label: "é".repeat(i),
        }
    }

    #[test]
    fn test_bool_encoding() {
        assert_eq!(to_bytes(&true).unwrap(), vec![1]);
        assert_eq!(to_bytes(&false).unwrap(), vec![0]);
        assert!(from_bytes::<bool>(vec![7]).unwrap());
    }

    #[test]
    fn test_string_layout() {
        let bytes = to_bytes(&"héllo".to_string()).unwrap();
        assert_eq!(&bytes[..2], &[0, 6]);
        assert_eq!(&bytes[2..], "héllo".as_bytes());
        assert_eq!(from_bytes::<String>(bytes).unwrap(), "héllo");
    }

    #[test]
    fn test_string_at_limit_succeeds() {
        let text = "a".repeat(MAX_STRING_BYTES);
        let bytes = to_bytes(&text).unwrap();
        assert_eq!(bytes.len(), 2 + MAX_STRING_BYTES);
        assert_eq!(from_bytes::<String>(bytes).unwrap(), text);
    }

    #[test]
    fn test_string_over_limit_fails() {
        // 32768 two-byte characters = 65536 bytes.
        let text = "é".repeat(32_768);
        let err = to_bytes(&text).unwrap_err();
        assert!(matches!(
            err,
            Error::Encoding {
                len: 65_536,
                limit: MAX_STRING_BYTES
            }
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let err = from_bytes::<String>(vec![0, 2, 0xc3, 0x28]).unwrap_err();
        assert!(matches!(err, Error::InvalidUtf8(_)));
        assert!(err.is_codec_failure());
    }

    #[test]
    fn test_truncated_string_rejected() {
        let err = from_bytes::<String>(vec![0, 5, b'a', b'b']).unwrap_err();
        assert!(matches!(err, Error::FrameBounds { .. }));
    }

    #[test]
    fn test_array_roundtrip_collects_every_record() {
        for n in [0usize, 1, 2, 17] {
            let records: Vec<Sample> = (0..n).map(sample).collect();
            let bytes = to_bytes(&records).unwrap();
            assert_eq!(bytes.len(), records.encoded_len());
            let decoded: Vec<Sample> = from_bytes(bytes).unwrap();
            assert_eq!(decoded.len(), n);
            assert_eq!(decoded, records);
        }
    }

    #[test]
    fn test_array_count_prefix() {
        let records = vec![sample(0), sample(1), sample(2)];
        let bytes = to_bytes(&records).unwrap();
        assert_eq!(&bytes[..2], &[0, 3]);
    }

    #[test]
    fn test_array_count_exceeding_frame_fails() {
        // Claims 1000 one-byte records but carries only two.
        let err = from_bytes::<Vec<u8>>(vec![0x03, 0xe8, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::FrameBounds { .. }));
    }

    #[test]
    fn test_tuple_fields_in_order() {
        let value = (7u8, "ab".to_string(), 1.25f32);
        let bytes = to_bytes(&value).unwrap();
        assert_eq!(bytes.len(), 1 + 4 + 4);
        assert_eq!(bytes[0], 7);
        let decoded: (u8, String, f32) = from_bytes(bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
