use serde::{self, ser::SerializeStruct, Serializer};
use std::ops::Range;

/// Constrains the serialization of numbers to hex strings, generically over
/// the unsigned integer types used in the schema.
pub(crate) trait SerializeUnsignedInt {
    fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer;
}

macro_rules! impl_serialize_unsigned_int {
    ($($t:ty => $method:ident),*) => {
        $(impl SerializeUnsignedInt for $t {
            fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.$method(*self)
            }
        })*
    };
}

impl_serialize_unsigned_int!(u8 => serialize_u8, u16 => serialize_u16, u32 => serialize_u32, u64 => serialize_u64);

/// Serializes an address range as hex strings when generating human-readable
/// formats such as YAML.
pub(crate) fn hex_range<S>(memory_range: &Range<u64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let human_readable = serializer.is_human_readable();
    let mut state = serializer.serialize_struct("Range", 2)?;
    if human_readable {
        state.serialize_field("start", format!("{:#x}", memory_range.start).as_str())?;
        state.serialize_field("end", format!("{:#x}", memory_range.end).as_str())?;
    } else {
        state.serialize_field("start", &memory_range.start)?;
        state.serialize_field("end", &memory_range.end)?;
    }
    state.end()
}

/// Serializes an optional address as a hex string when generating
/// human-readable formats such as YAML.
pub(crate) fn hex_option<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: std::fmt::LowerHex + SerializeUnsignedInt,
{
    match value {
        Some(value) => {
            if serializer.is_human_readable() {
                serializer.serialize_some(format!("{:#x}", value).as_str())
            } else {
                value.serialize_int(serializer)
            }
        }
        None => serializer.serialize_none(),
    }
}

/// Serializes an address or size as a hex string when generating
/// human-readable formats such as YAML.
pub(crate) fn hex_u_int<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: std::fmt::LowerHex + SerializeUnsignedInt,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(format!("{:#x}", value).as_str())
    } else {
        value.serialize_int(serializer)
    }
}
