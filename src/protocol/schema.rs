//! The wire format is pluggable behind this trait boundary; only `Json`
//! ships, but nothing downstream of `Schema` knows that. Swapping it for a
//! binary schema later only requires a new impl here.

use crate::protocol::error::ProtocolError;

pub trait Schema {
    fn schema_type() -> SchemaType;
}

pub enum SchemaType {
    Text,
    Binary,
}

pub trait Serialize<S: Schema>: Sized {
    fn serialize(&self) -> Vec<u8>;
}

pub trait Deserialize<S: Schema>: Sized {
    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError>;
}

/// Self-describing JSON, field names and all. The only schema this crate
/// ships; everything else in `protocol` is generic over `Schema` so a
/// binary codec could be dropped in without touching message semantics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Json;

impl Schema for Json {
    fn schema_type() -> SchemaType {
        SchemaType::Text
    }
}

impl<T> Serialize<Json> for T
where
    T: serde::Serialize,
{
    fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("message types are always serializable")
    }
}

impl<T> Deserialize<Json> for T
where
    T: for<'de> serde::Deserialize<'de>,
{
    fn deserialize(buf: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(buf).map_err(|err| ProtocolError::MalformedPayload(err.to_string()))
    }
}
