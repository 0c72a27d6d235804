pub mod command;
pub mod encoding;
pub mod options;
pub mod reader;

use bytes::Bytes;

/// The five message shapes spoken on the wire, plus the null-bulk variant
/// and an error variant used for the single RESP error reply this core
/// emits (`CONFIG GET` on an unknown key; see SPEC_FULL.md §4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(Bytes),
    Error(Bytes),
    Bulk(Bytes),
    NullBulk,
    Integer(i64),
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple(s: impl AsRef<[u8]>) -> Self {
        RespValue::Simple(Bytes::copy_from_slice(s.as_ref()))
    }

    pub fn error(s: impl AsRef<[u8]>) -> Self {
        RespValue::Error(Bytes::copy_from_slice(s.as_ref()))
    }

    pub fn bulk(s: impl AsRef<[u8]>) -> Self {
        RespValue::Bulk(Bytes::copy_from_slice(s.as_ref()))
    }

    pub fn array_of_bulk<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        RespValue::Array(items.into_iter().map(RespValue::bulk).collect())
    }

    pub fn into_bulk(self) -> Option<Bytes> {
        match self {
            RespValue::Bulk(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// true iff this is an Array whose first element is the bulk string
    /// "SET" (case-insensitive) — the only command eligible for
    /// propagation to replicas.
    pub fn is_propagated_write(&self) -> bool {
        match self {
            RespValue::Array(values) => values
                .first()
                .and_then(|v| match v {
                    RespValue::Bulk(b) => Some(b),
                    _ => None,
                })
                .map(|b| b.eq_ignore_ascii_case(b"SET"))
                .unwrap_or(false),
            _ => false,
        }
    }
}
