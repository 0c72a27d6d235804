use bytes::{BufMut, Bytes, BytesMut};

use super::RespValue;

impl From<RespValue> for Bytes {
    fn from(value: RespValue) -> Self {
        let mut out = BytesMut::new();
        encode_into(&value, &mut out);
        out.freeze()
    }
}

impl From<&RespValue> for Bytes {
    fn from(value: &RespValue) -> Self {
        let mut out = BytesMut::new();
        encode_into(value, &mut out);
        out.freeze()
    }
}

fn encode_into(value: &RespValue, out: &mut BytesMut) {
    match value {
        RespValue::Simple(bytes) => {
            out.put_u8(b'+');
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Error(bytes) => {
            out.put_u8(b'-');
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Bulk(bytes) => {
            out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
            out.extend_from_slice(bytes);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::NullBulk => out.extend_from_slice(b"$-1\r\n"),
        RespValue::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
        RespValue::Array(values) => {
            out.extend_from_slice(format!("*{}\r\n", values.len()).as_bytes());
            for value in values {
                encode_into(value, out);
            }
        }
    }
}

pub fn ping() -> Bytes {
    RespValue::array_of_bulk(["PING"]).into()
}

pub fn replconf_port(port: u16) -> Bytes {
    RespValue::array_of_bulk(["REPLCONF", "listening-port", &port.to_string()]).into()
}

pub fn replconf_capa() -> Bytes {
    RespValue::array_of_bulk(["REPLCONF", "capa", "psync2"]).into()
}

pub fn replconf_get_ack() -> Bytes {
    RespValue::array_of_bulk(["REPLCONF", "GETACK", "*"]).into()
}

pub fn replconf_ack(offset: u64) -> Bytes {
    RespValue::array_of_bulk(["REPLCONF", "ACK", &offset.to_string()]).into()
}

pub fn psync() -> Bytes {
    RespValue::array_of_bulk(["PSYNC", "?", "-1"]).into()
}

/// Frames the RDB transfer: `$<len>\r\n<len bytes>` with no trailing CRLF,
/// the one wire-format irregularity documented in spec.md §4.2.
pub fn rdb_frame(rdb: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(rdb.len() + 16);
    out.extend_from_slice(format!("${}\r\n", rdb.len()).as_bytes());
    out.extend_from_slice(rdb);
    out.freeze()
}
