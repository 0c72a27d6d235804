mod lzf;

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use crc::{Crc, CRC_64_XZ};

use crate::redis::error::{RedisError, RedisResult};
use crate::redis::store::{now_ms, Store};

const MAGIC: &[u8] = b"REDIS";
const OP_AUX: u8 = 0xFA;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_EXPIRETIME_S: u8 = 0xFD;
const OP_SELECTDB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;
const VALUE_TYPE_STRING: u8 = 0x00;

/// One decoded string record: key, value, and absolute expiry in ms if any.
struct Record {
    key: Bytes,
    value: Bytes,
    expire_at_ms: Option<i64>,
}

/// Reads an RDB file's string-valued keys (with optional expiry) into
/// `store` (spec.md §4.5). A missing or unparsable file is logged and
/// ignored, matching spec.md §7's startup error policy.
pub async fn load_file(dir: &str, dbfilename: &str, store: &Store) {
    let path = Path::new(dir).join(dbfilename);
    match std::fs::read(&path) {
        Ok(bytes) => {
            load_bytes(&bytes, store).await;
            println!("[redis] loaded RDB file {}", path.display());
        }
        Err(err) => {
            eprintln!("[redis - error] failed to read RDB file {}: {err}", path.display());
        }
    }
}

/// Decodes an in-memory RDB image (a file's contents, or the bytes
/// received during a replica's FULLRESYNC) and loads its string-valued
/// keys into `store`. A parse failure is logged and ignored, leaving the
/// store empty or partially populated (spec.md §7).
pub async fn load_bytes(bytes: &[u8], store: &Store) {
    match decode(bytes) {
        Ok(records) => {
            let now = now_ms();
            for record in records {
                if let Some(expire_at) = record.expire_at_ms {
                    if expire_at != 0 && now >= expire_at {
                        continue;
                    }
                }
                store
                    .set_expire_at(record.key, record.value, record.expire_at_ms)
                    .await;
            }
        }
        Err(err) => {
            eprintln!("[redis - error] failed to parse RDB image: {err}");
        }
    }
}

fn decode(bytes: &[u8]) -> RedisResult<Vec<Record>> {
    let mut cursor = Cursor::new(bytes);

    let mut magic = [0u8; 5];
    cursor
        .read_exact(&mut magic)
        .map_err(|_| RedisError::Rdb("truncated before magic header".into()))?;
    if magic != MAGIC {
        return Err(RedisError::Rdb("missing 'REDIS' magic header".into()));
    }

    let mut version = [0u8; 4];
    cursor
        .read_exact(&mut version)
        .map_err(|_| RedisError::Rdb("truncated before version".into()))?;

    let mut records = Vec::new();

    loop {
        let opcode = cursor
            .read_u8()
            .map_err(|_| RedisError::Rdb("truncated before EOF opcode".into()))?;

        match opcode {
            OP_AUX => {
                read_string(&mut cursor)?;
                read_string(&mut cursor)?;
            }
            OP_SELECTDB => {
                read_length(&mut cursor)?;
            }
            OP_RESIZEDB => {
                let _table_size = read_length(&mut cursor)?;
                let _expires_size = read_length(&mut cursor)?;
            }
            OP_EXPIRETIME_MS | OP_EXPIRETIME_S => {
                let expire_at_ms = if opcode == OP_EXPIRETIME_MS {
                    cursor
                        .read_u64::<LittleEndian>()
                        .map_err(|_| RedisError::Rdb("truncated millisecond expiry".into()))? as i64
                } else {
                    let secs = cursor
                        .read_u32::<LittleEndian>()
                        .map_err(|_| RedisError::Rdb("truncated second expiry".into()))?;
                    secs as i64 * 1000
                };

                let value_type = cursor
                    .read_u8()
                    .map_err(|_| RedisError::Rdb("truncated value type after expiry".into()))?;
                if value_type != VALUE_TYPE_STRING {
                    return Err(RedisError::Rdb(format!(
                        "unsupported RDB value type 0x{:02x}",
                        value_type
                    )));
                }

                let key = read_string(&mut cursor)?;
                let value = read_string(&mut cursor)?;
                records.push(Record {
                    key: Bytes::from(key),
                    value: Bytes::from(value),
                    expire_at_ms: Some(expire_at_ms),
                });
            }
            OP_EOF => {
                let mut checksum = [0u8; 8];
                if cursor.read_exact(&mut checksum).is_ok() {
                    verify_checksum(bytes, &cursor, &checksum);
                }
                break;
            }
            VALUE_TYPE_STRING => {
                let key = read_string(&mut cursor)?;
                let value = read_string(&mut cursor)?;
                records.push(Record {
                    key: Bytes::from(key),
                    value: Bytes::from(value),
                    expire_at_ms: None,
                });
            }
            other => {
                return Err(RedisError::Rdb(format!("unrecognised opcode 0x{:02x}", other)));
            }
        }
    }

    Ok(records)
}

fn verify_checksum(whole_file: &[u8], cursor: &Cursor<&[u8]>, checksum: &[u8; 8]) {
    let consumed = cursor.position() as usize - 8;
    let expected = u64::from_le_bytes(*checksum);
    if expected == 0 {
        // Producers may legitimately emit an all-zero checksum to opt out.
        return;
    }

    let crc = Crc::<u64>::new(&CRC_64_XZ);
    let actual = crc.checksum(&whole_file[..consumed]);
    if actual != expected {
        eprintln!("[redis - error] RDB checksum mismatch (not fatal, per spec §4.5)");
    }
}

/// Length encoding per spec.md §4.5. Returns either a plain length or, for
/// the 16/32-bit and LZF special encodings, the already-decoded bytes of a
/// string value (since those cases are only ever used for string values).
enum LengthOrValue {
    Length(usize),
    Value(Vec<u8>),
}

fn read_length_or_value(cursor: &mut Cursor<&[u8]>) -> RedisResult<LengthOrValue> {
    let first = cursor
        .read_u8()
        .map_err(|_| RedisError::Rdb("truncated length byte".into()))?;

    match first >> 6 {
        0b00 => Ok(LengthOrValue::Length((first & 0x3F) as usize)),
        0b01 => {
            let next = cursor
                .read_u8()
                .map_err(|_| RedisError::Rdb("truncated 14-bit length".into()))?;
            Ok(LengthOrValue::Length((((first & 0x3F) as usize) << 8) | next as usize))
        }
        0b10 => {
            // Zero-extended 32-bit LE value (spec.md §9 corrects the
            // source's 4-into-u64-container truncation bug).
            let len = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| RedisError::Rdb("truncated 32-bit length".into()))?;
            Ok(LengthOrValue::Length(len as usize))
        }
        0b11 => {
            let encoding = first & 0x3F;
            match encoding {
                0 => {
                    let v = cursor
                        .read_i8()
                        .map_err(|_| RedisError::Rdb("truncated 8-bit integer".into()))?;
                    Ok(LengthOrValue::Value(v.to_string().into_bytes()))
                }
                1 => {
                    let v = cursor
                        .read_i16::<LittleEndian>()
                        .map_err(|_| RedisError::Rdb("truncated 16-bit integer".into()))?;
                    Ok(LengthOrValue::Value(v.to_string().into_bytes()))
                }
                2 => {
                    let v = cursor
                        .read_i32::<LittleEndian>()
                        .map_err(|_| RedisError::Rdb("truncated 32-bit integer".into()))?;
                    Ok(LengthOrValue::Value(v.to_string().into_bytes()))
                }
                3 => {
                    let clen = read_length(cursor)?;
                    let ulen = read_length(cursor)?;
                    let mut compressed = vec![0u8; clen];
                    cursor
                        .read_exact(&mut compressed)
                        .map_err(|_| RedisError::Rdb("truncated LZF payload".into()))?;
                    let decompressed = lzf::decompress(&compressed, ulen)?;
                    Ok(LengthOrValue::Value(decompressed))
                }
                other => Err(RedisError::Rdb(format!("unsupported special encoding {}", other))),
            }
        }
        _ => unreachable!("two-bit prefix only has four cases"),
    }
}

fn read_length(cursor: &mut Cursor<&[u8]>) -> RedisResult<usize> {
    match read_length_or_value(cursor)? {
        LengthOrValue::Length(n) => Ok(n),
        LengthOrValue::Value(_) => Err(RedisError::Rdb("expected a plain length, got an encoded integer".into())),
    }
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> RedisResult<Vec<u8>> {
    match read_length_or_value(cursor)? {
        LengthOrValue::Length(len) => {
            let mut buf = vec![0u8; len];
            cursor
                .read_exact(&mut buf)
                .map_err(|_| RedisError::Rdb("truncated string payload".into()))?;
            Ok(buf)
        }
        LengthOrValue::Value(bytes) => Ok(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal(records: &[(&str, &str, Option<u64>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"REDIS0011");
        for (key, value, expire_ms) in records {
            if let Some(ms) = expire_ms {
                out.push(OP_EXPIRETIME_MS);
                out.extend_from_slice(&ms.to_le_bytes());
            }
            out.push(VALUE_TYPE_STRING);
            out.push(key.len() as u8);
            out.extend_from_slice(key.as_bytes());
            out.push(value.len() as u8);
            out.extend_from_slice(value.as_bytes());
        }
        out.push(OP_EOF);
        out.extend_from_slice(&0u64.to_le_bytes());
        out
    }

    #[test]
    fn decodes_key_without_expiry() {
        let bytes = build_minimal(&[("foo", "bar", None)]);
        let records = decode(&bytes).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0].key[..], b"foo");
        assert_eq!(&records[0].value[..], b"bar");
        assert_eq!(records[0].expire_at_ms, None);
    }

    #[test]
    fn decodes_key_with_millisecond_expiry() {
        let bytes = build_minimal(&[("foo", "bar", Some(123_456))]);
        let records = decode(&bytes).unwrap();
        assert_eq!(records[0].expire_at_ms, Some(123_456));
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"NOTREDIS0011\xFF".to_vec();
        assert!(decode(&bytes).is_err());
    }

    #[tokio::test]
    async fn load_file_reads_an_on_disk_rdb_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_minimal(&[("foo", "bar", None)]);
        std::fs::write(dir.path().join("dump.rdb"), &bytes).unwrap();

        let store = Store::new();
        load_file(dir.path().to_str().unwrap(), "dump.rdb", &store).await;

        assert_eq!(store.get(b"foo").await, Some(Bytes::from_static(b"bar")));
    }

    #[tokio::test]
    async fn load_file_on_missing_file_leaves_store_empty() {
        let dir = tempfile::tempdir().unwrap();

        let store = Store::new();
        load_file(dir.path().to_str().unwrap(), "missing.rdb", &store).await;

        assert!(store.keys().await.is_empty());
    }

    #[test]
    fn six_bit_length_decodes_directly() {
        let mut cursor = Cursor::new(&[0b0010_1010u8][..]);
        match read_length_or_value(&mut cursor).unwrap() {
            LengthOrValue::Length(n) => assert_eq!(n, 0b0010_1010),
            _ => panic!("expected a length"),
        }
    }

    #[test]
    fn fourteen_bit_length_decodes_across_two_bytes() {
        let mut cursor = Cursor::new(&[0b0100_0001u8, 0x02][..]);
        match read_length_or_value(&mut cursor).unwrap() {
            LengthOrValue::Length(n) => assert_eq!(n, (1usize << 8) | 2),
            _ => panic!("expected a length"),
        }
    }

    #[test]
    fn thirty_two_bit_length_zero_extends() {
        let mut cursor = Cursor::new(&[0b1000_0000u8, 0x01, 0x00, 0x00, 0x00][..]);
        match read_length_or_value(&mut cursor).unwrap() {
            LengthOrValue::Length(n) => assert_eq!(n, 1),
            _ => panic!("expected a length"),
        }
    }

    #[test]
    fn eight_bit_special_integer_decodes() {
        let mut cursor = Cursor::new(&[0b1100_0000u8, 42][..]);
        match read_length_or_value(&mut cursor).unwrap() {
            LengthOrValue::Value(v) => assert_eq!(v, b"42"),
            _ => panic!("expected a value"),
        }
    }
}
