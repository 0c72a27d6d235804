use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::redis::error::{RedisError, RedisResult};

use super::RespValue;

/// Framed connection (spec §4.1) layered with the message codec (§4.2).
/// Tracks a monotonic count of bytes consumed from the wire so replicas can
/// compute their replication offset and primaries can size propagated
/// commands.
pub struct RespReader<R> {
    inner: BufReader<R>,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Returns the next CRLF-delimited line, excluding the CRLF.
    pub async fn read_line(&mut self) -> RedisResult<Bytes> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(RedisError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed while reading a line",
            )));
        }

        self.bytes_read += n as u64;
        if buf.pop() != Some(b'\n') {
            return Err(RedisError::Wire("line not terminated with LF".into()));
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        Ok(Bytes::from(buf))
    }

    /// Returns exactly `n` bytes, erroring on EOF before `n` bytes arrive.
    pub async fn read_exact(&mut self, n: usize) -> RedisResult<Bytes> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf).await?;
        self.bytes_read += n as u64;
        Ok(Bytes::from(buf))
    }

    async fn expect_crlf(&mut self) -> RedisResult<()> {
        let tail = self.read_exact(2).await?;
        if &tail[..] != b"\r\n" {
            return Err(RedisError::Wire("expected trailing CRLF".into()));
        }
        Ok(())
    }

    fn parse_length(line: &[u8], what: &str) -> RedisResult<i64> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| RedisError::Wire(format!("invalid {} length", what)))
    }

    async fn read_bulk(&mut self) -> RedisResult<RespValue> {
        let line = self.read_line().await?;
        if line.first() != Some(&b'$') {
            return Err(RedisError::Wire("expected bulk string prefix '$'".into()));
        }

        let len = Self::parse_length(&line[1..], "bulk string")?;
        if len == -1 {
            return Ok(RespValue::NullBulk);
        }
        if len < 0 {
            return Err(RedisError::Wire("negative bulk string length".into()));
        }

        let data = self.read_exact(len as usize).await?;
        self.expect_crlf().await?;
        Ok(RespValue::Bulk(data))
    }

    /// Reads one request: a Simple line, or an Array of Bulk strings per
    /// spec.md §4.2's request parser contract.
    pub async fn read_request(&mut self) -> RedisResult<RespValue> {
        let line = self.read_line().await?;
        match line.first() {
            Some(b'+') => Ok(RespValue::Simple(line.slice(1..))),
            Some(b'*') => {
                let n = Self::parse_length(&line[1..], "array")?;
                if n < 0 {
                    return Err(RedisError::Wire("negative array length".into()));
                }

                let mut tokens = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    tokens.push(self.read_bulk().await?);
                }

                Ok(RespValue::Array(tokens))
            }
            Some(other) => Err(RedisError::Wire(format!(
                "unexpected request tag '{}'",
                (*other) as char
            ))),
            None => Err(RedisError::Wire("empty request line".into())),
        }
    }

    /// Reads a reply of the shape handshake steps expect: any single
    /// RespValue (Simple/Bulk/Integer/NullBulk/Array), used by the replica
    /// handshake to read the primary's responses.
    pub async fn read_reply(&mut self) -> RedisResult<RespValue> {
        let line = self.read_line().await?;
        match line.first() {
            Some(b'+') => Ok(RespValue::Simple(line.slice(1..))),
            Some(b'-') => Err(RedisError::Semantic(
                String::from_utf8_lossy(&line[1..]).into_owned(),
            )),
            Some(b':') => {
                let n = Self::parse_length(&line[1..], "integer")?;
                Ok(RespValue::Integer(n))
            }
            Some(b'$') => {
                let len = Self::parse_length(&line[1..], "bulk string")?;
                if len == -1 {
                    return Ok(RespValue::NullBulk);
                }
                let data = self.read_exact(len as usize).await?;
                self.expect_crlf().await?;
                Ok(RespValue::Bulk(data))
            }
            Some(b'*') => {
                let n = Self::parse_length(&line[1..], "array")?;
                let mut values = Vec::with_capacity(n.max(0) as usize);
                for _ in 0..n.max(0) {
                    values.push(Box::pin(self.read_reply()).await?);
                }
                Ok(RespValue::Array(values))
            }
            _ => Err(RedisError::Wire("unexpected reply tag".into())),
        }
    }

    /// Reads the RDB transfer frame: `$<len>\r\n` followed by exactly
    /// `<len>` raw bytes with **no** trailing CRLF (spec.md §4.2).
    pub async fn read_rdb_frame(&mut self) -> RedisResult<Bytes> {
        let line = self.read_line().await?;
        if line.first() != Some(&b'$') {
            return Err(RedisError::Wire("expected RDB frame prefix '$'".into()));
        }

        let len = Self::parse_length(&line[1..], "RDB frame")?;
        if len < 0 {
            return Err(RedisError::Wire("negative RDB frame length".into()));
        }

        self.read_exact(len as usize).await
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_simple_string() {
        let mut reader = RespReader::new("+PONG\r\n".as_bytes());
        let value = reader.read_request().await.unwrap();
        assert_eq!(value, RespValue::Simple(Bytes::from_static(b"PONG")));
    }

    #[tokio::test]
    async fn reads_array_of_bulk_strings() {
        let mut reader = RespReader::new("*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n".as_bytes());
        let value = reader.read_request().await.unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Bulk(Bytes::from_static(b"ECHO")),
                RespValue::Bulk(Bytes::from_static(b"hey")),
            ])
        );
    }

    #[tokio::test]
    async fn reads_zero_length_bulk_string() {
        let mut reader = RespReader::new("*1\r\n$0\r\n\r\n".as_bytes());
        let value = reader.read_request().await.unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![RespValue::Bulk(Bytes::from_static(b""))])
        );
    }

    #[tokio::test]
    async fn tracks_bytes_read_across_line_and_exact() {
        let mut reader = RespReader::new("*1\r\n$4\r\nPING\r\n".as_bytes());
        let _ = reader.read_request().await.unwrap();
        assert_eq!(reader.bytes_read(), "*1\r\n$4\r\nPING\r\n".len() as u64);
    }

    #[tokio::test]
    async fn reads_rdb_frame_without_trailing_crlf() {
        let mut reader = RespReader::new("$5\r\nhelloNEXT".as_bytes());
        let rdb = reader.read_rdb_frame().await.unwrap();
        assert_eq!(&rdb[..], b"hello");
        let rest = reader.read_exact(4).await.unwrap();
        assert_eq!(&rest[..], b"NEXT");
    }

    #[tokio::test]
    async fn rejects_mismatched_length() {
        let mut reader = RespReader::new("*1\r\n$5\r\nhi\r\n".as_bytes());
        assert!(reader.read_request().await.is_err());
    }
}
