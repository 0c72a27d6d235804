use crate::redis::error::{RedisError, RedisResult};

/// Decompresses a single LZF-compressed chunk as used by the RDB string
/// encoding `11|3` (spec.md §4.5). Treated as a self-contained algorithm
/// rather than an external collaborator, since no crate in this workspace's
/// dependency set implements it.
pub fn decompress(src: &[u8], expected_len: usize) -> RedisResult<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut i = 0;

    while i < src.len() {
        let ctrl = src[i] as usize;
        i += 1;

        if ctrl < 32 {
            let len = ctrl + 1;
            let end = i + len;
            let chunk = src
                .get(i..end)
                .ok_or_else(|| RedisError::Rdb("LZF literal run overruns input".into()))?;
            out.extend_from_slice(chunk);
            i = end;
        } else {
            let mut len = ctrl >> 5;
            if len == 7 {
                let extra = *src
                    .get(i)
                    .ok_or_else(|| RedisError::Rdb("LZF back-reference length truncated".into()))?;
                len += extra as usize;
                i += 1;
            }

            let low = *src
                .get(i)
                .ok_or_else(|| RedisError::Rdb("LZF back-reference offset truncated".into()))?;
            i += 1;

            let offset = (((ctrl & 0x1f) << 8) | low as usize) + 1;
            if offset > out.len() {
                return Err(RedisError::Rdb("LZF back-reference points before output start".into()));
            }

            let mut ref_pos = out.len() - offset;
            for _ in 0..(len + 2) {
                let byte = out[ref_pos];
                out.push(byte);
                ref_pos += 1;
            }
        }
    }

    if out.len() != expected_len {
        return Err(RedisError::Rdb(format!(
            "LZF decompressed length {} does not match declared length {}",
            out.len(),
            expected_len
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompresses_pure_literal_run() {
        // ctrl=4 means a 5-byte literal run.
        let src = [4u8, b'h', b'e', b'l', b'l', b'o'];
        let out = decompress(&src, 5).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn decompresses_with_back_reference() {
        // "aaaaa": literal "a" then a back-reference repeating it 4 times.
        // ctrl=0 -> literal run of length 1: "a"
        // ctrl byte for back-ref: len=4-2=2 => (len<<5)|offset_hi, offset=1 (prior byte)
        let src = [0u8, b'a', (2u8 << 5), 0u8];
        let out = decompress(&src, 5).unwrap();
        assert_eq!(out, b"aaaaa");
    }

    #[test]
    fn rejects_length_mismatch() {
        let src = [4u8, b'h', b'e', b'l', b'l', b'o'];
        assert!(decompress(&src, 4).is_err());
    }
}
