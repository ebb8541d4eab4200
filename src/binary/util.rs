use crate::binary::error::{BinaryError, Result};
use flate2::read::ZlibDecoder;
use std::borrow::Cow;
use std::io::Read;

/// Strips the flag byte from a decrypted frame body and inflates it when the
/// compression bit is set.
pub fn unpack(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    let (&flags, body) = data.split_first().ok_or(BinaryError::EmptyData)?;
    if flags & 0x02 != 0 {
        let mut inflated = Vec::new();
        ZlibDecoder::new(body)
            .read_to_end(&mut inflated)
            .map_err(|e| BinaryError::Zlib(e.to_string()))?;
        Ok(Cow::Owned(inflated))
    } else {
        Ok(Cow::Borrowed(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn plain_body_is_borrowed() {
        let unpacked = unpack(&[0, 1, 2, 3]).unwrap();
        assert_eq!(unpacked.as_ref(), &[1, 2, 3]);
        assert!(matches!(unpacked, Cow::Borrowed(_)));
    }

    #[test]
    fn compressed_body_is_inflated() {
        let payload = b"payload that went through deflate";
        let mut enc = ZlibEncoder::new(vec![2u8], Compression::default());
        enc.write_all(payload).unwrap();
        let framed = enc.finish().unwrap();

        let unpacked = unpack(&framed).unwrap();
        assert_eq!(unpacked.as_ref(), payload);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(unpack(&[]), Err(BinaryError::EmptyData)));
    }
}
