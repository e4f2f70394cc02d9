use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};

use crate::error::ProtoError;

/// Gzip-compress an outbound payload.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).map_err(ProtoError::Compress)?;
    enc.finish().map_err(ProtoError::Compress)
}

/// Gzip-decompress an inbound payload, refusing to inflate past `limit`
/// bytes. The frame-size cap applies to the compressed frame; this guards
/// the decompressed side against zip bombs.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, ProtoError> {
    let mut out = Vec::new();
    let mut dec = GzDecoder::new(data).take(limit as u64 + 1);
    dec.read_to_end(&mut out).map_err(ProtoError::Compress)?;
    if out.len() > limit {
        return Err(ProtoError::FrameTooLarge {
            size: out.len(),
            limit,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = vec![b'a'; 512];
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, 1024).unwrap(), data);
    }

    #[test]
    fn rejects_inflation_past_limit() {
        let packed = compress(&vec![0u8; 64 * 1024]).unwrap();
        assert!(matches!(
            decompress(&packed, 1024),
            Err(ProtoError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_non_gzip_input() {
        assert!(decompress(b"plainly not gzip", 1024).is_err());
    }
}
