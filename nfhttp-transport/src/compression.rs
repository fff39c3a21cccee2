//! Response body decompression for `Content-Encoding: gzip`/`deflate`.
//! Decoding is applied after the full body has been read off the wire, so
//! it is oblivious to chunked vs. fixed-length framing.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder};
use nfhttp_types::{NfError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("identity") => Ok(ContentEncoding::Identity),
            Some("gzip") | Some("x-gzip") => Ok(ContentEncoding::Gzip),
            Some("deflate") => Ok(ContentEncoding::Deflate),
            Some(other) => Err(NfError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Decompresses `body` according to `encoding`, returning it unchanged for
/// `Identity`.
pub fn decode(encoding: ContentEncoding, body: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        ContentEncoding::Identity => Ok(body.to_vec()),
        ContentEncoding::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| NfError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
        ContentEncoding::Deflate => {
            let mut out = Vec::new();
            DeflateDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| NfError::DecompressionFailed(e.to_string()))?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn round_trips_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let compressed = encoder.finish().unwrap();
        let decoded = decode(ContentEncoding::Gzip, &compressed).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn identity_is_passthrough() {
        assert_eq!(decode(ContentEncoding::Identity, b"raw").unwrap(), b"raw");
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(matches!(
            ContentEncoding::from_header(Some("br")),
            Err(NfError::UnsupportedEncoding(_))
        ));
    }
}
