use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Gzip-compresses `data` at the default level.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflates a gzip stream.
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Inflates a gzip stream, refusing output larger than `limit` bytes.
pub fn gunzip_limited(data: &[u8], limit: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(limit));
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    GzDecoder::new(data).take(cap).read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("inflated body exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}

/// True when a `Content-Encoding`/`Accept-Encoding` value lists gzip.
pub fn mentions_gzip(header_value: &str) -> bool {
    header_value
        .split(',')
        .any(|token| token.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("gzip"))
}
