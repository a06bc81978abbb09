//! Compressed room listings
//!
//! Listings served under `/api/compressed/` are LZ4 compressed with a size
//! prefix and then base64 encoded so they survive as plain text bodies.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::error::{Error, Result};

/// Compress a JSON listing into its text-safe form
pub fn compress_listing(json: &str) -> String {
    STANDARD.encode(compress_prepend_size(json.as_bytes()))
}

/// Reverse of [`compress_listing`]
pub fn decompress_listing(encoded: &str) -> Result<String> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Validation(format!("invalid base64 listing: {}", e)))?;
    let raw = decompress_size_prepended(&compressed)
        .map_err(|e| Error::Validation(format!("invalid lz4 listing: {}", e)))?;
    String::from_utf8(raw).map_err(|_| Error::Validation("listing is not utf-8".into()))
}
