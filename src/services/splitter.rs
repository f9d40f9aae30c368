//! Fixed-size chunk splitting.
//!
//! Slices share the input buffer; no bytes are copied. A zero-length input
//! produces zero chunks because there is nothing to hash.

use bytes::Bytes;
use std::num::NonZeroUsize;

/// Split `data` into ordered chunks of at most `chunk_size` bytes.
///
/// Concatenating the result in order reproduces `data` exactly. Every chunk
/// but the last is exactly `chunk_size` bytes long.
pub fn split(data: &Bytes, chunk_size: NonZeroUsize) -> Vec<Bytes> {
    let size = chunk_size.get();
    let mut chunks = Vec::with_capacity(data.len().div_ceil(size));
    let mut position = 0;

    while position < data.len() {
        let end = (position + size).min(data.len());
        chunks.push(data.slice(position..end));
        position = end;
    }

    chunks
}
