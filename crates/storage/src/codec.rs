//! Object body encoding for compressing namespaces.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};
use tracing::instrument;

/// Namespace suffixes whose objects are stored zlib-compressed.
const COMPRESSED_SUFFIXES: [&str; 2] = ["-gzip", "-deflate"];

/// Whether objects in `namespace` are stored compressed.
pub fn is_compressed(namespace: &str) -> bool {
    COMPRESSED_SUFFIXES.iter().any(|suffix| namespace.ends_with(suffix))
}

#[instrument(level = "trace", skip(input), fields(input_size = input.len(), output_size))]
pub fn compress(input: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(input).or_raise(|| ErrorKind::Compression)?;
    let output = encoder.finish().or_raise(|| ErrorKind::Compression)?;
    tracing::Span::current().record("output_size", output.len());
    Ok(output)
}

#[instrument(level = "trace", skip(input), fields(input_size = input.len()))]
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    ZlibDecoder::new(input).read_to_end(&mut output).or_raise(|| ErrorKind::Compression)?;
    Ok(output)
}
