//! Compression providers
//!
//! A provider is a named codec that can wrap an output sink in an encoding
//! stream. The built-in set covers brotli, gzip, deflate and zstd; more can be
//! registered on a [`ProviderRegistry`] at startup.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shrinkwire_core::{Error, Result};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Codec-independent compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Fastest encoding, larger output
    Fastest,
    /// Balanced speed and size
    Optimal,
    /// Smallest output, slowest
    SmallestSize,
    /// Framing only, no actual compression where the codec allows it
    NoCompression,
}

impl CompressionLevel {
    /// Every level, in declaration order
    pub const ALL: [CompressionLevel; 4] = [
        Self::Fastest,
        Self::Optimal,
        Self::SmallestSize,
        Self::NoCompression,
    ];
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fastest => write!(f, "fastest"),
            Self::Optimal => write!(f, "optimal"),
            Self::SmallestSize => write!(f, "smallest_size"),
            Self::NoCompression => write!(f, "no_compression"),
        }
    }
}

/// An encoder wrapping some output sink
pub trait EncoderStream: Write + Send {
    /// Flush remaining state and write the stream trailer
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// A named compression codec
pub trait CompressionProvider: Send + Sync + fmt::Debug {
    /// Value used in `Accept-Encoding` / `Content-Encoding`
    fn encoding_name(&self) -> &str;

    /// Whether a partially written stream can be flushed mid-way
    fn supports_flush(&self) -> bool {
        true
    }

    /// Wrap `output` in an encoder at `level`
    fn create_stream<'a>(
        &self,
        output: &'a mut (dyn Write + Send),
        level: CompressionLevel,
    ) -> io::Result<Box<dyn EncoderStream + 'a>>;

    /// Encode a complete buffer
    fn compress(&self, data: &[u8], level: CompressionLevel) -> io::Result<Bytes> {
        let mut compressed = Vec::with_capacity(data.len() / 2);
        let mut stream = self.create_stream(&mut compressed, level)?;
        stream.write_all(data)?;
        stream.finish()?;
        Ok(Bytes::from(compressed))
    }
}

impl<W: Write + Send> EncoderStream for flate2::write::GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        flate2::write::GzEncoder::finish(*self).map(|_| ())
    }
}

impl<W: Write + Send> EncoderStream for flate2::write::ZlibEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        flate2::write::ZlibEncoder::finish(*self).map(|_| ())
    }
}

impl<W: Write + Send> EncoderStream for brotli::CompressorWriter<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        // into_inner finalises the stream and writes the last meta-block
        (*self).into_inner();
        Ok(())
    }
}

impl<W: Write + Send> EncoderStream for zstd::stream::write::Encoder<'static, W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        zstd::stream::write::Encoder::finish(*self).map(|_| ())
    }
}

fn flate_level(level: CompressionLevel) -> flate2::Compression {
    match level {
        CompressionLevel::Fastest => flate2::Compression::fast(),
        CompressionLevel::Optimal => flate2::Compression::default(),
        CompressionLevel::SmallestSize => flate2::Compression::best(),
        CompressionLevel::NoCompression => flate2::Compression::none(),
    }
}

/// gzip (RFC 1952)
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipProvider;

impl CompressionProvider for GzipProvider {
    fn encoding_name(&self) -> &str {
        "gzip"
    }

    fn create_stream<'a>(
        &self,
        output: &'a mut (dyn Write + Send),
        level: CompressionLevel,
    ) -> io::Result<Box<dyn EncoderStream + 'a>> {
        Ok(Box::new(flate2::write::GzEncoder::new(output, flate_level(level))))
    }
}

/// deflate, zlib-wrapped as HTTP defines it
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateProvider;

impl CompressionProvider for DeflateProvider {
    fn encoding_name(&self) -> &str {
        "deflate"
    }

    fn create_stream<'a>(
        &self,
        output: &'a mut (dyn Write + Send),
        level: CompressionLevel,
    ) -> io::Result<Box<dyn EncoderStream + 'a>> {
        Ok(Box::new(flate2::write::ZlibEncoder::new(output, flate_level(level))))
    }
}

/// brotli (RFC 7932)
#[derive(Debug, Clone, Copy, Default)]
pub struct BrotliProvider;

impl BrotliProvider {
    const BUFFER_SIZE: usize = 4096;
    const WINDOW_BITS: u32 = 22;

    fn quality(level: CompressionLevel) -> u32 {
        match level {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Optimal => 4,
            CompressionLevel::SmallestSize => 11,
            CompressionLevel::NoCompression => 0,
        }
    }
}

impl CompressionProvider for BrotliProvider {
    fn encoding_name(&self) -> &str {
        "br"
    }

    fn create_stream<'a>(
        &self,
        output: &'a mut (dyn Write + Send),
        level: CompressionLevel,
    ) -> io::Result<Box<dyn EncoderStream + 'a>> {
        Ok(Box::new(brotli::CompressorWriter::new(
            output,
            Self::BUFFER_SIZE,
            Self::quality(level),
            Self::WINDOW_BITS,
        )))
    }
}

/// zstd (RFC 8878)
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdProvider;

impl ZstdProvider {
    fn level(level: CompressionLevel) -> i32 {
        match level {
            // zstd has no stored mode; its fastest regular level is the closest match
            CompressionLevel::Fastest | CompressionLevel::NoCompression => 1,
            CompressionLevel::Optimal => 3,
            CompressionLevel::SmallestSize => 19,
        }
    }
}

impl CompressionProvider for ZstdProvider {
    fn encoding_name(&self) -> &str {
        "zstd"
    }

    fn create_stream<'a>(
        &self,
        output: &'a mut (dyn Write + Send),
        level: CompressionLevel,
    ) -> io::Result<Box<dyn EncoderStream + 'a>> {
        Ok(Box::new(zstd::stream::write::Encoder::new(
            output,
            Self::level(level),
        )?))
    }
}

/// Look up a built-in provider by encoding name
pub fn builtin_provider(encoding: &str) -> Option<Arc<dyn CompressionProvider>> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "br" => Some(Arc::new(BrotliProvider)),
        "gzip" => Some(Arc::new(GzipProvider)),
        "deflate" => Some(Arc::new(DeflateProvider)),
        "zstd" => Some(Arc::new(ZstdProvider)),
        _ => None,
    }
}

/// Ordered set of providers; registration order is priority order
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn CompressionProvider>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// brotli, gzip, deflate
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(BrotliProvider))
            .register(Arc::new(GzipProvider))
            .register(Arc::new(DeflateProvider));
        registry
    }

    /// Build from built-in encoding names, keeping their order
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut registry = Self::new();
        for name in names {
            let provider = builtin_provider(name.as_ref())
                .ok_or_else(|| Error::UnknownEncoding(name.as_ref().to_string()))?;
            registry.register(provider);
        }
        Ok(registry)
    }

    /// Append a provider at the lowest priority.
    ///
    /// A second provider for an already registered encoding is ignored.
    pub fn register(&mut self, provider: Arc<dyn CompressionProvider>) -> &mut Self {
        if self.get(provider.encoding_name()).is_some() {
            tracing::warn!(
                encoding = provider.encoding_name(),
                "Compression provider already registered, ignoring duplicate"
            );
            return self;
        }
        self.providers.push(provider);
        self
    }

    /// Case-insensitive lookup
    pub fn get(&self, encoding: &str) -> Option<&Arc<dyn CompressionProvider>> {
        self.providers
            .iter()
            .find(|p| p.encoding_name().eq_ignore_ascii_case(encoding))
    }

    /// Priority index of an encoding (0 is highest)
    pub fn priority_of(&self, encoding: &str) -> Option<usize> {
        self.providers
            .iter()
            .position(|p| p.encoding_name().eq_ignore_ascii_case(encoding))
    }

    /// Providers in priority order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn CompressionProvider>> {
        self.providers.iter()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Write sink that discards its input and counts the bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingSink {
    written: u64,
}

impl CountingSink {
    /// New sink with a zero count
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn sample() -> String {
        "Hello, World! This is a test string that should compress well. ".repeat(100)
    }

    #[test]
    fn test_encoding_names() {
        assert_eq!(GzipProvider.encoding_name(), "gzip");
        assert_eq!(BrotliProvider.encoding_name(), "br");
        assert_eq!(DeflateProvider.encoding_name(), "deflate");
        assert_eq!(ZstdProvider.encoding_name(), "zstd");
    }

    #[test]
    fn test_compress_gzip_decodes() {
        let data = sample();
        let compressed = GzipProvider.compress(data.as_bytes(), CompressionLevel::Optimal).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_compress_deflate_decodes() {
        let data = sample();
        let compressed = DeflateProvider.compress(data.as_bytes(), CompressionLevel::Fastest).unwrap();

        let mut decoded = String::new();
        flate2::read::ZlibDecoder::new(&compressed[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_compress_brotli_decodes() {
        let data = sample();
        let compressed = BrotliProvider.compress(data.as_bytes(), CompressionLevel::SmallestSize).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoded = Vec::new();
        brotli::Decompressor::new(&compressed[..], 4096)
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data.as_bytes());
    }

    #[test]
    fn test_brotli_finish_adds_no_flush_block() {
        let data = sample();
        let level = CompressionLevel::Optimal;
        let compressed = BrotliProvider.compress(data.as_bytes(), level).unwrap();

        let mut expected = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(
                &mut expected,
                BrotliProvider::BUFFER_SIZE,
                BrotliProvider::quality(level),
                BrotliProvider::WINDOW_BITS,
            );
            writer.write_all(data.as_bytes()).unwrap();
        }
        assert_eq!(compressed.len(), expected.len());
    }

    #[test]
    fn test_compress_zstd() {
        let data = sample();
        let compressed = ZstdProvider.compress(data.as_bytes(), CompressionLevel::Optimal).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(zstd::decode_all(&compressed[..]).unwrap(), data.as_bytes());
    }

    #[test]
    fn test_no_compression_is_not_smaller() {
        let data = sample();
        let stored = GzipProvider.compress(data.as_bytes(), CompressionLevel::NoCompression).unwrap();
        assert!(stored.len() >= data.len());
    }

    #[test]
    fn test_counting_sink_through_encoder() {
        let data = sample();
        let mut sink = CountingSink::new();
        {
            let mut stream = GzipProvider.create_stream(&mut sink, CompressionLevel::Fastest).unwrap();
            stream.write_all(data.as_bytes()).unwrap();
            stream.finish().unwrap();
        }
        let expected = GzipProvider.compress(data.as_bytes(), CompressionLevel::Fastest).unwrap();
        assert_eq!(sink.written(), expected.len() as u64);
    }

    #[test]
    fn test_registry_defaults_priority() {
        let registry = ProviderRegistry::with_defaults();
        let names: Vec<_> = registry.iter().map(|p| p.encoding_name().to_string()).collect();
        assert_eq!(names, vec!["br", "gzip", "deflate"]);
        assert_eq!(registry.priority_of("GZIP"), Some(1));
        assert!(registry.get("zstd").is_none());
    }

    #[test]
    fn test_registry_from_names() {
        let registry = ProviderRegistry::from_names(&["gzip", "zstd"]).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("zstd").is_some());

        let err = ProviderRegistry::from_names(&["lzma"]).unwrap_err();
        assert!(matches!(err, Error::UnknownEncoding(_)));
    }

    #[test]
    fn test_registry_ignores_duplicates() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register(Arc::new(GzipProvider));
        assert_eq!(registry.len(), 3);
    }
}
