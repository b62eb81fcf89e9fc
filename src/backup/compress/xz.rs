use crate::backup::compress::Compressor;
use crate::backup::result_error::result::Result;
use bon::Builder;
use liblzma::stream::{Check, MtStreamBuilder};
use liblzma::write::XzEncoder;
use std::io::Write;
use std::num::NonZero;

/// Default compression level, logs are small and mostly repetitive
static DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Upper bound on encoder threads
static DEFAULT_MAX_PARALLELIZATION: usize = 8;

/// XZ (LZMA) encoder settings.
#[derive(Clone, Debug, Default, Builder)]
pub struct XzConfig {
    /// 0 (fastest) to 9 (smallest)
    level: Option<u32>,
    /// Encoder threads, half the cores when unset.
    thread: Option<u32>,
}

impl XzConfig {
    pub fn build_compressor<W: Write>(&self, writer: W) -> Result<Compressor<W>> {
        let level = self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL).min(9);
        let thread = self.thread.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZero::get)
                .map(|core| (core / 2).clamp(1, DEFAULT_MAX_PARALLELIZATION) as u32)
                .unwrap_or(1)
        });

        tracing::debug!("Creating XZ compressor with level={level}, threads={thread}");

        if thread <= 1 {
            Ok(XzEncoder::new(writer, level).into())
        } else {
            let stream = MtStreamBuilder::new()
                .preset(level)
                .check(Check::Crc64)
                .threads(thread)
                .encoder()?;
            Ok(XzEncoder::new_stream(writer, stream).into())
        }
    }
}
