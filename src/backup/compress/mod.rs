//! Compression of transfer logs before they are attached to a report.

pub mod xz;

use crate::backup::function_path;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use derive_more::From;
use function_name::named;
use io_enum::Write;
use liblzma::write::XzEncoder;
use std::io;
use std::io::Write;

#[derive(Write, From)]
pub enum Compressor<W: Write> {
    None(W),
    XzEncoder(XzEncoder<W>),
}

impl<W: Write> Compressor<W> {
    /// Flushes trailing compressed data and hands back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::XzEncoder(w) => w.finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogCompression {
    #[default]
    None,
    Xz,
}

impl LogCompression {
    pub fn from_flag(compress_logs: bool) -> Self {
        if compress_logs {
            LogCompression::Xz
        } else {
            LogCompression::None
        }
    }

    pub fn file_ext(&self) -> Option<&'static str> {
        match self {
            LogCompression::None => None,
            LogCompression::Xz => Some("xz"),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            LogCompression::None => "text/plain; charset=utf-8",
            LogCompression::Xz => "application/x-xz",
        }
    }

    pub fn build_compressor<W: Write>(&self, writer: W) -> Result<Compressor<W>> {
        match self {
            LogCompression::None => Ok(Compressor::None(writer)),
            LogCompression::Xz => xz::XzConfig::default().build_compressor(writer),
        }
    }

    #[named]
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        (|| -> Result<Vec<u8>> {
            let mut compressor = self.build_compressor(Vec::with_capacity(data.len()))?;
            compressor.write_all(data)?;
            Ok(compressor.finish()?)
        })()
        .add_msg(format!("Compressing {} bytes with {self:?} failed", data.len()))
        .add_fn_name(function_path!())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_none_is_passthrough() {
        let out = LogCompression::None.compress(b"sent 12 bytes").unwrap();
        assert_eq!(out, b"sent 12 bytes");
        assert_eq!(LogCompression::from_flag(false).file_ext(), None);
    }

    #[test]
    fn test_xz_output_decodes() {
        let log = "rsync: sending incremental file list\n".repeat(200);
        let out = LogCompression::from_flag(true).compress(log.as_bytes()).unwrap();
        assert!(out.len() < log.len());
        assert_eq!(&out[..6], b"\xFD7zXZ\x00");

        let mut decoded = String::new();
        liblzma::read::XzDecoder::new(out.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, log);
    }
}
