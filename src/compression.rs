//! zlib 流压缩
//!
//! 整个连接共用一条压缩流，每个发送单元以同步刷新结束，
//! 接收端因此可以逐块解压，无需等待流结束。

use std::io;

use bytes::BytesMut;
use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};

use crate::state::Compression;

const CHUNK: usize = 4096;

/// 基于 flate2 的 [`Compression`] 实现
pub struct ZlibCompression {
    compress: Compress,
    decompress: Decompress,
}

impl ZlibCompression {
    pub fn new() -> Self {
        Self::with_level(flate2::Compression::default())
    }

    pub fn with_level(level: flate2::Compression) -> Self {
        Self {
            compress: Compress::new(level, true),
            decompress: Decompress::new(true),
        }
    }
}

impl Default for ZlibCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZlibCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZlibCompression")
            .field("compressed_in", &self.compress.total_in())
            .field("decompressed_out", &self.decompress.total_out())
            .finish()
    }
}

impl Compression for ZlibCompression {
    fn compress(&mut self, src: &[u8], dst: &mut BytesMut) -> io::Result<()> {
        let mut input = src;
        loop {
            let start = dst.len();
            dst.resize(start + CHUNK, 0);
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            let result = self.compress.compress(input, &mut dst[start..], FlushCompress::Sync);
            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            dst.truncate(start + produced);
            result.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            input = &input[consumed..];
            if input.is_empty() && produced < CHUNK {
                return Ok(());
            }
        }
    }

    fn decompress(&mut self, src: &[u8], dst: &mut BytesMut) -> io::Result<()> {
        let mut input = src;
        loop {
            let start = dst.len();
            dst.resize(start + CHUNK, 0);
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let result = self
                .decompress
                .decompress(input, &mut dst[start..], FlushDecompress::None);
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            dst.truncate(start + produced);
            let status = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

            input = &input[consumed..];
            if status == Status::StreamEnd || (input.is_empty() && produced < CHUNK) {
                return Ok(());
            }
        }
    }
}
