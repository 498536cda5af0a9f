use std::path::Path;

use async_compression::{tokio::bufread::ZstdDecoder, zstd::DParameter};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::IngestError;

/// Read size for both the compressed source and the decompressed text.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Longest line kept, in bytes. The largest real records are a few hundred KiB; anything past
/// this is skipped and counted as a bad line.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

enum LineRead {
    Eof,
    Line,
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Plain,
    Zstd,
}

/// Yields one trimmed, non-empty text line at a time from a plain or zstd-compressed source.
///
/// The whole payload is never held in memory. Invalid UTF-8 is replaced rather than rejected.
/// A decompression failure before the first line is fatal; after that it ends the stream early
/// and sets [`StreamDecoder::truncated`].
pub struct StreamDecoder {
    lines: Box<dyn AsyncBufRead + Send + Unpin>,
    format: SourceFormat,
    buf: Vec<u8>,
    max_line_bytes: usize,
    lines_yielded: u64,
    oversized_lines: u64,
    truncated: bool,
    finished: bool,
}

impl StreamDecoder {
    /// Opens `path` and sniffs its format.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::SourceOpen`] if the file cannot be opened or its first chunk
    /// cannot be read.
    pub async fn open(path: &Path, window_log_max: u32) -> Result<Self, IngestError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| IngestError::SourceOpen {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_reader(file, window_log_max)
            .await
            .map_err(|source| IngestError::SourceOpen {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Wraps any async byte source.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the first chunk cannot be read.
    pub async fn from_reader<R>(reader: R, window_log_max: u32) -> std::io::Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut source = BufReader::with_capacity(CHUNK_SIZE, reader);
        let format = if source.fill_buf().await?.starts_with(&ZSTD_MAGIC) {
            SourceFormat::Zstd
        } else {
            SourceFormat::Plain
        };

        let lines: Box<dyn AsyncBufRead + Send + Unpin> = match format {
            SourceFormat::Plain => Box::new(source),
            SourceFormat::Zstd => {
                let mut decoder =
                    ZstdDecoder::with_params(source, &[DParameter::window_log_max(window_log_max)]);
                decoder.multiple_members(true);
                Box::new(BufReader::with_capacity(CHUNK_SIZE, decoder))
            }
        };

        tracing::debug!(?format, "Opened ingestion source");

        Ok(StreamDecoder {
            lines,
            format,
            buf: Vec::with_capacity(CHUNK_SIZE),
            max_line_bytes: MAX_LINE_BYTES,
            lines_yielded: 0,
            oversized_lines: 0,
            truncated: false,
            finished: false,
        })
    }

    #[must_use]
    pub fn format(&self) -> SourceFormat {
        self.format
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Lowers the line length limit; lines longer than `max` bytes are skipped.
    #[must_use]
    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max.max(1);
        self
    }

    /// Lines skipped so far for exceeding the length limit.
    #[must_use]
    pub fn oversized_lines(&self) -> u64 {
        self.oversized_lines
    }

    /// The next non-blank line with surrounding whitespace removed, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Decompression`] only when a compressed source fails before it has
    /// produced any line, meaning the decompressor never got going.
    pub async fn next_line(&mut self) -> Result<Option<String>, IngestError> {
        while !self.finished {
            match self.read_bounded().await {
                Ok(LineRead::Eof) => self.finished = true,
                Ok(LineRead::Oversized) => {
                    self.oversized_lines += 1;
                    tracing::warn!(
                        after_line = self.lines_yielded,
                        limit = self.max_line_bytes,
                        "Skipping a line longer than the limit"
                    );
                }
                Ok(LineRead::Line) => {
                    let text = String::from_utf8_lossy(&self.buf);
                    let line = text.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.lines_yielded += 1;
                    return Ok(Some(line.to_string()));
                }
                Err(e) if self.lines_yielded == 0 && self.format == SourceFormat::Zstd => {
                    self.finished = true;
                    return Err(IngestError::Decompression(e));
                }
                Err(e) => {
                    tracing::warn!(
                        lines_read = self.lines_yielded,
                        "Source stopped decoding part way through, skipping the rest of it: {e}"
                    );
                    self.finished = true;
                    self.truncated = true;
                }
            }
        }

        Ok(None)
    }

    /// Reads one line into `buf`, never buffering more than the limit. An overlong line is
    /// consumed up to its newline and discarded.
    async fn read_bounded(&mut self) -> std::io::Result<LineRead> {
        let limit = self.max_line_bytes as u64 + 1;

        self.buf.clear();
        let read = (&mut self.lines)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(LineRead::Eof);
        }
        if self.buf.len() <= self.max_line_bytes || self.buf.ends_with(b"\n") {
            return Ok(LineRead::Line);
        }

        loop {
            self.buf.clear();
            let read = (&mut self.lines)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 || self.buf.ends_with(b"\n") {
                break;
            }
        }
        self.buf.clear();
        Ok(LineRead::Oversized)
    }
}
