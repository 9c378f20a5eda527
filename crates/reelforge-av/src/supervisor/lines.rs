//! Line splitting for encoder output.
//!
//! ffmpeg rewrites its `-stats` line in place, terminating each update with
//! `\r` instead of `\n`. A plain `lines()` reader would only see one line
//! per second of output at best, so both bytes end a line here.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Longest line kept before it is force-split.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reads `\n`- or `\r`-terminated lines from an async byte stream.
pub struct LineSplitter<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Empty lines (such as the gap in `\r\n`) are skipped.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    self.pending.extend_from_slice(&buf[..pos]);
                    self.reader.consume(pos + 1);
                    if !self.pending.is_empty() {
                        return Ok(Some(self.take_line()));
                    }
                }
                None => {
                    let len = buf.len();
                    self.pending.extend_from_slice(buf);
                    self.reader.consume(len);
                    if self.pending.len() >= MAX_LINE_BYTES {
                        return Ok(Some(self.take_line()));
                    }
                }
            }
        }
    }
}
