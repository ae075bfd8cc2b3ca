//! Decoder for the engine's multiplexed log stream.
//!
//! Containers created without a TTY emit stdout and stderr interleaved in
//! frames: an 8-byte header (`[stream, 0, 0, 0, len_be32]`) followed by
//! `len` payload bytes. Frames are not line-aligned, so partial lines are
//! carried per source until their newline arrives.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

use crate::types::{LogLine, LogSource};

const HEADER_LEN: usize = 8;

#[derive(Debug, Default)]
pub struct LogDecoder {
    buf: BytesMut,
    partial_stdout: String,
    partial_stderr: String,
    lines: VecDeque<LogLine>,
    /// Set once the stream turns out not to be multiplexed (TTY mode).
    raw: bool,
}

impl LogDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from the response body.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.drain();
    }

    /// Next complete line, if any.
    pub fn next_line(&mut self) -> Option<LogLine> {
        self.lines.pop_front()
    }

    /// Flush trailing partial lines at end of stream.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() && self.raw {
            let rest = self.buf.split();
            self.append(LogSource::Stdout, &rest);
        }
        for source in [LogSource::Stdout, LogSource::Stderr] {
            let partial = std::mem::take(self.partial_mut(source));
            if !partial.is_empty() {
                self.lines.push_back(LogLine {
                    source,
                    message: partial,
                });
            }
        }
    }

    fn drain(&mut self) {
        loop {
            if self.raw {
                let data = self.buf.split();
                self.append(LogSource::Stdout, &data);
                return;
            }
            if self.buf.is_empty() {
                return;
            }
            let source = match self.buf[0] {
                0 | 1 => LogSource::Stdout,
                2 => LogSource::Stderr,
                _ => {
                    self.raw = true;
                    continue;
                }
            };
            if self.buf.len() < HEADER_LEN {
                return;
            }
            let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
            if self.buf.len() < HEADER_LEN + len {
                return;
            }
            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(len);
            self.append(source, &payload);
        }
    }

    fn append(&mut self, source: LogSource, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let mut complete = Vec::new();
        {
            let partial = self.partial_mut(source);
            partial.push_str(&text);
            while let Some(pos) = partial.find('\n') {
                let mut line: String = partial.drain(..=pos).collect();
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                complete.push(line);
            }
        }
        self.lines.extend(
            complete
                .into_iter()
                .map(|message| LogLine { source, message }),
        );
    }

    fn partial_mut(&mut self, source: LogSource) -> &mut String {
        match source {
            LogSource::Stdout => &mut self.partial_stdout,
            LogSource::Stderr => &mut self.partial_stderr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &str) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload.as_bytes());
        out
    }

    fn drain(decoder: &mut LogDecoder) -> Vec<LogLine> {
        std::iter::from_fn(|| decoder.next_line()).collect()
    }

    #[test]
    fn decodes_interleaved_streams() {
        let mut decoder = LogDecoder::new();
        let mut data = frame(1, "Starting server\n");
        data.extend(frame(2, "WARN low memory\n"));
        decoder.push(&data);

        let lines = drain(&mut decoder);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].source, LogSource::Stdout);
        assert_eq!(lines[0].message, "Starting server");
        assert_eq!(lines[1].source, LogSource::Stderr);
        assert_eq!(lines[1].message, "WARN low memory");
    }

    #[test]
    fn waits_for_split_frames() {
        let mut decoder = LogDecoder::new();
        let data = frame(1, "Done (4.2s)!\n");
        decoder.push(&data[..5]);
        assert!(decoder.next_line().is_none());
        decoder.push(&data[5..11]);
        assert!(decoder.next_line().is_none());
        decoder.push(&data[11..]);

        assert_eq!(decoder.next_line().unwrap().message, "Done (4.2s)!");
    }

    #[test]
    fn joins_lines_across_frames() {
        let mut decoder = LogDecoder::new();
        decoder.push(&frame(1, "Preparing spawn "));
        assert!(decoder.next_line().is_none());
        decoder.push(&frame(1, "area: 97%\nnext"));
        assert_eq!(decoder.next_line().unwrap().message, "Preparing spawn area: 97%");

        decoder.finish();
        assert_eq!(decoder.next_line().unwrap().message, "next");
    }

    #[test]
    fn falls_back_to_raw_for_tty_streams() {
        let mut decoder = LogDecoder::new();
        decoder.push(b"plain line\r\nsecond\n");

        let lines = drain(&mut decoder);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "plain line");
        assert_eq!(lines[1].message, "second");
    }
}
