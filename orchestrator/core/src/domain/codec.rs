// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Byte-boundary-safe text recovery for output streams.
//!
//! Output arrives as arbitrary byte chunks; a multi-byte character may be
//! split across a chunk boundary. Each chunk is decoded together with the
//! undecoded trailing bytes of the previous one, and the decoder returns
//! the maximal prefix that is safe to interpret as complete text plus the
//! new leftover.

/// Decode the maximal valid UTF-8 prefix of `buf`.
///
/// Returns the decoded text and the leftover bytes that may be the start
/// of a multi-byte sequence split at the end of the buffer. Truly invalid
/// bytes in the interior are replaced with U+FFFD and decoding continues.
pub fn decode_bytes(buf: &[u8]) -> (String, Vec<u8>) {
    let mut out = String::new();
    let mut rest = buf;
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                out.push_str(text);
                return (out, Vec::new());
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                match err.error_len() {
                    // Incomplete sequence at the end of the buffer: carry
                    // it into the next decode.
                    None => return (out, rest[valid..].to_vec()),
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &rest[valid + bad..];
                    }
                }
            }
        }
    }
}

/// Decode one chunk, carrying leftover bytes between calls.
pub fn decode_chunk(leftover: &mut Vec<u8>, chunk: &[u8]) -> String {
    let mut buf = std::mem::take(leftover);
    buf.extend_from_slice(chunk);
    let (text, rest) = decode_bytes(&buf);
    *leftover = rest;
    text
}

/// Builds complete lines out of raw byte chunks, tolerating chunk
/// boundaries inside characters and inside lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    leftover: Vec<u8>,
    partial: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the complete lines it finished, without
    /// their terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = decode_chunk(&mut self.leftover, chunk);
        self.partial.push_str(&text);

        let mut lines = Vec::new();
        while let Some(idx) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=idx).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Flush whatever remains buffered at end-of-stream.
    pub fn finish(mut self) -> Option<String> {
        if !self.leftover.is_empty() {
            self.partial
                .push_str(&String::from_utf8_lossy(&self.leftover));
        }
        if self.partial.is_empty() {
            None
        } else {
            Some(self.partial)
        }
    }
}
