//! Newline-delimited JSON framing
//!
//! One UTF-8 JSON value per `\n`-terminated line. Partial lines stay buffered
//! across reads up to a fixed cap; a line that fails to parse is reported as
//! [`Frame::Malformed`] and dropped without closing the stream.

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const DEFAULT_BUFFER_LIMIT: usize = 10 * 1024 * 1024;

/// A decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    Message(T),
    /// The line was not valid JSON for `T`; its bytes are discarded
    Malformed { error: String, length: usize },
}

#[derive(Error, Debug)]
pub enum FrameError {
    /// Fatal: the connection must be closed
    #[error("Receive buffer exceeded {limit} bytes without a newline ({buffered} buffered)")]
    BufferLimit { limit: usize, buffered: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct JsonLineCodec<T> {
    max_buffer: usize,
    /// Bytes already searched for a newline
    scanned: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonLineCodec<T> {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            max_buffer,
            scanned: 0,
            _marker: PhantomData,
        }
    }

    pub fn max_buffer(&self) -> usize {
        self.max_buffer
    }
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LIMIT)
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = Frame<T>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(offset) = newline else {
                self.scanned = src.len();
                if src.len() > self.max_buffer {
                    let buffered = src.len();
                    src.clear();
                    self.scanned = 0;
                    return Err(FrameError::BufferLimit {
                        limit: self.max_buffer,
                        buffered,
                    });
                }
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let mut body = &line[..line.len() - 1];
            if body.last() == Some(&b'\r') {
                body = &body[..body.len() - 1];
            }
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(match serde_json::from_slice::<T>(body) {
                Ok(message) => Frame::Message(message),
                Err(e) => Frame::Malformed {
                    error: e.to_string(),
                    length: body.len(),
                },
            }));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    tracing::debug!(bytes = src.len(), "Discarding unterminated line at EOF");
                    src.clear();
                    self.scanned = 0;
                }
                Ok(None)
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec<T> {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        serde_json::to_writer(dst.writer(), &item)?;
        dst.put_u8(b'\n');
        Ok(())
    }
}
