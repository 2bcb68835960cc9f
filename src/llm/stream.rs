// Line-oriented decoding of streaming HTTP bodies (SSE and NDJSON)

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

use super::provider::ChunkStream;
use crate::types::{AppError, AppResult, StreamChunk};

/// Turns complete lines of a streaming body into chunks
pub trait LineDecoder: Send + 'static {
    fn decode_line(&mut self, line: &str) -> AppResult<Vec<StreamChunk>>;

    /// Chunks still buffered when the body ends
    fn finish(&mut self) -> AppResult<Vec<StreamChunk>> {
        Ok(Vec::new())
    }
}

struct DecodeState<S, D> {
    body: Pin<Box<S>>,
    decoder: D,
    buffer: Vec<u8>,
    pending: VecDeque<AppResult<StreamChunk>>,
    done: bool,
}

impl<S, D: LineDecoder> DecodeState<S, D> {
    fn absorb(&mut self, decoded: AppResult<Vec<StreamChunk>>) {
        match decoded {
            Ok(chunks) => self.pending.extend(chunks.into_iter().map(Ok)),
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.is_empty() {
                let decoded = self.decoder.decode_line(line);
                self.absorb(decoded);
            }
            if self.done {
                return;
            }
        }
    }

    fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim();
            if !line.is_empty() {
                let decoded = self.decoder.decode_line(line);
                self.absorb(decoded);
            }
        }
        if !self.done {
            let decoded = self.decoder.finish();
            self.absorb(decoded);
        }
        self.done = true;
    }
}

/// Decode `body` line by line. A transport or decode error ends the stream
/// after being yielded once.
pub fn decode_lines<S, E, D>(body: S, decoder: D) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    D: LineDecoder,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(AppError::LLMApi(format!("Stream interrupted: {}", e))));
                    state.done = true;
                }
                None => state.finish(),
            }
        }
    }))
}
