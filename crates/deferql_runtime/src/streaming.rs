//! Incremental delivery of deferred rounds.
//!
//! Every round the scheduler runs is handed to a [`StreamEmitter`] as a
//! [`RoundChunk`]: the cumulative result tree, the paths resolved in that
//! round and the final flag. [`MultipartEncoder`] turns chunks into
//! `multipart/mixed` parts with the boundary `-`.

use crate::error::EmitError;
use crate::path::FieldPath;
use crate::response::{FieldError, Response};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Multipart boundary used for deferred responses.
pub const BOUNDARY: &str = "-";

/// One emitted round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundChunk {
    /// Round number; the initial response is round 0.
    pub round: usize,
    /// Cumulative result tree after the round.
    pub result: Response,
    /// Deferred paths resolved during the round.
    pub resolved: Vec<FieldPath>,
    /// Set on the last chunk of the request.
    pub is_final: bool,
}

impl RoundChunk {
    /// Builds the JSON body sent for this chunk.
    pub fn payload(&self) -> ChunkPayload {
        let data = self.result.data.as_ref();
        let incremental = self
            .resolved
            .iter()
            .map(|path| {
                let errors: Vec<FieldError> = self.result.errors_under(path).cloned().collect();
                IncrementalPayload {
                    path: path.clone(),
                    data: data
                        .and_then(|data| path.lookup(data))
                        .cloned()
                        .unwrap_or(Value::Null),
                    errors: (!errors.is_empty()).then_some(errors),
                }
            })
            .collect();

        ChunkPayload {
            data: self.result.data.clone(),
            errors: self.result.errors.clone(),
            incremental,
            has_next: !self.is_final,
        }
    }
}

/// JSON body of one multipart part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incremental: Vec<IncrementalPayload>,
    pub has_next: bool,
}

/// A deferred value delivered in a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalPayload {
    pub path: FieldPath,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

/// Receives the chunks of one request, in order.
#[async_trait]
pub trait StreamEmitter: Send {
    async fn emit(&mut self, chunk: RoundChunk) -> Result<(), EmitError>;
}

/// `multipart/mixed` framing.
#[derive(Debug, Clone)]
pub struct MultipartEncoder {
    boundary: String,
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartEncoder {
    /// Creates an encoder using [`BOUNDARY`].
    pub fn new() -> Self {
        Self::with_boundary(BOUNDARY)
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Returns the Content-Type header value.
    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary=\"{}\"", self.boundary)
    }

    /// Formats a chunk as a part, closing the stream after the final one.
    pub fn encode(&self, chunk: &RoundChunk) -> Result<String, EmitError> {
        let body = serde_json::to_string(&chunk.payload())?;
        let mut part = format!(
            "--{}\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{}\r\n",
            self.boundary, body
        );
        if chunk.is_final {
            part.push_str(&self.terminator());
        }
        Ok(part)
    }

    /// The closing delimiter.
    pub fn terminator(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }
}

/// Encodes chunks and forwards them over a channel, e.g. to an HTTP body.
#[derive(Debug)]
pub struct ChannelEmitter {
    sender: mpsc::Sender<Bytes>,
    encoder: MultipartEncoder,
}

impl ChannelEmitter {
    pub fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            sender,
            encoder: MultipartEncoder::new(),
        }
    }

    /// Creates an emitter and the receiving end of its channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    /// Checks if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl StreamEmitter for ChannelEmitter {
    async fn emit(&mut self, chunk: RoundChunk) -> Result<(), EmitError> {
        let part = self.encoder.encode(&chunk)?;
        self.sender
            .send(Bytes::from(part))
            .await
            .map_err(|_| EmitError::Closed)
    }
}

/// Keeps every chunk in memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedEmitter {
    chunks: Vec<RoundChunk>,
}

impl BufferedEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[RoundChunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<RoundChunk> {
        self.chunks
    }

    /// Returns true once a final chunk has been received.
    pub fn is_finished(&self) -> bool {
        self.chunks.last().is_some_and(|chunk| chunk.is_final)
    }
}

#[async_trait]
impl StreamEmitter for BufferedEmitter {
    async fn emit(&mut self, chunk: RoundChunk) -> Result<(), EmitError> {
        self.chunks.push(chunk);
        Ok(())
    }
}
