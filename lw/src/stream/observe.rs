//! Reading a byte source through a parser into the stream

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logparse::{Attachment, FileTransferCollector, Parser, TransferFrame, parse_buffer};

use super::StreamEntry;
use super::source::ByteSource;
use crate::error::NativeError;

/// Where observed entries go
#[async_trait]
pub trait ObserveSink: Send {
    /// Append whole entries; returns the stream length afterwards
    async fn commit(&mut self, entries: Vec<StreamEntry>) -> Result<u64, NativeError>;

    /// A file transfer completed
    async fn attachment(&mut self, attachment: Attachment) -> Result<(), NativeError>;
}

/// Entries parsed out of one read, with the transfer frames seen between them
#[derive(Debug, Default)]
pub struct ObservedBatch {
    pub entries: Vec<StreamEntry>,
    /// Frame and the batch index of the entry it belongs to
    pub frames: Vec<(usize, TransferFrame)>,
}

impl ObservedBatch {
    fn parse(parser: &mut dyn Parser, input: &[u8], eof: bool, source_id: u16) -> Result<(Self, usize), NativeError> {
        let mut batch = ObservedBatch::default();
        let consumed = parse_buffer(parser, input, eof, |item| {
            let (message, frame) = item.into_parts();
            if let Some(frame) = frame {
                batch.frames.push((batch.entries.len(), frame));
            }
            if let Some(message) = message {
                batch.entries.push(StreamEntry {
                    content: message.content,
                    raw: message.raw,
                    source_id,
                });
            }
        })?;
        Ok((batch, consumed))
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.frames.is_empty()
    }
}

/// Pump `source` through `parser` until it ends or `token` is cancelled
///
/// Returns how many entries were appended.
pub async fn observe_source(
    mut source: Box<dyn ByteSource>,
    mut parser: Box<dyn Parser>,
    source_id: u16,
    sink: &mut dyn ObserveSink,
    token: CancellationToken,
    chunk_bytes: usize,
) -> Result<u64, NativeError> {
    debug!(source_id, parser = parser.name(), "observe_source: called");
    let mut buf: Vec<u8> = Vec::with_capacity(chunk_bytes);
    let mut collector = FileTransferCollector::new();
    let mut appended = 0u64;
    let mut len = 0u64;
    let result = loop {
        let read = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(source_id, "observe_source: cancelled");
                break Ok(appended);
            }
            read = source.read(&mut buf, chunk_bytes.max(1)) => read,
        };
        let read = match read {
            Ok(read) => read,
            Err(e) => break Err(NativeError::from(e)),
        };
        let eof = read == 0;
        let (batch, consumed) = match ObservedBatch::parse(parser.as_mut(), &buf, eof, source_id) {
            Ok(parsed) => parsed,
            Err(e) => break Err(e),
        };
        buf.drain(..consumed);
        if !batch.is_empty() {
            let count = batch.entries.len() as u64;
            len = match sink.commit(batch.entries).await {
                Ok(len) => len,
                Err(e) => break Err(e),
            };
            appended += count;
            let base = len - count;
            for (index, frame) in batch.frames {
                if let Some(attachment) = collector.feed(frame, base + index as u64)
                    && let Err(e) = sink.attachment(attachment).await
                {
                    warn!(error = %e, "observe_source: attachment dropped");
                }
            }
        }
        if eof {
            if !buf.is_empty() {
                warn!(source_id, bytes = buf.len(), "observe_source: trailing bytes left unparsed");
            }
            info!(source_id, appended, len, "observe_source: source ended");
            break Ok(appended);
        }
    };
    source.close().await;
    result
}
