//! Frame Reassembler (RX worker)
//!
//! Reads adapter output until the stream ends, cuts it into prompt-terminated
//! blocks and resolves the oldest pending query matching each response.

use crate::driver::Shared;
use crate::error::DriverError;
use obd_protocol::{decode, parse_block, unix_millis, AdapterSettings, BlockBuffer, ParsedBlock, ResponseFrame};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 512;

pub(crate) struct RxWorker<R> {
    reader: R,
    shared: Arc<Shared>,
    settings: AdapterSettings,
    blocks: BlockBuffer,
}

impl<R: AsyncRead + Unpin> RxWorker<R> {
    pub(crate) fn new(reader: R, shared: Arc<Shared>, settings: AdapterSettings) -> Self {
        Self {
            reader,
            shared,
            settings,
            blocks: BlockBuffer::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        info!("RX worker started");
        let mut chunk = [0u8; READ_CHUNK];
        let failure = loop {
            match self.reader.read(&mut chunk).await {
                Ok(0) => break DriverError::TransportRead("adapter closed the stream".to_string()),
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    for block in self.blocks.push(&text) {
                        self.shared.prompt.notify_one();
                        self.handle_block(&block);
                    }
                }
                Err(e) => {
                    error!("Adapter read failed: {}", e);
                    break DriverError::TransportRead(e.to_string());
                }
            }
        };

        if !self.blocks.pending().trim().is_empty() {
            debug!("Discarding unterminated output {:?}", self.blocks.pending());
        }
        self.shared.fail_all(&failure);
        info!("RX worker stopped");
    }

    fn handle_block(&self, block: &str) {
        match parse_block(block, &self.settings) {
            ParsedBlock::Response(frame) => self.resolve(frame),
            ParsedBlock::Status(status) if status.is_empty() => {}
            ParsedBlock::Status(status) => debug!("Adapter status: {}", status),
            ParsedBlock::Negative { mode, code } => {
                warn!("Negative response for mode {:02X}: code {:02X}", mode, code)
            }
            ParsedBlock::Malformed(err) => warn!("Dropping response block: {}", err),
        }
    }

    fn resolve(&self, frame: ResponseFrame) {
        let key = frame.key();
        let Some(mut waiter) = self.shared.registry.pop_oldest(key) else {
            debug!("No pending query for {} response, dropping", key);
            return;
        };

        let descriptor = waiter.descriptor_mut();
        descriptor.attach_response(frame.data, unix_millis());
        if let Err(err) = decode(descriptor) {
            warn!("Response to {} did not decode: {}", key, err);
        }
        waiter.complete();
    }
}
