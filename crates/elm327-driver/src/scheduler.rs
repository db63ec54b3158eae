//! Command Scheduler (TX worker)
//!
//! Drains the outbound command queue onto the adapter one command at a time.
//! When the queue is empty the worker polls with a gap that doubles on every
//! idle round up to a ceiling, and drops back to the base gap as soon as a
//! command arrives.

use crate::config::DriverConfig;
use crate::driver::Shared;
use crate::error::DriverError;
use obd_protocol::{unix_millis, QueryId, QueryKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

/// One line to write to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    /// Command text without the terminating carriage return
    pub command: String,
    /// Query this command belongs to, `None` for adapter control commands
    pub query: Option<(QueryKey, QueryId)>,
}

impl CommandEntry {
    pub fn control(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            query: None,
        }
    }

    pub fn query(command: impl Into<String>, key: QueryKey, id: QueryId) -> Self {
        Self {
            command: command.into(),
            query: Some((key, id)),
        }
    }
}

/// Idle poll gap: `base * scaler`, scaler doubling up to `max_scaler`
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    base: Duration,
    scaler: u32,
    max_scaler: u32,
}

impl IdleBackoff {
    pub fn new(base: Duration, max_scaler: u32) -> Self {
        Self {
            base,
            scaler: 1,
            max_scaler: max_scaler.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.scaler = 1;
    }

    pub fn grow(&mut self) {
        self.scaler = self.scaler.saturating_mul(2).min(self.max_scaler);
    }

    pub fn scaler(&self) -> u32 {
        self.scaler
    }

    pub fn gap(&self) -> Duration {
        self.base * self.scaler
    }
}

pub(crate) struct TxWorker<W> {
    writer: W,
    queue: mpsc::UnboundedReceiver<CommandEntry>,
    shared: Arc<Shared>,
    backoff: IdleBackoff,
    watchdog: Duration,
    wait_for_prompt: bool,
}

impl<W: AsyncWrite + Unpin> TxWorker<W> {
    pub(crate) fn new(
        writer: W,
        queue: mpsc::UnboundedReceiver<CommandEntry>,
        shared: Arc<Shared>,
        config: &DriverConfig,
    ) -> Self {
        Self {
            writer,
            queue,
            shared,
            backoff: IdleBackoff::new(config.ipg(), config.max_scaler()),
            watchdog: config.watchdog(),
            wait_for_prompt: config.wait_for_prompt,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("TX worker started");
        let stopped = loop {
            let entry = match self.queue.try_recv() {
                Ok(entry) => entry,
                Err(TryRecvError::Empty) => {
                    self.backoff.grow();
                    tokio::select! {
                        next = self.queue.recv() => match next {
                            Some(entry) => entry,
                            None => break DriverError::TransportClosed,
                        },
                        _ = tokio::time::sleep(self.backoff.gap()) => continue,
                    }
                }
                Err(TryRecvError::Disconnected) => break DriverError::TransportClosed,
            };

            self.backoff.reset();
            if let Err(err) = self.transmit(entry).await {
                error!("Adapter write failed: {}", err);
                self.shared.fail_all(&err);
                break err;
            }
        };
        self.abandon_queue(&stopped);
        info!("TX worker stopped");
    }

    /// Close the queue and fail the queries still waiting in it. A query
    /// registered after `fail_all` drained the registry is only reachable
    /// through its queue entry.
    fn abandon_queue(&mut self, err: &DriverError) {
        self.queue.close();
        let mut failed = 0usize;
        while let Ok(entry) = self.queue.try_recv() {
            if let Some((key, id)) = entry.query {
                if let Some(waiter) = self.shared.registry.remove(key, id) {
                    waiter.fail(err.clone());
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            warn!("Failed {} queued queries: {}", failed, err);
        }
    }

    async fn transmit(&mut self, entry: CommandEntry) -> Result<(), DriverError> {
        if let Some((key, id)) = entry.query {
            if !self.shared.registry.contains(key, id) {
                debug!("Query {} {} resolved before send, skipping", key, id);
                return Ok(());
            }
        }

        if self.wait_for_prompt
            && tokio::time::timeout(self.watchdog, self.shared.prompt.notified())
                .await
                .is_err()
        {
            warn!("No prompt from adapter within {:?}, sending anyway", self.watchdog);
        }

        debug!("TX {:?}", entry.command);
        let mut bytes = entry.command.into_bytes();
        bytes.push(b'\r');
        self.writer
            .write_all(&bytes)
            .await
            .map_err(|e| DriverError::TransportWrite(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| DriverError::TransportWrite(e.to_string()))?;

        if let Some((key, id)) = entry.query {
            self.shared.registry.mark_sent(key, id, unix_millis());
            self.arm_watchdog(key, id);
        }
        Ok(())
    }

    fn arm_watchdog(&self, key: QueryKey, id: QueryId) {
        let shared = Arc::clone(&self.shared);
        let after = self.watchdog;
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(mut waiter) = shared.registry.remove(key, id) {
                warn!("Query {} timed out after {:?}", key, after);
                waiter.detach_watchdog();
                waiter.fail(DriverError::Timeout {
                    mode: key.mode,
                    pid: key.pid,
                    after_ms: after.as_millis() as u64,
                });
            }
        });
        if !self.shared.registry.attach_watchdog(key, id, task.abort_handle()) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{QueryHandle, Waiter};
    use obd_protocol::QueryDescriptor;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::sync::oneshot;

    struct UnpluggedWriter;

    impl AsyncWrite for UnpluggedWriter {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn enqueue(shared: &Shared, queue: &mpsc::UnboundedSender<CommandEntry>, mode: u8, pid: u8) -> QueryHandle {
        let descriptor = QueryDescriptor::new(mode, pid).unwrap();
        let (id, key) = (descriptor.id(), descriptor.key());
        let command = descriptor.command(true);
        let (reply, rx) = oneshot::channel();
        shared.registry.insert(Waiter::new(descriptor, reply));
        queue.send(CommandEntry::query(command, key, id)).unwrap();
        QueryHandle::new(id, key, rx)
    }

    #[tokio::test]
    async fn test_abandoned_queue_fails_late_registrations() {
        let shared = Arc::new(Shared::new());
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let mut worker = TxWorker::new(tokio::io::sink(), queue_rx, Arc::clone(&shared), &DriverConfig::default());

        // Registered after the registry was drained, so only the queue knows it
        shared.fail_all(&DriverError::TransportWrite("broken pipe".to_string()));
        let late = enqueue(&shared, &queue_tx, 0x01, 0x0D);
        assert_eq!(shared.registry.len(), 1);

        worker.abandon_queue(&DriverError::TransportWrite("broken pipe".to_string()));
        assert!(shared.registry.is_empty());
        assert!(matches!(late.await, Err(DriverError::TransportWrite(_))));
        assert!(queue_tx.send(CommandEntry::control("ATRV")).is_err());
    }

    #[tokio::test]
    async fn test_write_failure_stops_worker_and_closes_queue() {
        let shared = Arc::new(Shared::new());
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let config = DriverConfig::default();
        let rpm = enqueue(&shared, &queue_tx, 0x01, 0x0C);
        let speed = enqueue(&shared, &queue_tx, 0x01, 0x0D);

        TxWorker::new(UnpluggedWriter, queue_rx, Arc::clone(&shared), &config)
            .run()
            .await;

        assert!(!shared.is_alive());
        assert!(shared.registry.is_empty());
        assert!(matches!(rpm.await, Err(DriverError::TransportWrite(_))));
        assert!(matches!(speed.await, Err(DriverError::TransportWrite(_))));
        assert!(queue_tx.send(CommandEntry::control("ATZ")).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let mut backoff = IdleBackoff::new(Duration::from_millis(150), 40);
        assert_eq!(backoff.gap(), Duration::from_millis(150));

        let mut scalers = Vec::new();
        for _ in 0..8 {
            backoff.grow();
            scalers.push(backoff.scaler());
        }
        assert_eq!(scalers, vec![2, 4, 8, 16, 32, 40, 40, 40]);
        assert_eq!(backoff.gap(), Duration::from_secs(6));

        backoff.reset();
        assert_eq!(backoff.scaler(), 1);
    }

    #[test]
    fn test_command_entries() {
        let key = QueryKey::new(0x01, 0x0C);
        let id = QueryId(7);
        assert_eq!(CommandEntry::control("ATZ").query, None);
        assert_eq!(CommandEntry::query("010C1", key, id).query, Some((key, id)));
    }
}
