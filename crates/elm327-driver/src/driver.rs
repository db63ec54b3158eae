//! ELM327 driver
//!
//! Owns the adapter transport, the pending-query registry and the TX/RX
//! worker tasks. Queries are submitted without blocking and resolve through
//! a [`QueryHandle`].

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::reassembler::RxWorker;
use crate::registry::{PendingRegistry, QueryHandle, Waiter};
use crate::scheduler::{CommandEntry, TxWorker};
use obd_protocol::{AdapterSettings, QueryDescriptor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State shared by the driver handle and its workers
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) registry: PendingRegistry,
    /// Signalled once per `>` prompt seen by the RX worker
    pub(crate) prompt: Notify,
    alive: AtomicBool,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let prompt = Notify::new();
        // The adapter is ready for the first write.
        prompt.notify_one();
        Self {
            registry: PendingRegistry::new(),
            prompt,
            alive: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the transport dead and fail every pending query
    pub(crate) fn fail_all(&self, err: &DriverError) {
        self.alive.store(false, Ordering::Release);
        let waiters = self.registry.drain();
        if !waiters.is_empty() {
            warn!("Failing {} pending queries: {}", waiters.len(), err);
        }
        for waiter in waiters {
            waiter.fail(err.clone());
        }
    }
}

/// Anything that can carry a query to the vehicle and resolve it later
pub trait QueryChannel: Send + Sync {
    /// Register and enqueue a query. Fails only when the channel is closed.
    fn submit(&self, descriptor: QueryDescriptor) -> Result<QueryHandle, DriverError>;
}

/// Async driver for one ELM327 adapter
pub struct Elm327Driver {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<CommandEntry>,
    config: DriverConfig,
    tx_task: JoinHandle<()>,
    rx_task: JoinHandle<()>,
}

impl Elm327Driver {
    /// Take ownership of a connected transport and start the workers.
    ///
    /// The initialization sequence is queued ahead of any query. Must be
    /// called from within a tokio runtime.
    pub fn start<T>(transport: T, config: DriverConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        info!("Starting ELM327 driver with {:?}", config.adapter);

        let (reader, writer) = tokio::io::split(transport);
        let (queue, commands) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        if config.initialize {
            for command in config.adapter.init_commands() {
                // The receiver is alive until the TX task starts
                let _ = queue.send(CommandEntry::control(command));
            }
        }

        let tx_task = tokio::spawn(TxWorker::new(writer, commands, Arc::clone(&shared), &config).run());
        let rx_task = tokio::spawn(RxWorker::new(reader, Arc::clone(&shared), config.adapter).run());

        Self {
            shared,
            queue,
            config,
            tx_task,
            rx_task,
        }
    }

    /// Register a query and enqueue its command
    pub fn submit(&self, descriptor: QueryDescriptor) -> Result<QueryHandle, DriverError> {
        if !self.shared.is_alive() {
            return Err(DriverError::TransportClosed);
        }

        let (id, key) = (descriptor.id(), descriptor.key());
        let command = descriptor.command(self.config.adapter.line_count_hint);
        let (reply, receiver) = oneshot::channel();
        self.shared.registry.insert(Waiter::new(descriptor, reply));
        if !self.shared.is_alive() {
            // The transport died between the check above and the insert.
            if let Some(waiter) = self.shared.registry.remove(key, id) {
                waiter.fail(DriverError::TransportClosed);
            }
            return Ok(QueryHandle::new(id, key, receiver));
        }
        debug!("Queued {} as {:?}", key, command);

        if self.queue.send(CommandEntry::query(command, key, id)).is_err() {
            if let Some(waiter) = self.shared.registry.remove(key, id) {
                waiter.fail(DriverError::TransportClosed);
            }
        }
        Ok(QueryHandle::new(id, key, receiver))
    }

    /// Build, submit and await a query
    pub async fn query(&self, mode: u8, pid: u8) -> Result<QueryDescriptor, DriverError> {
        let descriptor = QueryDescriptor::new(mode, pid)?;
        self.submit(descriptor)?.await
    }

    /// Enqueue a raw adapter command such as `ATRV`; its output is not matched
    pub fn send_command(&self, command: impl Into<String>) -> Result<(), DriverError> {
        if !self.shared.is_alive() {
            return Err(DriverError::TransportClosed);
        }
        self.queue
            .send(CommandEntry::control(command))
            .map_err(|_| DriverError::TransportClosed)
    }

    /// Queries submitted but not yet resolved
    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    /// False once the transport failed or the driver shut down
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.config.adapter
    }

    /// Stop the workers and fail everything still pending
    pub async fn shutdown(self) {
        info!("Shutting down ELM327 driver");
        self.teardown();
    }

    fn teardown(&self) {
        self.tx_task.abort();
        self.rx_task.abort();
        self.shared.fail_all(&DriverError::TransportClosed);
    }
}

impl QueryChannel for Elm327Driver {
    fn submit(&self, descriptor: QueryDescriptor) -> Result<QueryHandle, DriverError> {
        Elm327Driver::submit(self, descriptor)
    }
}

impl<C: QueryChannel + ?Sized> QueryChannel for Arc<C> {
    fn submit(&self, descriptor: QueryDescriptor) -> Result<QueryHandle, DriverError> {
        (**self).submit(descriptor)
    }
}

impl Drop for Elm327Driver {
    fn drop(&mut self) {
        self.teardown();
    }
}
