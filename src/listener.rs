//! RTU port listener
//!
//! One listener owns one serial byte source for its whole life. It keeps
//! assembling frames, drops the ones addressed elsewhere or failing
//! validation, and pushes the rest onto the shared request queue paired
//! with the port they came from.
//!
//! Shutdown is polled between frames. A listener blocked in a serial read
//! only notices the signal once that read returns, so stopping can be
//! delayed by up to one frame (or until the line errors or closes).

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};

use crate::diagnostics::{DiagnosticEvent, DiagnosticLogger};
use crate::error::ModbusResult;
use crate::framing::{read_rtu_frame, FrameReadError};
use crate::protocol::RtuFrame;
use crate::utils::format::bytes_to_hex;
use crate::utils::validation::accepts_address;

/// Write half of a serial port, shared with downstream workers
pub type PortWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identity of the port a request arrived on
///
/// Cloning is cheap; every clone writes to the same link. The read side is
/// owned by the listener and never exposed.
#[derive(Clone)]
pub struct PortHandle {
    name: Arc<str>,
    writer: Arc<Mutex<PortWriter>>,
}

impl PortHandle {
    pub fn new<W>(name: &str, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            name: Arc::from(name),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a reply back on the originating link
    pub async fn write_all(&self, bytes: &[u8]) -> ModbusResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Whether both handles refer to the same port
    pub fn same_port(&self, other: &PortHandle) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }
}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle").field("name", &self.name).finish()
    }
}

/// A validated frame and the port to answer on
#[derive(Debug, Clone)]
pub struct RtuRequest {
    pub port: PortHandle,
    pub frame: RtuFrame,
}

/// Lifecycle of a port listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ListenerState {
    #[default]
    Running = 0,
    /// Shutdown observed, no further reads issued
    Stopping = 1,
    /// Byte source released
    Stopped = 2,
}

impl ListenerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListenerState::Running,
            1 => ListenerState::Stopping,
            _ => ListenerState::Stopped,
        }
    }
}

/// Why a listener stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// Server shutdown was observed between frames
    Shutdown,
    /// The byte source reached end of stream
    StreamClosed,
    /// A serial read failed
    TransportError(String),
    /// Nobody is consuming requests anymore
    QueueClosed,
    /// The listener task panicked or was aborted
    Aborted(String),
}

impl fmt::Display for ListenerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerExit::Shutdown => write!(f, "shutdown"),
            ListenerExit::StreamClosed => write!(f, "stream closed"),
            ListenerExit::TransportError(reason) => write!(f, "transport error: {}", reason),
            ListenerExit::QueueClosed => write!(f, "request queue closed"),
            ListenerExit::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Per-port frame counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub state: ListenerState,
    /// Complete frames assembled off the wire
    pub frames_received: u64,
    /// Frames pushed onto the request queue
    pub frames_dispatched: u64,
    /// Frames dropped by the slave address filter
    pub frames_filtered: u64,
    /// Headers or frames dropped as malformed
    pub frames_rejected: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ListenerCounters {
    state: AtomicU8,
    frames_received: AtomicU64,
    frames_dispatched: AtomicU64,
    frames_filtered: AtomicU64,
    frames_rejected: AtomicU64,
    bytes_received: AtomicU64,
}

impl ListenerCounters {
    pub(crate) fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            state: self.state(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_filtered: self.frames_filtered.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Returns the previous state
    fn set_state(&self, state: ListenerState) -> ListenerState {
        ListenerState::from_u8(self.state.swap(state as u8, Ordering::SeqCst))
    }

    fn add_bytes(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Keeps a listener counted as active until dropped
///
/// Dropping it marks the listener `Stopped`, whether `run` returned, its
/// future was dropped mid-read or the task panicked.
struct ActiveGuard {
    port: Arc<str>,
    active: Arc<AtomicUsize>,
    counters: Arc<ListenerCounters>,
}

impl ActiveGuard {
    fn register(port: Arc<str>, active: Arc<AtomicUsize>, counters: Arc<ListenerCounters>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { port, active, counters }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let from = self.counters.set_state(ListenerState::Stopped);
        if from != ListenerState::Stopped {
            debug!("RTU listener {}: {:?} -> {:?}", self.port, from, ListenerState::Stopped);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What every listener of one server shares
#[derive(Debug, Clone)]
pub struct ListenerContext {
    /// 0 accepts all addresses
    pub slave_id: u8,
    pub requests: mpsc::Sender<RtuRequest>,
    pub shutdown: watch::Receiver<bool>,
    pub diagnostics: DiagnosticLogger,
    pub packet_logging: bool,
    /// Listeners that have not reached `Stopped`
    pub active: Arc<AtomicUsize>,
}

/// Reads frames from one port until shutdown, EOF or a serial error
pub struct RtuPortListener<R> {
    port: PortHandle,
    reader: R,
    context: ListenerContext,
    counters: Arc<ListenerCounters>,
    active: ActiveGuard,
}

impl<R> RtuPortListener<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Registers the listener as active; it stays active until it is dropped
    /// or `run` returns.
    pub fn new(port: PortHandle, reader: R, context: ListenerContext) -> Self {
        let counters = Arc::new(ListenerCounters::default());
        let active = ActiveGuard::register(port.name.clone(), context.active.clone(), counters.clone());
        Self {
            port,
            reader,
            context,
            counters,
            active,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.counters.state()
    }

    pub fn port(&self) -> &PortHandle {
        &self.port
    }

    pub fn stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<ListenerCounters> {
        self.counters.clone()
    }

    /// Run the receive loop, releasing the byte source on return
    pub async fn run(mut self) -> ListenerExit {
        info!("📡 RTU listener started on {}", self.port.name());

        let exit = self.receive_loop().await;

        let RtuPortListener { port, reader, context, active, .. } = self;
        drop(reader);
        drop(active);

        context.diagnostics.report(DiagnosticEvent::ListenerStopped {
            port: port.name().to_string(),
            reason: exit.to_string(),
        });
        exit
    }

    async fn receive_loop(&mut self) -> ListenerExit {
        loop {
            if *self.context.shutdown.borrow() {
                self.transition(ListenerState::Stopping);
                return ListenerExit::Shutdown;
            }

            let raw = match read_rtu_frame(&mut self.reader).await {
                Ok(raw) => raw,
                Err(FrameReadError::Eof { partial }) => {
                    self.counters.add_bytes(partial.len());
                    self.report(DiagnosticEvent::StreamClosed {
                        port: self.port.name().to_string(),
                    });
                    return ListenerExit::StreamClosed;
                }
                Err(FrameReadError::Transport { partial, source }) => {
                    self.counters.add_bytes(partial.len());
                    let reason = source.to_string();
                    self.report(DiagnosticEvent::TransportError {
                        port: self.port.name().to_string(),
                        partial,
                        reason: reason.clone(),
                    });
                    return ListenerExit::TransportError(reason);
                }
                Err(FrameReadError::Header { header, source }) => {
                    self.counters.add_bytes(header.len());
                    self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    self.report(DiagnosticEvent::UnframeableHeader {
                        port: self.port.name().to_string(),
                        header,
                        reason: source.to_string(),
                    });
                    continue;
                }
            };

            self.counters.add_bytes(raw.len());
            self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
            if self.context.packet_logging {
                debug!("[MODBUS-RTU] receive port:{} {}", self.port.name(), bytes_to_hex(&raw));
            }

            let address = raw[0];
            if !accepts_address(self.context.slave_id, address) {
                self.counters.frames_filtered.fetch_add(1, Ordering::Relaxed);
                self.report(DiagnosticEvent::AddressMismatch {
                    port: self.port.name().to_string(),
                    address,
                    slave_id: self.context.slave_id,
                });
                continue;
            }

            let frame = match RtuFrame::from_bytes(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    self.counters.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    self.report(DiagnosticEvent::MalformedFrame {
                        port: self.port.name().to_string(),
                        frame: raw,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let request = RtuRequest { port: self.port.clone(), frame };
            if self.context.requests.send(request).await.is_err() {
                return ListenerExit::QueueClosed;
            }
            self.counters.frames_dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn report(&self, event: DiagnosticEvent) {
        self.context.diagnostics.report(event);
    }

    fn transition(&self, to: ListenerState) {
        let from = self.counters.set_state(to);
        if from != to {
            debug!("RTU listener {}: {:?} -> {:?}", self.port.name(), from, to);
        }
    }
}
