//! Modbus RTU server
//!
//! `ModbusRtuServer` supervises one listener task per serial port. All
//! listeners share a single shutdown signal and push into a single bounded
//! request queue; workers downstream take the receiving end with
//! [`ModbusRtuServer::take_requests`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{RtuPortConfig, RtuServerConfig};
use crate::diagnostics::DiagnosticLogger;
use crate::error::{ModbusError, ModbusResult};
use crate::listener::{
    ListenerContext, ListenerCounters, ListenerExit, ListenerStats, PortHandle, RtuPortListener,
    RtuRequest,
};

/// Statistics of one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStats {
    pub port: String,
    pub stats: ListenerStats,
}

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub listeners_started: usize,
    pub active_listeners: usize,
    pub frames_received: u64,
    pub frames_dispatched: u64,
    pub frames_filtered: u64,
    pub frames_rejected: u64,
    pub bytes_received: u64,
    pub uptime_seconds: u64,
    pub ports: Vec<PortStats>,
}

/// How a listener ended, reported by [`ModbusRtuServer::shutdown`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerReport {
    pub port: String,
    pub exit: ListenerExit,
}

struct ListenerHandle {
    port: String,
    /// Taken by `shutdown`
    task: Option<JoinHandle<ListenerExit>>,
    counters: Arc<ListenerCounters>,
}

/// Modbus RTU server: listener supervisor
pub struct ModbusRtuServer {
    config: RtuServerConfig,
    diagnostics: DiagnosticLogger,
    requests_tx: Option<mpsc::Sender<RtuRequest>>,
    requests_rx: Option<mpsc::Receiver<RtuRequest>>,
    shutdown_tx: watch::Sender<bool>,
    listeners: Vec<ListenerHandle>,
    active: Arc<AtomicUsize>,
    start_time: Instant,
}

impl ModbusRtuServer {
    /// Create a server with the default configuration (no address filter)
    pub fn new() -> Self {
        Self::build(RtuServerConfig::default())
    }

    /// Create a server with custom configuration
    pub fn with_config(config: RtuServerConfig) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RtuServerConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(config.request_queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            diagnostics: DiagnosticLogger::disabled(),
            requests_tx: Some(requests_tx),
            requests_rx: Some(requests_rx),
            shutdown_tx,
            listeners: Vec::new(),
            active: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Route listener diagnostics to `diagnostics` (applies to listeners
    /// started afterwards)
    pub fn set_diagnostics(&mut self, diagnostics: DiagnosticLogger) {
        self.diagnostics = diagnostics;
    }

    pub fn config(&self) -> &RtuServerConfig {
        &self.config
    }

    /// Hand out the receiving end of the request queue
    ///
    /// Returns `None` after the first call.
    pub fn take_requests(&mut self) -> Option<mpsc::Receiver<RtuRequest>> {
        self.requests_rx.take()
    }

    /// Open a serial device and start listening on it
    ///
    /// Failing to open the device fails this call; listeners already
    /// running are not affected. Must be called from within a tokio runtime.
    pub fn listen(&mut self, port: &RtuPortConfig) -> ModbusResult<()> {
        self.ensure_accepting()?;

        let builder = port.to_serial_builder()?;
        let stream = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("Failed to open serial port {}: {}", port.device, e))
        })?;

        info!(
            "🔌 Opened {}: {} baud, {} data bits, parity {:?}, {} stop bits",
            port.device, port.baud_rate, port.data_bits, port.parity, port.stop_bits
        );
        self.listen_stream(&port.device, stream)
    }

    /// Start a listener for every port in the configuration
    pub fn listen_all(&mut self) -> ModbusResult<()> {
        let ports = self.config.ports.clone();
        for port in &ports {
            self.listen(port)?;
        }
        Ok(())
    }

    /// Start listening on an already open byte stream
    ///
    /// The stream is split: the listener owns the read half, the write half
    /// travels with each request as its [`PortHandle`].
    pub fn listen_stream<S>(&mut self, name: &str, stream: S) -> ModbusResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_accepting()?;
        let requests = self
            .requests_tx
            .clone()
            .ok_or_else(|| ModbusError::protocol("RTU server request queue is closed"))?;

        let (reader, writer) = tokio::io::split(stream);
        let port = PortHandle::new(name, writer);
        let context = ListenerContext {
            slave_id: self.config.slave_id,
            requests,
            shutdown: self.shutdown_tx.subscribe(),
            diagnostics: self.diagnostics.clone(),
            packet_logging: self.config.packet_logging,
            active: self.active.clone(),
        };

        let listener = RtuPortListener::new(port, reader, context);
        let counters = listener.counters();
        let task = tokio::spawn(listener.run());

        self.listeners.push(ListenerHandle {
            port: name.to_string(),
            task: Some(task),
            counters,
        });
        Ok(())
    }

    /// Stop every listener and wait until each has released its port
    ///
    /// Listeners check the shutdown signal between frames, so this waits
    /// for any frame read in progress to complete, fail or hit EOF. Once it
    /// returns no port is read again and the request queue is closed for
    /// consumers after they drain it.
    pub async fn shutdown(&mut self) -> Vec<ListenerReport> {
        if !self.is_shutting_down() {
            info!("⏹️  Stopping Modbus RTU server ({} listeners)", self.listeners.len());
        }
        self.shutdown_tx.send_replace(true);
        self.requests_tx = None;

        let (ports, tasks): (Vec<String>, Vec<JoinHandle<ListenerExit>>) = self
            .listeners
            .iter_mut()
            .filter_map(|h| h.task.take().map(|task| (h.port.clone(), task)))
            .unzip();
        let results = join_all(tasks).await;

        let reports: Vec<ListenerReport> = ports
            .into_iter()
            .zip(results)
            .map(|(port, result)| {
                let exit = result.unwrap_or_else(|e| {
                    error!("RTU listener {} did not finish cleanly: {}", port, e);
                    ListenerExit::Aborted(e.to_string())
                });
                ListenerReport { port, exit }
            })
            .collect();

        info!("Modbus RTU server stopped");
        reports
    }

    /// True until `shutdown` is called
    pub fn is_running(&self) -> bool {
        !self.is_shutting_down()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Listeners that have not stopped yet
    pub fn active_listeners(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> ServerStats {
        let mut stats = ServerStats {
            listeners_started: self.listeners.len(),
            active_listeners: self.active_listeners(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            ..Default::default()
        };

        for handle in &self.listeners {
            let port = handle.counters.snapshot();
            stats.frames_received += port.frames_received;
            stats.frames_dispatched += port.frames_dispatched;
            stats.frames_filtered += port.frames_filtered;
            stats.frames_rejected += port.frames_rejected;
            stats.bytes_received += port.bytes_received;
            stats.ports.push(PortStats {
                port: handle.port.clone(),
                stats: port,
            });
        }
        stats
    }

    fn ensure_accepting(&self) -> ModbusResult<()> {
        if self.is_shutting_down() {
            return Err(ModbusError::protocol("RTU server is shutting down"));
        }
        Ok(())
    }
}

impl Default for ModbusRtuServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ModbusRtuServer {
    fn drop(&mut self) {
        if self.listeners.iter().any(|h| h.task.is_some()) && !self.is_shutting_down() {
            warn!("Modbus RTU server dropped without shutdown; listeners stop after their current frame");
            self.shutdown_tx.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerState;
    use crate::protocol::{ModbusFunction, RtuFrame};
    use tokio::io::AsyncWriteExt;

    fn frame(slave_id: u8) -> Vec<u8> {
        RtuFrame::new(slave_id, ModbusFunction::ReadInputRegisters, vec![0x00, 0x10, 0x00, 0x01]).to_bytes()
    }

    #[tokio::test]
    async fn test_requests_carry_their_port() {
        let mut server = ModbusRtuServer::new();
        let mut requests = server.take_requests().unwrap();
        assert!(server.take_requests().is_none());

        let (mut line_a, port_a) = tokio::io::duplex(64);
        let (mut line_b, port_b) = tokio::io::duplex(64);
        server.listen_stream("ttyA", port_a).unwrap();
        server.listen_stream("ttyB", port_b).unwrap();
        assert_eq!(server.active_listeners(), 2);

        line_a.write_all(&frame(1)).await.unwrap();
        let request = requests.recv().await.unwrap();
        assert_eq!(request.port.name(), "ttyA");

        line_b.write_all(&frame(2)).await.unwrap();
        let request = requests.recv().await.unwrap();
        assert_eq!(request.port.name(), "ttyB");
        assert_eq!(request.frame.slave_id(), 2);

        // Closing both lines ends both listeners.
        drop(line_a);
        drop(line_b);
        let reports = server.shutdown().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.exit == ListenerExit::StreamClosed || r.exit == ListenerExit::Shutdown));
        assert_eq!(server.active_listeners(), 0);
    }

    #[tokio::test]
    async fn test_listen_after_shutdown_is_rejected() {
        let mut server = ModbusRtuServer::new();
        assert!(server.is_running());
        assert!(server.shutdown().await.is_empty());
        assert!(!server.is_running());

        let (_line, port) = tokio::io::duplex(8);
        let err = server.listen_stream("late", port).unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_open_failure_is_returned() {
        let mut server = ModbusRtuServer::new();
        let err = server
            .listen(&RtuPortConfig::new("/dev/does-not-exist-rtu"))
            .unwrap_err();
        assert!(err.is_transport_error());
        assert_eq!(server.active_listeners(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RtuServerConfig::default().with_request_queue_capacity(0);
        assert!(ModbusRtuServer::with_config(config).is_err());
    }

    #[tokio::test]
    async fn test_stats_aggregate_ports() {
        let mut server =
            ModbusRtuServer::with_config(RtuServerConfig::default().with_slave_id(9)).unwrap();
        let mut requests = server.take_requests().unwrap();

        let (mut line, port) = tokio::io::duplex(64);
        server.listen_stream("ttyC", port).unwrap();

        line.write_all(&frame(4)).await.unwrap();
        line.write_all(&frame(9)).await.unwrap();
        assert_eq!(requests.recv().await.unwrap().frame.slave_id(), 9);

        drop(line);
        let reports = server.shutdown().await;
        assert_eq!(reports[0].exit, ListenerExit::StreamClosed);

        let stats = server.get_stats();
        assert_eq!(stats.listeners_started, 1);
        assert_eq!(stats.active_listeners, 0);
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_dispatched, 1);
        assert_eq!(stats.frames_filtered, 1);
        assert_eq!(stats.ports[0].port, "ttyC");
        assert_eq!(stats.ports[0].stats.state, ListenerState::Stopped);
    }
}
