//! Integration Tests for the Voltage RTU Server
//!
//! Drives the supervisor with in-memory serial lines (`tokio::io::duplex`)
//! and scripted byte sources, checking framing, filtering, resilience to
//! bad frames and shutdown behaviour end to end.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::time::{sleep, timeout};
use voltage_rtu_server::*;

/// Serial line wrapper that counts polls and records when it is released
struct TrackedLine {
    inner: DuplexStream,
    polls: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl AsyncRead for TrackedLine {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.polls.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedLine {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Drop for TrackedLine {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

fn collecting_diagnostics() -> (DiagnosticLogger, Arc<Mutex<Vec<DiagnosticEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let logger = DiagnosticLogger::new(
        Some(Box::new(move |event: &DiagnosticEvent| {
            sink.lock().unwrap().push(event.clone());
        })),
        LogLevel::Debug,
    );
    (logger, events)
}

fn read_holding(slave_id: u8) -> Vec<u8> {
    RtuFrame::new(slave_id, ModbusFunction::ReadHoldingRegisters, vec![0x00, 0x00, 0x00, 0x02]).to_bytes()
}

/// Write Multiple Registers laid out as header + quantity * 2 bytes + CRC
fn write_multiple_registers(slave_id: u8, values: &[u16]) -> Vec<u8> {
    let mut data = vec![0x00, 0x01];
    data.extend_from_slice(&(values.len() as u16).to_be_bytes());
    for value in values {
        data.extend_from_slice(&value.to_be_bytes());
    }
    RtuFrame::new(slave_id, ModbusFunction::WriteMultipleRegisters, data).to_bytes()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A Write Multiple Registers request is sized from its quantity field
#[tokio::test]
async fn test_variable_length_frame_dispatch() {
    voltage_rtu_server::utils::logging::init_test_logger();

    let mut server = ModbusRtuServer::new();
    let mut requests = server.take_requests().unwrap();
    let (mut line, port) = tokio::io::duplex(256);
    server.listen_stream("ttyUSB0", port).unwrap();

    let wire = write_multiple_registers(1, &[0x000A, 0x0102, 0xBEEF]);
    assert_eq!(wire.len(), 6 + 3 * 2 + 2);
    line.write_all(&wire).await.unwrap();
    line.write_all(&read_holding(1)).await.unwrap();

    let first = requests.recv().await.unwrap();
    assert_eq!(first.frame.function(), ModbusFunction::WriteMultipleRegisters);
    assert_eq!(first.frame.to_bytes(), wire);

    let second = requests.recv().await.unwrap();
    assert_eq!(second.frame.function(), ModbusFunction::ReadHoldingRegisters);

    drop(line);
    server.shutdown().await;
}

/// A frame failing validation must not keep the next one from being dispatched
#[tokio::test]
async fn test_malformed_frame_then_good_frame() {
    let mut server = ModbusRtuServer::new();
    let (diagnostics, events) = collecting_diagnostics();
    server.set_diagnostics(diagnostics);
    let mut requests = server.take_requests().unwrap();

    let (mut line, port) = tokio::io::duplex(256);
    server.listen_stream("ttyUSB1", port).unwrap();

    let mut bad = read_holding(1);
    bad[6] ^= 0xFF;
    line.write_all(&bad).await.unwrap();
    line.write_all(&read_holding(1)).await.unwrap();

    let request = requests.recv().await.unwrap();
    assert_eq!(request.frame.to_bytes(), read_holding(1));
    assert_eq!(server.active_listeners(), 1);

    let malformed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, DiagnosticEvent::MalformedFrame { .. }))
        .count();
    assert_eq!(malformed, 1);

    drop(line);
    server.shutdown().await;
}

/// Slave ID 5: address 7 dropped, 5 and broadcast 0 dispatched
#[tokio::test]
async fn test_slave_id_filter() {
    let config = RtuServerConfig::default().with_slave_id(5);
    let mut server = ModbusRtuServer::with_config(config).unwrap();
    let (diagnostics, events) = collecting_diagnostics();
    server.set_diagnostics(diagnostics);
    let mut requests = server.take_requests().unwrap();

    let (mut line, port) = tokio::io::duplex(256);
    server.listen_stream("ttyUSB2", port).unwrap();

    for address in [7u8, 5, 0] {
        line.write_all(&read_holding(address)).await.unwrap();
    }
    drop(line);
    wait_for(|| server.active_listeners() == 0).await;

    let reports = server.shutdown().await;
    assert_eq!(reports[0].exit, ListenerExit::StreamClosed);

    let mut addresses = Vec::new();
    while let Some(request) = requests.recv().await {
        addresses.push(request.frame.slave_id());
    }
    assert_eq!(addresses, vec![5, 0]);

    let events = events.lock().unwrap();
    assert!(events.contains(&DiagnosticEvent::AddressMismatch {
        port: "ttyUSB2".to_string(),
        address: 7,
        slave_id: 5,
    }));
}

/// One dead port stops its own listener only
#[tokio::test]
async fn test_transport_error_is_isolated() {
    let mut server = ModbusRtuServer::new();
    let mut requests = server.take_requests().unwrap();

    let dead = tokio_test::io::Builder::new()
        .read(&[0x01, 0x03, 0x00])
        .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged"))
        .build();
    let (mut line, healthy) = tokio::io::duplex(256);

    server.listen_stream("dead", dead).unwrap();
    server.listen_stream("healthy", healthy).unwrap();

    wait_for(|| server.active_listeners() == 1).await;
    let stats = server.get_stats();
    assert_eq!(stats.ports[0].stats.state, ListenerState::Stopped);
    assert_eq!(stats.ports[1].stats.state, ListenerState::Running);

    line.write_all(&read_holding(3)).await.unwrap();
    let request = requests.recv().await.unwrap();
    assert_eq!(request.port.name(), "healthy");

    drop(line);
    let reports = server.shutdown().await;
    assert!(matches!(&reports[0].exit, ListenerExit::TransportError(reason) if reason.contains("cable unplugged")));
    assert_eq!(reports[1].exit, ListenerExit::StreamClosed);
}

/// Shutdown waits for the frame in flight and no read happens afterwards
#[tokio::test]
async fn test_shutdown_waits_for_listener_release() {
    let mut server = ModbusRtuServer::new();
    let mut requests = server.take_requests().unwrap();

    let (mut line, port) = tokio::io::duplex(256);
    let polls = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicBool::new(false));
    server
        .listen_stream(
            "ttyUSB3",
            TrackedLine { inner: port, polls: polls.clone(), released: released.clone() },
        )
        .unwrap();

    let frame = read_holding(1);
    line.write_all(&frame[..3]).await.unwrap();
    wait_for(|| polls.load(Ordering::SeqCst) >= 4).await;

    let shutdown = tokio::spawn(async move {
        let reports = server.shutdown().await;
        (server, reports)
    });

    // The listener is blocked mid-frame; shutdown cannot complete yet.
    sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());

    line.write_all(&frame[3..]).await.unwrap();
    let (server, reports) = shutdown.await.unwrap();
    assert_eq!(reports[0].exit, ListenerExit::Shutdown);
    assert_eq!(server.active_listeners(), 0);
    assert!(!server.is_running());

    assert_eq!(server.get_stats().ports[0].stats.state, ListenerState::Stopped);

    // The frame in flight was still dispatched.
    let request = requests.recv().await.unwrap();
    assert_eq!(request.frame.to_bytes(), frame);
    let reply_port = request.port.clone();
    drop(request);
    assert!(requests.recv().await.is_none());

    // The write half is still held, so the line stays open, but nobody reads it.
    let polls_at_shutdown = polls.load(Ordering::SeqCst);
    line.write_all(&read_holding(1)).await.unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(polls.load(Ordering::SeqCst), polls_at_shutdown);
    assert!(!released.load(Ordering::SeqCst));

    drop(reply_port);
    assert!(released.load(Ordering::SeqCst));
}

/// A worker can answer on the port a request arrived on
#[tokio::test]
async fn test_reply_on_originating_port() {
    let mut server = ModbusRtuServer::new();
    let mut requests = server.take_requests().unwrap();

    let (mut line, port) = tokio::io::duplex(256);
    server.listen_stream("ttyUSB4", port).unwrap();

    let request_bytes = RtuFrame::new(1, ModbusFunction::WriteSingleRegister, vec![0x00, 0x01, 0x00, 0x03]).to_bytes();
    line.write_all(&request_bytes).await.unwrap();

    let request = requests.recv().await.unwrap();
    // Write single register replies echo the request.
    request.port.write_all(&request.frame.to_bytes()).await.unwrap();

    let mut echoed = vec![0u8; request_bytes.len()];
    tokio::io::AsyncReadExt::read_exact(&mut line, &mut echoed).await.unwrap();
    assert_eq!(echoed, request_bytes);

    drop(line);
    server.shutdown().await;
}
