//! # Gateway Session
//!
//! One persistent Modbus TCP connection to the gateway that fronts every
//! meter. All device I/O of the process goes through a single session, one
//! request at a time.
//!
//! ## Resynchronisation
//!
//! A session that timed out or received a miscorrelated frame may still
//! deliver a late reply, which would then be matched against the next
//! request. Such a session is closed immediately and the next cycle has to
//! reconnect. Before every request, bytes already waiting on the socket are
//! discarded; that narrows the window for stale replies but does not close
//! it, which is why closing on error stays mandatory.
//!
//! ```text
//!            connect() ok
//! Disconnected ─────────────▶ Connected
//!      ▲                          │
//!      └──────────────────────────┘
//!   timeout / frame error / I/O error / close()
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::codec::{decode_read_response, encode_read_request, MbapHeader, ReadRequest};
use crate::constants::{DEFAULT_TCP_PORT, MBAP_HEADER_LEN};
use crate::error::{MeterError, MeterResult};
use crate::logging::HexDump;
use crate::timing::PollTiming;

/// Connection state of a [`RegisterTransport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connected => f.write_str("connected"),
        }
    }
}

/// Counters kept for the lifetime of a session object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connects: u64,
    pub connect_failures: u64,
    pub requests_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub frame_errors: u64,
    pub exceptions: u64,
    pub stale_bytes_discarded: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connects={} connect_failures={} requests={} responses={} timeouts={} frame_errors={} exceptions={} stale_bytes={}",
            self.connects,
            self.connect_failures,
            self.requests_sent,
            self.responses_received,
            self.timeouts,
            self.frame_errors,
            self.exceptions,
            self.stale_bytes_discarded
        )
    }
}

/// Register-read transport used by the device reader and the scheduler.
///
/// # Implemented By
///
/// - [`TcpSession`] - Modbus TCP gateway session
pub trait RegisterTransport: Send {
    fn state(&self) -> SessionState;

    fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Open the connection. A connected transport returns immediately.
    fn connect(&mut self) -> impl Future<Output = MeterResult<()>> + Send;

    /// Read `count` registers starting at `start` from `unit_id` and return
    /// the raw data bytes (`2 * count` on a well-behaved device).
    ///
    /// Fails with [`MeterError::NotConnected`] without touching the wire when
    /// disconnected.
    fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        start: u16,
        count: u16,
    ) -> impl Future<Output = MeterResult<Bytes>> + Send;

    /// Close the connection. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    fn stats(&self) -> SessionStats;
}

/// Where and how to reach the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Deadline for the send and for each of the two receive steps
    pub response_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let timing = PollTiming::default();
        Self {
            host: host.into(),
            port,
            connect_timeout: timing.connect_timeout(),
            response_timeout: timing.response_timeout(),
        }
    }

    /// Gateway on the standard Modbus TCP port
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_TCP_PORT)
    }

    pub fn with_timing(mut self, timing: &PollTiming) -> Self {
        self.connect_timeout = timing.connect_timeout();
        self.response_timeout = timing.response_timeout();
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus TCP session to one gateway.
///
/// The socket is owned exclusively; dropping the session closes it.
#[derive(Debug)]
pub struct TcpSession {
    config: SessionConfig,
    stream: Option<TcpStream>,
    next_transaction_id: u16,
    stats: SessionStats,
}

impl TcpSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            stream: None,
            next_transaction_id: 1,
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transaction id the next request will carry
    pub fn transaction_id(&self) -> u16 {
        self.next_transaction_id
    }

    fn take_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = id.wrapping_add(1);
        id
    }

    fn timeout_ms(&self) -> u64 {
        self.config.response_timeout.as_millis() as u64
    }

    /// One request/response exchange on the open socket
    async fn exchange(&mut self, request: &ReadRequest) -> MeterResult<Bytes> {
        let frame = encode_read_request(request)?;
        let response_timeout = self.config.response_timeout;
        let timeout_ms = self.timeout_ms();
        let stream = self.stream.as_mut().ok_or(MeterError::NotConnected)?;

        let stale = drain_stale(stream)?;
        if stale > 0 {
            debug!("Discarded {} stale bytes before request", stale);
            self.stats.stale_bytes_discarded += stale as u64;
        }

        trace!("TX [{}]", HexDump(&frame));
        match timeout(response_timeout, stream.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(MeterError::connection(format!("send failed: {}", e))),
            Err(_) => return Err(MeterError::timeout("send request", timeout_ms)),
        }
        self.stats.requests_sent += 1;

        let mut header = [0u8; MBAP_HEADER_LEN];
        read_step(stream, &mut header, response_timeout, "read header").await?;
        let remaining = MbapHeader::parse(&header)?.check_response(request.transaction_id)?;

        let mut body = BytesMut::zeroed(remaining);
        read_step(stream, &mut body, response_timeout, "read body").await?;
        trace!("RX [{} {}]", HexDump(&header), HexDump(&body));

        decode_read_response(request.function_code, &body)
    }

    fn record_failure(&mut self, err: &MeterError) {
        match err {
            MeterError::Timeout { .. } => self.stats.timeouts += 1,
            MeterError::Frame { .. } => self.stats.frame_errors += 1,
            MeterError::Exception { .. } => self.stats.exceptions += 1,
            _ => {}
        }
    }
}

/// `read_exact` under a deadline, mapping failures onto the session taxonomy
async fn read_step(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Duration,
    operation: &str,
) -> MeterResult<()> {
    match timeout(deadline, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(MeterError::connection(
            format!("{}: gateway closed the connection", operation),
        )),
        Ok(Err(e)) => Err(MeterError::connection(format!("{}: {}", operation, e))),
        Err(_) => Err(MeterError::timeout(operation, deadline.as_millis() as u64)),
    }
}

/// Discard whatever is already buffered on the socket without waiting.
fn drain_stale(stream: &TcpStream) -> MeterResult<usize> {
    let mut scratch = [0u8; 256];
    let mut total = 0;
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => return Err(MeterError::connection("gateway closed the connection")),
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

impl RegisterTransport for TcpSession {
    fn state(&self) -> SessionState {
        if self.stream.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    async fn connect(&mut self) -> MeterResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.config.address();
        debug!("TCP connecting: {}", addr);

        match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("Connected to gateway {}", addr);
                self.stream = Some(stream);
                self.stats.connects += 1;
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.connect_failures += 1;
                Err(MeterError::connection(format!(
                    "Failed to connect to {}: {}",
                    addr, e
                )))
            }
            Err(_) => {
                self.stats.connect_failures += 1;
                Err(MeterError::timeout(
                    format!("connect to {}", addr),
                    self.config.connect_timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        start: u16,
        count: u16,
    ) -> MeterResult<Bytes> {
        if self.stream.is_none() {
            return Err(MeterError::NotConnected);
        }

        let request = ReadRequest {
            transaction_id: self.take_transaction_id(),
            unit_id,
            function_code,
            start,
            count,
        };

        match self.exchange(&request).await {
            Ok(data) => {
                self.stats.responses_received += 1;
                Ok(data)
            }
            Err(e) => {
                self.record_failure(&e);
                if e.closes_session() {
                    warn!(
                        "unit {} read {}+{} failed, dropping session: {}",
                        unit_id, start, count, e
                    );
                    self.close().await;
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown: {}", e);
            }
            info!(
                "Closed gateway session {} ({})",
                self.config.address(),
                self.stats
            );
        }
    }

    fn stats(&self) -> SessionStats {
        self.stats
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        if self.stream.is_some() {
            debug!(
                "Dropping open gateway session {} ({})",
                self.config.address(),
                self.stats
            );
        }
    }
}
