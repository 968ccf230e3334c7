//! Newline-delimited delivery to a remote collector over a long-lived stream.
//!
//! [`NetworkSink`] owns at most one connection at a time. A payload that hits a
//! broken connection is resent exactly once after the connection has been
//! re-established, so the collector sees it at least once. If the first write
//! partially went through before the failure the collector may see it twice.
//!
//! Connecting never gives up on its own: attempts repeat every `retry_delay`
//! until one succeeds or the sink is closed. Everything here blocks the calling
//! thread, see [`QueuedSink`](super::QueuedSink) for moving it off hot paths.

use std::{
    fmt::{self, Display},
    io::{self, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError},
    time::Duration,
};

use super::{
    error::{ConfigError, DeliveryError},
    LogSink,
};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Opens the stream a [`NetworkSink`] writes to.
pub trait Connector: Send + Sync {
    type Stream: Write + Send;

    fn connect(&self) -> io::Result<Self::Stream>;

    /// Human readable peer, used in diagnostics.
    fn endpoint(&self) -> String;
}

/// Plain TCP to `host:port`. Every resolved address is tried in turn.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
    write_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.is_empty() || host.chars().any(char::is_whitespace) || port == 0 {
            return Err(ConfigError::InvalidEndpoint(format!("{host}:{port}")));
        }

        Ok(Self {
            host,
            port,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Some(Duration::from_secs(10)),
        })
    }

    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }

    /// `None` lets writes block for as long as the kernel allows.
    pub fn with_write_timeout(self, write_timeout: Option<Duration>) -> Self {
        Self {
            write_timeout: write_timeout.filter(|t| !t.is_zero()),
            ..self
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            let timeout = if self.connect_timeout.is_zero() {
                Duration::from_secs(10)
            } else {
                self.connect_timeout
            };

            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(self.write_timeout)?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} resolved to no addresses", self.endpoint()),
            )
        }))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Failures after which the connection is gone and worth re-establishing.
fn is_connection_lost(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

pub struct NetworkSink<C: Connector = TcpConnector> {
    connector: C,
    retry_delay: Duration,
    stream: Mutex<Option<C::Stream>>,
    state: Mutex<ConnectionState>,
    closed: Mutex<bool>,
    wakeup: Condvar,
}

impl NetworkSink<TcpConnector> {
    pub fn tcp(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        Ok(Self::new(TcpConnector::new(host, port)?, DEFAULT_RETRY_DELAY))
    }
}

impl<C: Connector> NetworkSink<C> {
    /// Starts disconnected. The first `deliver` (or [`connect`](Self::connect)) dials.
    pub fn new(connector: C, retry_delay: Duration) -> Self {
        Self {
            connector,
            retry_delay,
            stream: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            closed: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Blocks until connected. Returns immediately if already connected.
    pub fn connect(&self) -> Result<(), DeliveryError> {
        let mut slot = self.lock_stream();
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        if slot.is_none() {
            self.establish(&mut slot, ConnectionState::Connecting)?;
        }
        Ok(())
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<C::Stream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Sleeps for `retry_delay`, waking early when the sink gets closed.
    fn back_off(&self) {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .wakeup
            .wait_timeout_while(closed, self.retry_delay, |closed| !*closed);
    }

    fn establish(
        &self,
        slot: &mut Option<C::Stream>,
        entering: ConnectionState,
    ) -> Result<(), DeliveryError> {
        self.set_state(entering);
        let endpoint = self.connector.endpoint();
        let mut attempts: u64 = 0;

        loop {
            if self.is_closed() {
                self.set_state(ConnectionState::Disconnected);
                return Err(DeliveryError::Closed);
            }

            attempts += 1;
            match self.connector.connect() {
                Ok(stream) => {
                    *slot = Some(stream);
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(%endpoint, attempts, "connected to log collector");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        %endpoint,
                        attempts,
                        "failed to connect to log collector: {err}, retrying in {:?}",
                        self.retry_delay
                    );
                    self.set_state(ConnectionState::Connecting);
                    self.back_off();
                }
            }
        }
    }

    fn write_line(stream: &mut C::Stream, payload: &str) -> io::Result<()> {
        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload.as_bytes());
        line.push(b'\n');

        stream.write_all(&line)?;
        stream.flush()
    }
}

impl<C: Connector> LogSink for NetworkSink<C> {
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        let mut slot = self.lock_stream();
        // close() may have run while we waited for the lock.
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        if slot.is_none() {
            self.establish(&mut slot, ConnectionState::Connecting)?;
        }

        let first = match slot.as_mut() {
            Some(stream) => Self::write_line(stream, payload),
            None => return Err(DeliveryError::Closed),
        };

        match first {
            Ok(()) => Ok(()),
            Err(err) if is_connection_lost(&err) => {
                tracing::warn!(
                    endpoint = %self.connector.endpoint(),
                    "connection to log collector lost: {err}, reconnecting"
                );
                *slot = None;
                self.establish(&mut slot, ConnectionState::Reconnecting)?;

                let resent = match slot.as_mut() {
                    Some(stream) => Self::write_line(stream, payload),
                    None => return Err(DeliveryError::Closed),
                };
                resent.map_err(|err| {
                    *slot = None;
                    self.set_state(ConnectionState::Disconnected);
                    DeliveryError::Transport(err)
                })
            }
            Err(err) => {
                // The stream may hold a partial line, do not reuse it.
                *slot = None;
                self.set_state(ConnectionState::Disconnected);
                Err(DeliveryError::Io(err))
            }
        }
    }

    /// Skipped while a delivery holds the connection; that delivery flushes
    /// its own write.
    fn flush(&self) {
        let mut slot = match self.stream.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if let Some(stream) = slot.as_mut() {
            let _ = stream.flush();
        }
    }

    fn close(&self) {
        {
            let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return;
            }
            *closed = true;
        }
        self.wakeup.notify_all();

        let mut slot = self.lock_stream();
        if let Some(mut stream) = slot.take() {
            let _ = stream.flush();
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::debug!(endpoint = %self.connector.endpoint(), "closed log collector sink");
    }

    fn describe(&self) -> String {
        format!("collector {}", self.connector.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Instant,
    };

    use super::*;

    /// In-memory collector with injectable connect and write failures.
    #[derive(Default)]
    struct Script {
        connect_failures: AtomicUsize,
        connects: AtomicUsize,
        write_failures: AtomicUsize,
        failure_kind: Mutex<Option<io::ErrorKind>>,
        received: Mutex<Vec<u8>>,
    }

    impl Script {
        fn lines(&self) -> Vec<String> {
            let received = self.received.lock().unwrap();
            String::from_utf8(received.clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn fail_writes(&self, count: usize, kind: io::ErrorKind) {
            *self.failure_kind.lock().unwrap() = Some(kind);
            self.write_failures.store(count, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector(Arc<Script>);

    struct ScriptedStream(Arc<Script>);

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let script = &self.0;
            if script.write_failures.load(Ordering::SeqCst) > 0 {
                script.write_failures.fetch_sub(1, Ordering::SeqCst);
                let kind = script
                    .failure_kind
                    .lock()
                    .unwrap()
                    .unwrap_or(io::ErrorKind::BrokenPipe);
                return Err(io::Error::from(kind));
            }
            script.received.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Connector for ScriptedConnector {
        type Stream = ScriptedStream;

        fn connect(&self) -> io::Result<ScriptedStream> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.connect_failures.load(Ordering::SeqCst) > 0 {
                self.0.connect_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
            }
            Ok(ScriptedStream(self.0.clone()))
        }

        fn endpoint(&self) -> String {
            "scripted".to_string()
        }
    }

    fn sink(retry_delay: Duration) -> (NetworkSink<ScriptedConnector>, Arc<Script>) {
        let connector = ScriptedConnector::default();
        let script = connector.0.clone();
        (NetworkSink::new(connector, retry_delay), script)
    }

    #[test]
    fn starts_disconnected_and_connects_lazily() {
        let (sink, script) = sink(Duration::from_millis(1));
        assert_eq!(sink.state(), ConnectionState::Disconnected);

        sink.deliver("a").unwrap();
        sink.deliver("b").unwrap();

        assert_eq!(sink.state(), ConnectionState::Connected);
        assert_eq!(script.lines(), vec!["a", "b"]);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broken_pipe_reconnects_and_resends_once() {
        let (sink, script) = sink(Duration::from_millis(1));
        sink.connect().unwrap();
        script.fail_writes(1, io::ErrorKind::BrokenPipe);

        sink.deliver("payload").unwrap();

        assert_eq!(script.lines(), vec!["payload"]);
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
        assert_eq!(sink.state(), ConnectionState::Connected);
    }

    #[test]
    fn connection_reset_is_also_recovered() {
        let (sink, script) = sink(Duration::from_millis(1));
        sink.deliver("first").unwrap();
        script.fail_writes(1, io::ErrorKind::ConnectionReset);

        sink.deliver("second").unwrap();

        assert_eq!(script.lines(), vec!["first", "second"]);
    }

    #[test]
    fn second_failure_after_reconnect_surfaces() {
        let (sink, script) = sink(Duration::from_millis(1));
        sink.connect().unwrap();
        script.fail_writes(2, io::ErrorKind::BrokenPipe);

        let err = sink.deliver("lost").unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert_eq!(sink.state(), ConnectionState::Disconnected);

        sink.deliver("next").unwrap();
        assert_eq!(script.lines(), vec!["next"]);
        assert_eq!(script.connects.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn other_write_errors_drop_the_connection_without_resend() {
        let (sink, script) = sink(Duration::from_millis(1));
        sink.connect().unwrap();
        script.fail_writes(1, io::ErrorKind::TimedOut);

        assert!(matches!(
            sink.deliver("slow").unwrap_err(),
            DeliveryError::Io(_)
        ));
        assert_eq!(sink.state(), ConnectionState::Disconnected);
        assert!(script.lines().is_empty());
    }

    #[test]
    fn connect_retries_at_fixed_delay() {
        let (sink, script) = sink(Duration::from_millis(20));
        script.connect_failures.store(3, Ordering::SeqCst);

        let started = Instant::now();
        sink.deliver("eventually").unwrap();

        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(script.connects.load(Ordering::SeqCst), 4);
        assert_eq!(script.lines(), vec!["eventually"]);
    }

    #[test]
    fn close_is_idempotent_and_rejects_later_payloads() {
        let (sink, _script) = sink(Duration::from_millis(1));
        sink.deliver("before").unwrap();

        sink.close();
        sink.close();

        assert_eq!(sink.state(), ConnectionState::Disconnected);
        assert!(sink.deliver("after").unwrap_err().is_closed());
        assert!(sink.connect().unwrap_err().is_closed());
    }

    #[test]
    fn close_interrupts_a_pending_connect() {
        let (sink, script) = sink(Duration::from_secs(30));
        script.connect_failures.store(usize::MAX, Ordering::SeqCst);
        let sink = Arc::new(sink);

        let pending = {
            let sink = sink.clone();
            thread::spawn(move || sink.deliver("never"))
        };

        while script.connects.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        let started = Instant::now();
        sink.close();

        let result = pending.join().unwrap();
        assert!(result.unwrap_err().is_closed());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sink.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn flush_does_not_wait_for_a_pending_connect() {
        let (sink, script) = sink(Duration::from_secs(30));
        script.connect_failures.store(usize::MAX, Ordering::SeqCst);
        let sink = Arc::new(sink);

        let pending = {
            let sink = sink.clone();
            thread::spawn(move || sink.deliver("never"))
        };
        while script.connects.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        let (flushed, done) = std::sync::mpsc::channel();
        {
            let sink = sink.clone();
            thread::spawn(move || {
                sink.flush();
                let _ = flushed.send(());
            });
        }
        assert!(done.recv_timeout(Duration::from_secs(2)).is_ok());

        sink.close();
        assert!(pending.join().unwrap().unwrap_err().is_closed());
    }

    #[test]
    fn tcp_connector_rejects_malformed_endpoints() {
        assert!(TcpConnector::new("", 5000).is_err());
        assert!(TcpConnector::new("local host", 5000).is_err());
        assert!(TcpConnector::new("localhost", 0).is_err());
        assert!(TcpConnector::new("localhost", 5000).is_ok());
    }
}
