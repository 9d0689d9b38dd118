//! Transport session
//!
//! Owns the link to one receiver: connects, sends the output configuration,
//! reads and parses NMEA, and reconnects after any I/O failure until it is
//! closed. Published locations are handed to a [`SessionSink`].
//!
//! State machine:
//! `Disconnected -> Connecting -> Configuring -> Streaming`, back to
//! `Disconnected` on failure, and `Closed` once [`TransportSession::close`]
//! has run.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::assembler::{NmeaParser, ParseOutcome, PublishPolicy};
use super::location::Location;
use super::protocol::commands::{Reacquire, ReceiverDialect};
use super::protocol::framing::BUFFER_CAPACITY;
use super::transport::{millis, Connection, Connector, DeviceAddress, DeviceGuard, TransportError};

/// Upper bound on closing a connection during shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Not connected; a reconnect is pending
    Disconnected,
    /// Opening the connection
    Connecting,
    /// Sending receiver configuration
    Configuring,
    /// Reading NMEA
    Streaming,
    /// Closed for good
    Closed,
}

/// Session timing and parsing configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Pause after connecting before configuration is written
    pub settle_delay: Duration,
    /// Pause before every read; some receivers stall when read back-to-back
    pub pre_read_delay: Duration,
    /// Deadline for a single read
    pub read_timeout: Duration,
    /// Pause after a position update or a pass with too little data
    pub idle_delay: Duration,
    /// Pause between tearing down a failed link and reconnecting
    pub reconnect_cooldown: Duration,
    /// Read and receive buffer size
    pub buffer_size: usize,
    /// Full reads discarded in a row after a position update (0 disables)
    pub max_consecutive_skips: u32,
    /// When snapshots are published
    pub publish_policy: PublishPolicy,
    /// Receiver dialects to configure on connect; empty sends nothing
    pub dialects: Vec<ReceiverDialect>,
}

impl SessionConfig {
    /// Set the connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read deadline
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the pre-read, idle, settle and cooldown delays at once
    #[must_use]
    pub fn delays(mut self, pre_read: Duration, idle: Duration, settle: Duration, cooldown: Duration) -> Self {
        self.pre_read_delay = pre_read;
        self.idle_delay = idle;
        self.settle_delay = settle;
        self.reconnect_cooldown = cooldown;
        self
    }

    /// Set the buffer size
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the skip-ahead limit
    #[must_use]
    pub fn max_consecutive_skips(mut self, skips: u32) -> Self {
        self.max_consecutive_skips = skips;
        self
    }

    /// Set the publish policy
    #[must_use]
    pub fn publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    /// Set the receiver dialects to configure
    #[must_use]
    pub fn dialects(mut self, dialects: Vec<ReceiverDialect>) -> Self {
        self.dialects = dialects;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            settle_delay: Duration::from_millis(200),
            pre_read_delay: Duration::from_millis(100),
            read_timeout: Duration::from_millis(1100),
            idle_delay: Duration::from_millis(500),
            reconnect_cooldown: Duration::from_millis(1000),
            buffer_size: BUFFER_CAPACITY,
            max_consecutive_skips: 4,
            publish_policy: PublishPolicy::default(),
            dialects: ReceiverDialect::ALL.to_vec(),
        }
    }
}

/// Session statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Bytes read from the receiver
    pub bytes_received: u64,
    /// Sentences decoded
    pub sentences_decoded: u64,
    /// Supported sentences rejected for bad checksums
    pub sentences_rejected: u64,
    /// Full reads discarded by skip-ahead
    pub buffers_skipped: u64,
    /// Links re-established after a failure
    pub reconnects: u64,
    /// Reads that hit the deadline
    pub stalls: u64,
    /// When the current link came up
    pub connected_since: Option<DateTime<Utc>>,
}

/// Receives what the session produces
pub trait SessionSink: Send + Sync {
    /// A snapshot carrying a fix quality was published
    fn location_published(&self, location: Location);

    /// The link failed; a reconnect follows
    fn link_lost(&self, error: &TransportError);
}

enum SessionCommand {
    Reacquire,
}

/// Why streaming stopped
enum StreamExit {
    Cancelled,
    Failed(TransportError),
}

/// Live session with one receiver
pub struct TransportSession {
    address: DeviceAddress,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<RwLock<SessionStats>>,
    last_fix: Arc<RwLock<Option<Location>>>,
    cmd_tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Connect and start streaming.
    ///
    /// The first connection attempt happens here, so an unreachable
    /// receiver is reported to the caller. Later failures are retried in
    /// the background.
    pub async fn start(
        address: DeviceAddress,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        sink: Arc<dyn SessionSink>,
    ) -> Result<Self, TransportError> {
        Self::launch(address, connector, config, sink, None).await
    }

    /// Like [`start`](Self::start), holding `claim` for the life of the
    /// worker. The device stays claimed until its link is closed, even
    /// when the session is dropped without [`close`](Self::close).
    pub async fn start_claimed(
        address: DeviceAddress,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        sink: Arc<dyn SessionSink>,
        claim: DeviceGuard,
    ) -> Result<Self, TransportError> {
        Self::launch(address, connector, config, sink, Some(claim)).await
    }

    async fn launch(
        address: DeviceAddress,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        sink: Arc<dyn SessionSink>,
        claim: Option<DeviceGuard>,
    ) -> Result<Self, TransportError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let state = Arc::new(RwLock::new(SessionState::Disconnected));
        let stats = Arc::new(RwLock::new(SessionStats::default()));
        let last_fix = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        let mut worker = Worker {
            address: address.clone(),
            connector,
            parser: NmeaParser::with_config(config.buffer_size, config.publish_policy),
            config,
            sink,
            state: state.clone(),
            stats: stats.clone(),
            last_fix: last_fix.clone(),
            cancel: cancel.clone(),
            commands: cmd_rx,
            _claim: claim,
        };

        let conn = match worker.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                worker.set_state(SessionState::Closed);
                return Err(e);
            }
        };
        let handle = tokio::spawn(worker.run(conn));

        Ok(Self {
            address,
            state,
            stats,
            last_fix,
            cmd_tx,
            cancel,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Receiver address
    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SessionStats {
        self.stats.read().clone()
    }

    /// Last valid location seen on this session
    pub fn last_fix(&self) -> Option<Location> {
        self.last_fix.read().clone()
    }

    /// Ask the receiver to restart and re-acquire its fix.
    ///
    /// A hot start seeded with the last fix is used when one exists.
    pub async fn reacquire_fix(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.cmd_tx
            .send(SessionCommand::Reacquire)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// Stop the session and close the link.
    ///
    /// Idempotent. Returns once the worker has exited.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session worker ended abnormally");
            }
        }
        *self.state.write() = SessionState::Closed;
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    address: DeviceAddress,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    parser: NmeaParser,
    sink: Arc<dyn SessionSink>,
    state: Arc<RwLock<SessionState>>,
    stats: Arc<RwLock<SessionStats>>,
    last_fix: Arc<RwLock<Option<Location>>>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<SessionCommand>,
    _claim: Option<DeviceGuard>,
}

impl Worker {
    fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(device = %self.address, from = ?*current, to = ?state, "session state");
            *current = state;
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    async fn connect(&mut self) -> Result<Box<dyn Connection>, TransportError> {
        self.set_state(SessionState::Connecting);

        let opened = self
            .connector
            .open(&self.address, self.config.connect_timeout)
            .await;
        let mut conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };
        debug!(info = %conn.connection_info(), "connected");

        self.set_state(SessionState::Configuring);
        self.configure(conn.as_mut()).await;

        self.stats.write().connected_since = Some(Utc::now());
        self.set_state(SessionState::Streaming);
        Ok(conn)
    }

    /// Write the output configuration. A failed write abandons that
    /// dialect only; failures only cost bandwidth.
    async fn configure(&self, conn: &mut dyn Connection) {
        if self.config.dialects.is_empty() {
            return;
        }

        tokio::time::sleep(self.config.settle_delay).await;

        for dialect in &self.config.dialects {
            for sentence in dialect.configuration() {
                if let Err(e) = conn.write(sentence.as_bytes()).await {
                    warn!(?dialect, error = %e, "could not configure receiver output");
                    break;
                }
            }
        }
    }

    async fn run(mut self, first: Box<dyn Connection>) {
        let mut next = Some(first);

        loop {
            let mut conn = match next.take() {
                Some(conn) => conn,
                None => {
                    let cancel = self.cancel.clone();
                    let attempt = tokio::select! {
                        () = cancel.cancelled() => break,
                        result = self.connect() => result,
                    };
                    match attempt {
                        Ok(conn) => {
                            self.stats.write().reconnects += 1;
                            info!(device = %self.address, "receiver reconnected");
                            conn
                        }
                        Err(e) => {
                            debug!(device = %self.address, error = %e, "reconnect failed");
                            if !self.pause(self.config.reconnect_cooldown).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            let exit = self.stream(conn.as_mut()).await;
            self.shutdown(conn).await;

            match exit {
                StreamExit::Cancelled => break,
                StreamExit::Failed(e) => {
                    match &e {
                        TransportError::ReadStalled(_) => {
                            info!(device = %self.address, "receiver stalled, reconnecting");
                        }
                        _ => info!(device = %self.address, error = %e, "receiver dropped connection, reconnecting"),
                    }
                    self.set_state(SessionState::Disconnected);
                    self.stats.write().connected_since = None;
                    self.sink.link_lost(&e);

                    if !self.pause(self.config.reconnect_cooldown).await {
                        break;
                    }
                    self.parser.flush();
                }
            }
        }

        self.set_state(SessionState::Closed);
        debug!(device = %self.address, "session worker stopped");
    }

    async fn shutdown(&self, mut conn: Box<dyn Connection>) {
        match tokio::time::timeout(CLOSE_GRACE, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "error closing connection"),
            Err(_) => debug!("connection close timed out"),
        }
    }

    async fn stream(&mut self, conn: &mut dyn Connection) -> StreamExit {
        enum Step {
            Cancelled,
            Command(SessionCommand),
            Read(Result<Result<usize, TransportError>, tokio::time::error::Elapsed>),
        }

        let mut buf = vec![0u8; self.config.buffer_size.max(1)];
        let mut processed_position = false;
        let mut skips = 0u32;

        loop {
            if !self.pause(self.config.pre_read_delay).await {
                return StreamExit::Cancelled;
            }

            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Cancelled,
                Some(cmd) = self.commands.recv() => Step::Command(cmd),
                r = tokio::time::timeout(self.config.read_timeout, conn.read(&mut buf)) => Step::Read(r),
            };

            let n = match step {
                Step::Cancelled => return StreamExit::Cancelled,
                Step::Command(cmd) => {
                    self.handle_command(conn, cmd).await;
                    continue;
                }
                Step::Read(Err(_)) => {
                    self.stats.write().stalls += 1;
                    return StreamExit::Failed(TransportError::ReadStalled(millis(
                        self.config.read_timeout,
                    )));
                }
                Step::Read(Ok(Err(e))) => return StreamExit::Failed(e),
                Step::Read(Ok(Ok(0))) => return StreamExit::Failed(TransportError::Disconnected),
                Step::Read(Ok(Ok(n))) => n,
            };

            self.stats.write().bytes_received += n as u64;

            // A full read right after a position update means a backlog;
            // drop it rather than decode stale sentences, but not forever.
            if processed_position && n >= buf.len() && skips < self.config.max_consecutive_skips {
                self.parser.flush();
                skips += 1;
                self.stats.write().buffers_skipped += 1;
                trace!(skips, "skipping full buffer");
                continue;
            }
            processed_position = false;
            skips = 0;

            let outcome = self.parser.parse(&buf[..n]);
            self.record_parse_stats();

            if let Some(snapshot) = outcome.snapshot() {
                self.publish(snapshot);
            }

            let idle = match &outcome {
                ParseOutcome::NothingToProcess => true,
                parsed => {
                    processed_position = parsed.has_position();
                    processed_position
                }
            };
            if idle && !self.pause(self.config.idle_delay).await {
                return StreamExit::Cancelled;
            }
        }
    }

    fn record_parse_stats(&self) {
        let parsed = self.parser.stats();
        let mut stats = self.stats.write();
        stats.sentences_decoded = parsed.decoded;
        stats.sentences_rejected = parsed.rejected;
    }

    fn publish(&self, snapshot: &super::assembler::GpsSnapshot) {
        // Nothing to say about availability until GGA has reported
        if !snapshot.has_quality() {
            return;
        }

        let location = Location::from_snapshot(snapshot);
        if location.is_valid() {
            *self.last_fix.write() = Some(location.clone());
        }
        self.sink.location_published(location);
    }

    async fn handle_command(&self, conn: &mut dyn Connection, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Reacquire => {
                let command = Reacquire::for_last_fix(self.last_fix.read().as_ref());
                debug!(?command, "re-acquiring fix");
                if let Err(e) = conn.write(command.sentence().as_bytes()).await {
                    warn!(error = %e, "could not re-acquire GPS fix");
                }
            }
        }
    }
}
