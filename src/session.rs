//! Session / demux engine (C3).
//!
//! Owns the socket, the deferred-response buffer, the outstanding-awaiter
//! map, and the event subscription registry. One background task reads
//! packets off the wire continuously and either resolves a waiting caller or
//! routes the packet to the event registry; callers never read the socket
//! directly.

use crate::actionid::ActionIdGenerator;
use crate::channel::Channel;
use crate::error::{AmiError, Result};
use crate::events::{EventMessage, Registry};
use crate::packet::Packet;
use crate::parser::PacketParser;
use crate::transport::{self, LineReader, LineWriter};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

const BANNER: &str = "Asterisk Call Manager/1.0";
const DEFAULT_DEFERRED_CAPACITY: usize = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials and tuning knobs for [`Session::connect`].
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub username: String,
    pub secret: String,
    /// If false, sends `Events: off` on login; the session still receives
    /// action responses but no unsolicited events.
    pub events_enabled: bool,
    /// Per-session nonce mixed into minted ActionIDs.
    pub nonce: u64,
    pub default_timeout: Duration,
    pub deferred_capacity: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            username: String::new(),
            secret: String::new(),
            events_enabled: true,
            nonce: 1,
            default_timeout: DEFAULT_TIMEOUT,
            deferred_capacity: DEFAULT_DEFERRED_CAPACITY,
        }
    }
}

#[derive(Default)]
struct ConnState {
    awaiters: HashMap<String, oneshot::Sender<Packet>>,
    deferred: VecDeque<Packet>,
}

enum ReaderModeMarker {
    Background,
    Manual,
}

struct Inner {
    writer: LineWriter,
    state: Mutex<ConnState>,
    registry: Registry,
    action_ids: ActionIdGenerator,
    closed: AtomicBool,
    default_timeout: Duration,
    deferred_capacity: usize,
    mode: ReaderModeMarker,
    manual_reader: tokio::sync::Mutex<Option<(LineReader, PacketParser)>>,
}

/// A live, authenticated AMI connection. Cheaply cloneable; every clone
/// shares the same underlying socket and state.
#[derive(Clone)]
pub struct Session(Arc<Inner>);

impl Session {
    /// Perform the banner check and login handshake over `stream`, then
    /// start a background task that continuously demultiplexes the
    /// connection (the *multi-threaded* realisation from the concurrency
    /// model).
    pub async fn connect(stream: TcpStream, opts: ConnectOptions) -> Result<Session> {
        Session::connect_with_mode(stream, opts, true).await
    }

    /// Like [`Session::connect`], but does not spawn a background reader:
    /// the caller must drive progress by calling [`Session::read_one`]
    /// (the *single-threaded cooperative* realisation). Useful for tests and
    /// for embedding into an external poll/select loop.
    pub async fn connect_manual(stream: TcpStream, opts: ConnectOptions) -> Result<Session> {
        Session::connect_with_mode(stream, opts, false).await
    }

    async fn connect_with_mode(stream: TcpStream, opts: ConnectOptions, background: bool) -> Result<Session> {
        let (mut reader, writer) = transport::split(stream);

        let banner = reader.read_line().await?.ok_or(AmiError::GoneAway)?;
        if banner != BANNER {
            return Err(AmiError::BannerMismatch {
                expected: BANNER.to_owned(),
                got: banner,
            });
        }
        trace!(target: "ami::io", "banner ok");

        let mut login = Packet::action("Login");
        login.set("Username", opts.username.clone());
        login.set("Secret", opts.secret.clone());
        if !opts.events_enabled {
            login.set("Events", "off");
        }
        writer.write_packet_lines(login.encode_lines()).await?;
        trace!(target: "ami::packet", "login sent");

        let mut parser = PacketParser::new();
        let response = loop {
            let line = reader.read_line().await?.ok_or(AmiError::GoneAway)?;
            if let Some(packet) = parser.feed_line(line)? {
                break packet;
            }
        };

        if response.response() == Some("Error") {
            return Err(AmiError::AuthenticationFailure(
                response.message().unwrap_or_default().to_owned(),
            ));
        }
        debug!(target: "ami::state", "authenticated, entering serving state");

        let inner = Arc::new(Inner {
            writer,
            state: Mutex::new(ConnState::default()),
            registry: Registry::new(),
            action_ids: ActionIdGenerator::new(opts.nonce),
            closed: AtomicBool::new(false),
            default_timeout: opts.default_timeout,
            deferred_capacity: opts.deferred_capacity,
            mode: if background {
                ReaderModeMarker::Background
            } else {
                ReaderModeMarker::Manual
            },
            manual_reader: tokio::sync::Mutex::new(None),
        });

        if background {
            let bg_inner = inner.clone();
            tokio::spawn(async move {
                Inner::run_read_loop(bg_inner, reader, parser).await;
            });
        } else {
            *inner.manual_reader.lock().await = Some((reader, parser));
        }

        Ok(Session(inner))
    }

    /// Pump exactly one packet off the wire and dispatch it. Only valid on a
    /// session created with [`Session::connect_manual`]. Returns `Ok(false)`
    /// once the connection has reached EOF.
    pub async fn read_one(&self) -> Result<bool> {
        let mut guard = self.0.manual_reader.lock().await;
        let Some((reader, parser)) = guard.as_mut() else {
            return Err(AmiError::communication(
                "read_one is only available on a connect_manual session",
                Packet::new(),
            ));
        };
        match reader.read_line().await {
            Ok(Some(line)) => match parser.feed_line(line) {
                Ok(Some(packet)) => {
                    if let Err(e) = self.0.dispatch_inbound(packet) {
                        self.0.fail_all();
                        return Err(e);
                    }
                    Ok(true)
                }
                Ok(None) => Ok(true),
                Err(e) => {
                    self.0.fail_all();
                    Err(e)
                }
            },
            Ok(None) => {
                self.0.fail_all();
                Ok(false)
            }
            Err(e) => {
                self.0.fail_all();
                Err(AmiError::Io(e))
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.0.closed.load(Ordering::SeqCst) {
            Err(AmiError::GoneAway)
        } else {
            Ok(())
        }
    }

    /// Submit a pre-built packet: mint and attach an ActionID, write it,
    /// and await the matching response (with the session's default
    /// timeout). The `ActionID` header is stripped before returning.
    pub async fn submit(&self, packet: Packet) -> Result<Packet> {
        self.submit_with_timeout(packet, self.0.default_timeout).await
    }

    pub async fn submit_with_timeout(&self, mut packet: Packet, timeout: Duration) -> Result<Packet> {
        self.ensure_open()?;
        let action_id = self.0.action_ids.next();
        packet.set_action_id(&action_id);

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.0.state.lock().unwrap();
            if let Some(pos) = state.deferred.iter().position(|p| p.action_id() == Some(action_id.as_str())) {
                let deferred = state.deferred.remove(pos).unwrap();
                drop(state);
                let mut deferred = deferred;
                deferred.remove("ActionID");
                return Ok(deferred);
            }
            state.awaiters.insert(action_id.clone(), tx);
        }

        if let Err(e) = self.0.writer.write_packet_lines(packet.encode_lines()).await {
            self.0.state.lock().unwrap().awaiters.remove(&action_id);
            return Err(AmiError::Io(e));
        }
        trace!(target: "ami::packet", action = packet.action_name(), action_id = %action_id, "action submitted");

        match self.await_response(rx, timeout).await {
            Ok(mut response) => {
                response.remove("ActionID");
                Ok(response)
            }
            Err(e) => {
                self.0.state.lock().unwrap().awaiters.remove(&action_id);
                Err(e)
            }
        }
    }

    /// Submit an action and validate its response per §4.3: successful iff
    /// `Response` is `Success`, `Follows`, or `Pong`.
    pub async fn dispatch_action(&self, packet: Packet) -> Result<Packet> {
        let response = self.submit(packet).await?;
        validate_response(response)
    }

    pub async fn dispatch_action_with_timeout(&self, packet: Packet, timeout: Duration) -> Result<Packet> {
        let response = self.submit_with_timeout(packet, timeout).await?;
        validate_response(response)
    }

    pub fn registry(&self) -> &Registry {
        &self.0.registry
    }

    pub fn channel(&self, id: impl Into<String>) -> Channel {
        Channel::new(self.clone(), id)
    }

    pub fn default_timeout(&self) -> Duration {
        self.0.default_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    fn is_manual(&self) -> bool {
        matches!(self.0.mode, ReaderModeMarker::Manual)
    }

    /// Await a single response `oneshot`, pumping `read_one` ourselves when
    /// the session has no background reader task driving the socket.
    async fn await_response(&self, mut rx: oneshot::Receiver<Packet>, timeout: Duration) -> Result<Packet> {
        if !self.is_manual() {
            return match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(packet)) => Ok(packet),
                Ok(Err(_)) => Err(AmiError::GoneAway),
                Err(_) => Err(AmiError::Timeout(timeout)),
            };
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match rx.try_recv() {
                Ok(packet) => return Ok(packet),
                Err(oneshot::error::TryRecvError::Closed) => return Err(AmiError::GoneAway),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(AmiError::Timeout(timeout));
            }
            match tokio::time::timeout(remaining, self.read_one()).await {
                Ok(Ok(true)) => continue,
                Ok(Ok(false)) => return Err(AmiError::GoneAway),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(AmiError::Timeout(timeout)),
            }
        }
    }

    /// Block until `rx` fires or `timeout` elapses. On a background session
    /// this simply awaits the signal (the read loop drives it from its own
    /// task); on a manual session this drives `read_one` itself, since
    /// nothing else is pumping the socket.
    pub(crate) async fn drain_until_signal(&self, mut rx: oneshot::Receiver<()>, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        if !self.is_manual() {
            return match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(AmiError::GoneAway),
                Err(_) => Err(AmiError::Timeout(timeout)),
            };
        }
        loop {
            match rx.try_recv() {
                Ok(()) => return Ok(()),
                Err(oneshot::error::TryRecvError::Closed) => return Err(AmiError::GoneAway),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(AmiError::Timeout(timeout));
            }
            match tokio::time::timeout(remaining, self.read_one()).await {
                Ok(Ok(true)) => continue,
                Ok(Ok(false)) => return Err(AmiError::GoneAway),
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(AmiError::Timeout(timeout)),
            }
        }
    }

    /// Write `Logoff`, wait for the `Goodbye` response (discarding nothing
    /// specially — interleaved events still fire normally on their
    /// subscribers), then close the socket.
    pub async fn close(&self) -> Result<()> {
        if self.0.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let action_id = self.0.action_ids.next();
        let mut packet = Packet::action("Logoff");
        packet.set_action_id(&action_id);

        let (tx, rx) = oneshot::channel();
        self.0.state.lock().unwrap().awaiters.insert(action_id.clone(), tx);

        self.0.writer.write_packet_lines(packet.encode_lines()).await?;

        let response = match self.await_response(rx, self.0.default_timeout).await {
            Ok(packet) => packet,
            Err(e) => {
                self.0.state.lock().unwrap().awaiters.remove(&action_id);
                return Err(e);
            }
        };

        self.0.writer.close().await?;

        if response.response() != Some("Goodbye") {
            return Err(AmiError::communication("expected Goodbye on close", response));
        }
        debug!(target: "ami::state", "session closed");
        Ok(())
    }
}

/// A response is successful iff `Response` is `Success`, `Follows`, or
/// `Pong`; otherwise a `Message: Permission denied` is `PermissionDenied`
/// and anything else is `ActionFailed`.
pub(crate) fn validate_response(response: Packet) -> Result<Packet> {
    if response.is_success() {
        Ok(response)
    } else if response.message() == Some("Permission denied") {
        Err(AmiError::PermissionDenied)
    } else {
        Err(AmiError::ActionFailed(response.message().unwrap_or_default().to_owned()))
    }
}

impl Inner {
    async fn run_read_loop(self: Arc<Self>, mut reader: LineReader, mut parser: PacketParser) {
        loop {
            match reader.read_line().await {
                Ok(Some(line)) => match parser.feed_line(line) {
                    Ok(Some(packet)) => {
                        if let Err(e) = self.dispatch_inbound(packet) {
                            warn!(target: "ami::state", error = %e, "read loop terminating");
                            self.fail_all();
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(target: "ami::packet", error = %e, "malformed packet, closing session");
                        self.fail_all();
                        return;
                    }
                },
                Ok(None) => {
                    debug!(target: "ami::io", "connection closed by peer");
                    self.fail_all();
                    return;
                }
                Err(e) => {
                    warn!(target: "ami::io", error = %e, "transport error, closing session");
                    self.fail_all();
                    return;
                }
            }
        }
    }

    fn dispatch_inbound(self: &Arc<Self>, packet: Packet) -> Result<()> {
        if packet.response().is_some() {
            self.dispatch_response(packet)
        } else if packet.event().is_some() {
            self.dispatch_event(packet)
        } else {
            Err(AmiError::Malformed(format!(
                "packet carries neither Response nor Event: {:?}",
                packet
            )))
        }
    }

    fn dispatch_response(self: &Arc<Self>, packet: Packet) -> Result<()> {
        let action_id = packet.action_id().map(str::to_owned);
        let mut state = self.state.lock().unwrap();

        if let Some(id) = &action_id {
            if let Some(sender) = state.awaiters.remove(id) {
                drop(state);
                let _ = sender.send(packet);
                return Ok(());
            }
        }

        if state.deferred.len() >= self.deferred_capacity {
            return Err(AmiError::ResponseOverflow(self.deferred_capacity));
        }
        state.deferred.push_back(packet);
        Ok(())
    }

    fn dispatch_event(self: &Arc<Self>, packet: Packet) -> Result<()> {
        let event_name = match packet.event() {
            Some(name) => name.to_owned(),
            None => return Ok(()),
        };

        let session = Session(self.clone());
        let channel = packet.get("Channel").map(|id| Channel::new(session.clone(), id.to_owned()));
        let channel1 = packet.get("Channel1").map(|id| Channel::new(session.clone(), id.to_owned()));
        let channel2 = packet.get("Channel2").map(|id| Channel::new(session.clone(), id.to_owned()));

        let message = EventMessage {
            packet,
            channel,
            channel1,
            channel2,
        };

        let specific = format!("on_{}", event_name);
        if self.registry.has_subscriber(&specific) {
            self.registry.fire(&specific, &message)
        } else if self.registry.has_subscriber("on_Event") {
            self.registry.fire("on_Event", &message)
        } else {
            trace!(target: "ami::state", event = %event_name, "event dropped, no subscriber");
            Ok(())
        }
    }

    fn fail_all(self: &Arc<Self>) {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.awaiters.clear();
    }
}
