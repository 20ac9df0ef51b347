//! Switch connections: handshake, receive loop, writer thread and the accept loop.
//!
//! Every accepted stream gets its own thread that runs the handshake and then
//! the receive loop. Outbound frames go through a bounded channel to a
//! per-switch writer thread, so whoever sends never blocks on a slow switch.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::error::ConnectionError;
use crate::ofp_header::OfpHeader;
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{MsgCode, PacketIn, PortStatus, SwitchError, SwitchFeatures};
use crate::policy::SwitchId;
use crate::registry::Registry;

/// Everything connections report to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The switch is admitted; its features are on the registered handle.
    SwitchConnected {
        switch_id: SwitchId,
        conn_id: u64,
    },
    SwitchDisconnected {
        switch_id: SwitchId,
        conn_id: u64,
    },
    PacketIn {
        switch_id: SwitchId,
        conn_id: u64,
        xid: u32,
        packet_in: PacketIn,
    },
    BarrierReply {
        switch_id: SwitchId,
        conn_id: u64,
        xid: u32,
    },
    PortStatus {
        switch_id: SwitchId,
        conn_id: u64,
        status: PortStatus,
    },
    SwitchError {
        switch_id: SwitchId,
        conn_id: u64,
        error: SwitchError,
    },
}

/// Lifecycle of a connection. Only ever moves forward.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnStatus {
    Connected = 0,
    Disconnected = 1,
}

impl ConnStatus {
    fn of_int(v: u8) -> ConnStatus {
        match v {
            0 => ConnStatus::Connected,
            _ => ConnStatus::Disconnected,
        }
    }
}

/// Outcome of handing a message to a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    /// The writer is full. Nothing was consumed; try again later.
    Backpressure,
    Disconnected,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a new connection.
pub fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// The controller's side of one connected switch.
#[derive(Debug)]
pub struct SwitchHandle {
    switch_id: SwitchId,
    conn_id: u64,
    features: SwitchFeatures,
    status: AtomicU8,
    outbound: Sender<Vec<u8>>,
    /// Kept only to shut the socket down on close.
    stream: Option<TcpStream>,
    events: Sender<Event>,
}

impl SwitchHandle {
    /// A handle for a switch that completed its handshake. Frames passed to
    /// `send` are pushed onto `outbound`; `close` reports on `events`.
    pub fn new(
        switch_id: SwitchId,
        conn_id: u64,
        features: SwitchFeatures,
        outbound: Sender<Vec<u8>>,
        stream: Option<TcpStream>,
        events: Sender<Event>,
    ) -> SwitchHandle {
        SwitchHandle {
            switch_id,
            conn_id,
            features,
            status: AtomicU8::new(ConnStatus::Connected as u8),
            outbound,
            stream,
            events,
        }
    }

    pub fn switch_id(&self) -> SwitchId {
        self.switch_id
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// What the switch reported in its features reply.
    pub fn features(&self) -> &SwitchFeatures {
        &self.features
    }

    pub fn status(&self) -> ConnStatus {
        ConnStatus::of_int(self.status.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnStatus::Connected
    }

    /// Encode `msg` and hand it to the writer without blocking.
    pub fn send(&self, xid: u32, msg: &Message) -> SendResult {
        if !self.is_connected() {
            return SendResult::Disconnected;
        }
        match self.outbound.try_send(Message::marshal(xid, msg)) {
            Ok(()) => SendResult::Sent,
            Err(TrySendError::Full(_)) => SendResult::Backpressure,
            Err(TrySendError::Disconnected(_)) => {
                self.close();
                SendResult::Disconnected
            }
        }
    }

    /// Move to `Disconnected`, shut the socket down and publish
    /// `SwitchDisconnected`. Only the first call does anything; it returns
    /// whether this call was the one.
    pub fn close(&self) -> bool {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if current == ConnStatus::Disconnected as u8 {
                return false;
            }
            match self.status.compare_exchange(
                current,
                ConnStatus::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if let Some(ref stream) = self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        info!("switch {:#x} (conn {}) disconnected", self.switch_id, self.conn_id);
        let _ = self.events.send(Event::SwitchDisconnected {
            switch_id: self.switch_id,
            conn_id: self.conn_id,
        });
        true
    }
}

/// Tunables for accepted connections.
#[derive(Copy, Clone, Debug)]
pub struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub outbound_buffer: usize,
}

/// Read one frame: the header, then exactly the body it declares.
fn read_frame<R: Read>(stream: &mut R) -> Result<(OfpHeader, Vec<u8>), ConnectionError> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf)?;
    let header = OfpHeader::parse(&buf)?;
    let body_len = header
        .body_length()
        .ok_or(ConnectionError::BadFrameLength(header.length()))?;
    let mut body = vec![0; body_len];
    stream.read_exact(&mut body)?;
    Ok((header, body))
}

fn expect_message<R: Read>(stream: &mut R, want: MsgCode) -> Result<Message, ConnectionError> {
    let (header, body) = read_frame(stream).map_err(|e| match e {
        ConnectionError::Io(e) => ConnectionError::from_handshake_io(e),
        e => e,
    })?;
    let (_, msg) = Message::parse(&header, &body)?;
    let got = Message::msg_code_of_message(&msg);
    if got != want {
        return Err(ConnectionError::Handshake(format!("expected {:?}, got {:?}", want, got)));
    }
    Ok(msg)
}

/// Bounds every read on the wrapped stream by one shared deadline.
struct Deadline<'a, S> {
    stream: &'a mut S,
    until: Instant,
}

impl<'a, S: Read + SetReadTimeout> Read for Deadline<'a, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "handshake deadline passed"));
        }
        self.stream.set_read_timeout(Some(left))?;
        self.stream.read(buf)
    }
}

impl<'a, S: Write> Write for Deadline<'a, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Run the OpenFlow handshake on `stream`: hello both ways, then a features
/// request answered by a features reply. The whole exchange must finish
/// within `timeout`.
pub fn handshake<S>(stream: &mut S, timeout: Duration) -> Result<SwitchFeatures, ConnectionError>
where
    S: Read + Write + SetReadTimeout,
{
    let mut conn = Deadline {
        stream: &mut *stream,
        until: Instant::now() + timeout,
    };
    conn.write_all(&Message::marshal(0, &Message::Hello))?;
    expect_message(&mut conn, MsgCode::Hello)?;
    conn.write_all(&Message::marshal(0, &Message::FeaturesReq))?;
    let features = match expect_message(&mut conn, MsgCode::FeaturesResp)? {
        Message::FeaturesReply(features) => features,
        other => {
            return Err(ConnectionError::Handshake(format!(
                "expected features reply, got {:?}",
                Message::msg_code_of_message(&other)
            )))
        }
    };
    stream.set_read_timeout(None)?;
    Ok(features)
}

/// Streams whose reads can be bounded in time.
pub trait SetReadTimeout {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl SetReadTimeout for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Drain `frames` onto the socket until the channel closes or a write fails.
/// A failed write shuts the socket down so the reader notices.
fn writer_loop(switch_id: SwitchId, frames: Receiver<Vec<u8>>, out: Arc<Mutex<TcpStream>>) {
    for frame in frames.iter() {
        let mut stream = out.lock();
        if let Err(e) = stream.write_all(&frame) {
            error!("switch {:#x}: write failed: {}", switch_id, e);
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }
    trace!("switch {:#x}: writer done", switch_id);
}

fn receive_loop(
    stream: &mut TcpStream,
    handle: &SwitchHandle,
    out: &Mutex<TcpStream>,
    events: &Sender<Event>,
) -> Result<(), ConnectionError> {
    let switch_id = handle.switch_id();
    let conn_id = handle.conn_id();
    loop {
        let (header, body) = read_frame(stream)?;
        let (xid, msg) = match Message::parse(&header, &body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("switch {:#x}: skipping frame (xid {}): {}", switch_id, header.xid(), e);
                continue;
            }
        };
        let event = match msg {
            Message::EchoRequest(payload) => {
                trace!("switch {:#x}: echo xid {}", switch_id, xid);
                out.lock().write_all(&Message::marshal(xid, &Message::EchoReply(payload)))?;
                continue;
            }
            Message::PacketIn(packet_in) => Event::PacketIn {
                switch_id,
                conn_id,
                xid,
                packet_in,
            },
            Message::BarrierReply => Event::BarrierReply { switch_id, conn_id, xid },
            Message::PortStatus(status) => Event::PortStatus {
                switch_id,
                conn_id,
                status,
            },
            Message::Error(error) => Event::SwitchError {
                switch_id,
                conn_id,
                error,
            },
            other => {
                debug!(
                    "switch {:#x}: ignoring {:?}",
                    switch_id,
                    Message::msg_code_of_message(&other)
                );
                continue;
            }
        };
        if events.send(event).is_err() {
            return Err(ConnectionError::Closed);
        }
    }
}

/// Drive one accepted stream for its whole life.
///
/// Returns once the connection is gone. The switch is out of the registry and
/// its disconnect has been published by then.
pub fn serve(
    mut stream: TcpStream,
    conn_id: u64,
    settings: ConnectionSettings,
    registry: &Registry,
    events: &Sender<Event>,
) -> Result<(), ConnectionError> {
    let features = match handshake(&mut stream, settings.handshake_timeout) {
        Ok(features) => features,
        Err(e) => {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(e);
        }
    };
    let switch_id = features.datapath_id;
    info!(
        "switch {:#x} connected (conn {}, {} ports, {} buffers)",
        switch_id,
        conn_id,
        features.ports.len(),
        features.num_buffers
    );

    let out = Arc::new(Mutex::new(stream.try_clone()?));
    let (frames_tx, frames_rx) = bounded(settings.outbound_buffer);
    let handle = Arc::new(SwitchHandle::new(
        switch_id,
        conn_id,
        features,
        frames_tx,
        Some(stream.try_clone()?),
        events.clone(),
    ));
    let writer_out = Arc::clone(&out);
    thread::Builder::new()
        .name(format!("ofp-writer-{:x}", switch_id))
        .spawn(move || writer_loop(switch_id, frames_rx, writer_out))?;

    registry.admit(Arc::clone(&handle));
    let result = if events.send(Event::SwitchConnected { switch_id, conn_id }).is_err() {
        Err(ConnectionError::Closed)
    } else {
        receive_loop(&mut stream, &handle, &out, events)
    };

    handle.close();
    registry.remove_if(switch_id, conn_id);
    result
}

/// Accept switches on `listener` until `running` is cleared, serving each on
/// its own thread.
pub fn listen(
    listener: TcpListener,
    settings: ConnectionSettings,
    registry: Registry,
    events: Sender<Event>,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    listener.set_nonblocking(true)?;
    if let Ok(addr) = listener.local_addr() {
        info!("listening for switches on {}", addr);
    }
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!("{}: failed to set blocking mode: {}", peer, e);
                    continue;
                }
                let _ = stream.set_nodelay(true);
                let conn_id = next_conn_id();
                let registry = registry.clone();
                let events = events.clone();
                debug!("accepted {} as conn {}", peer, conn_id);
                let spawned = thread::Builder::new()
                    .name(format!("ofp-conn-{}", peer))
                    .spawn(move || match serve(stream, conn_id, settings, &registry, &events) {
                        Ok(()) => {}
                        Err(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            info!("{}: connection closed by peer", peer)
                        }
                        Err(e @ ConnectionError::Handshake(_))
                        | Err(e @ ConnectionError::HandshakeTimeout)
                        | Err(e @ ConnectionError::Protocol(_)) => info!("{}: handshake failed: {}", peer, e),
                        Err(e) => info!("{}: connection ended: {}", peer, e),
                    });
                if let Err(e) = spawned {
                    error!("failed to spawn connection thread for {}: {}", peer, e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                error!("accept error: {}", e);
            }
        }
    }
    info!("listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow0x01::{Capabilities, SupportedActions};
    use crossbeam_channel::unbounded;
    use std::cell::RefCell;
    use std::io::{self, Cursor};

    fn features(datapath_id: u64) -> SwitchFeatures {
        SwitchFeatures {
            datapath_id,
            num_buffers: 256,
            num_tables: 1,
            supported_capabilities: Capabilities::default(),
            supported_actions: SupportedActions::default(),
            ports: vec![],
        }
    }

    /// Scripted peer: reads come from `input`, writes are collected.
    struct Script {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
        timeouts: RefCell<Vec<Option<Duration>>>,
        /// Hand out one byte per read, pausing this long first.
        trickle: Option<Duration>,
    }

    impl Script {
        fn new(msgs: &[Message]) -> Script {
            let mut input = vec![];
            for msg in msgs {
                input.extend(Message::marshal(0, msg));
            }
            Script {
                input: Cursor::new(input),
                written: vec![],
                timeouts: RefCell::new(vec![]),
                trickle: None,
            }
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.trickle {
                Some(pause) => {
                    thread::sleep(pause);
                    let n = buf.len().min(1);
                    self.input.read(&mut buf[..n])
                }
                None => self.input.read(buf),
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SetReadTimeout for Script {
        fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            self.timeouts.borrow_mut().push(timeout);
            Ok(())
        }
    }

    #[test]
    fn handshake_accepts_hello_then_features() {
        let mut script = Script::new(&[Message::Hello, Message::FeaturesReply(features(42))]);
        let got = handshake(&mut script, Duration::from_millis(50)).unwrap();
        assert_eq!(got.datapath_id, 42);
        let mut expected = Message::marshal(0, &Message::Hello);
        expected.extend(Message::marshal(0, &Message::FeaturesReq));
        assert_eq!(script.written, expected);
        let timeouts = script.timeouts.borrow();
        let (last, reads) = timeouts.split_last().unwrap();
        assert_eq!(*last, None);
        assert!(!reads.is_empty());
        assert!(reads
            .iter()
            .all(|t| matches!(t, Some(left) if *left <= Duration::from_millis(50))));
    }

    #[test]
    fn handshake_deadline_covers_the_whole_exchange() {
        let mut script = Script::new(&[Message::Hello, Message::FeaturesReply(features(42))]);
        script.trickle = Some(Duration::from_millis(10));
        match handshake(&mut script, Duration::from_millis(50)) {
            Err(ConnectionError::HandshakeTimeout) => {}
            other => panic!("unexpected {:?}", other),
        }
        // Each read got less time than the one before it.
        let timeouts = script.timeouts.borrow();
        assert!(timeouts.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn handshake_rejects_features_before_hello() {
        let mut script = Script::new(&[Message::FeaturesReply(features(42)), Message::Hello]);
        match handshake(&mut script, Duration::from_millis(50)) {
            Err(ConnectionError::Handshake(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn handshake_fails_on_eof() {
        let mut script = Script::new(&[Message::Hello]);
        assert!(matches!(
            handshake(&mut script, Duration::from_millis(50)),
            Err(ConnectionError::Io(_))
        ));
    }

    #[test]
    fn short_declared_length_loses_framing() {
        let mut bytes = vec![];
        OfpHeader::marshal(&mut bytes, OfpHeader::new(1, 0, 4, 0));
        match read_frame(&mut Cursor::new(bytes)) {
            Err(ConnectionError::BadFrameLength(4)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn send_reports_backpressure_and_disconnect() {
        let (tx, rx) = bounded(1);
        let (events_tx, events_rx) = unbounded();
        let handle = SwitchHandle::new(7, 1, features(7), tx, None, events_tx);
        assert_eq!(handle.send(1, &Message::BarrierRequest), SendResult::Sent);
        assert_eq!(handle.send(2, &Message::BarrierRequest), SendResult::Backpressure);
        assert_eq!(rx.len(), 1);
        drop(rx);
        assert_eq!(handle.send(3, &Message::BarrierRequest), SendResult::Disconnected);
        assert_eq!(handle.status(), ConnStatus::Disconnected);
        assert_eq!(
            events_rx.try_recv(),
            Ok(Event::SwitchDisconnected { switch_id: 7, conn_id: 1 })
        );
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let (tx, _rx) = bounded(1);
        let (events_tx, events_rx) = unbounded();
        let handle = SwitchHandle::new(7, 3, features(7), tx, None, events_tx);
        assert!(handle.close());
        assert!(!handle.close());
        assert_eq!(handle.send(1, &Message::Hello), SendResult::Disconnected);
        assert_eq!(events_rx.len(), 1);
    }
}
