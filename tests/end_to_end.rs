//! Drives the listener and controller over real TCP with a scripted switch.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use reactive_ofp::config::{BarrierMode, Location, NatConfig};
use reactive_ofp::connection::{listen, ConnectionSettings, Event};
use reactive_ofp::nat::NatPolicy;
use reactive_ofp::ofp_controller::{Controller, ControllerSettings};
use reactive_ofp::ofp_header::OfpHeader;
use reactive_ofp::ofp_message::OfpMessage;
use reactive_ofp::openflow0x01::message::Message;
use reactive_ofp::openflow0x01::{
    Capabilities, PacketIn, PacketInReason, Payload, SupportedActions, SwitchFeatures,
};
use reactive_ofp::packet::{Packet, ETH_TYP_IP, IP_PROTO_TCP};
use reactive_ofp::policy::StaticPolicy;
use reactive_ofp::registry::Registry;

const PUBLIC_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

fn features(datapath_id: u64) -> SwitchFeatures {
    SwitchFeatures {
        datapath_id,
        num_buffers: 0,
        num_tables: 1,
        supported_capabilities: Capabilities::default(),
        supported_actions: SupportedActions::default(),
        ports: vec![],
    }
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

/// A listener on an ephemeral port, stopped on drop.
struct Rig {
    addr: SocketAddr,
    registry: Registry,
    running: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl Rig {
    fn start(events: Sender<Event>, handshake_timeout: Duration) -> Rig {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Registry::new();
        let running = Arc::new(AtomicBool::new(true));
        let settings = ConnectionSettings {
            handshake_timeout,
            outbound_buffer: 64,
        };
        let (reg, run) = (registry.clone(), Arc::clone(&running));
        let listener = thread::spawn(move || listen(listener, settings, reg, events, run).unwrap());
        Rig {
            addr,
            registry,
            running,
            listener: Some(listener),
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }
}

struct FakeSwitch {
    stream: TcpStream,
}

impl FakeSwitch {
    fn connect(addr: SocketAddr) -> FakeSwitch {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        FakeSwitch { stream }
    }

    fn send(&mut self, xid: u32, msg: &Message) {
        self.stream.write_all(&Message::marshal(xid, msg)).unwrap();
    }

    fn recv(&mut self) -> io::Result<(u32, Message)> {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header)?;
        let header = OfpHeader::parse(&header).unwrap();
        let mut body = vec![0u8; header.body_length().unwrap()];
        self.stream.read_exact(&mut body)?;
        Ok(Message::parse(&header, &body).unwrap())
    }

    fn handshake(&mut self, datapath_id: u64) {
        assert_eq!(self.recv().unwrap(), (0, Message::Hello));
        self.send(0, &Message::Hello);
        assert_eq!(self.recv().unwrap(), (0, Message::FeaturesReq));
        self.send(0, &Message::FeaturesReply(features(datapath_id)));
    }

    /// Read flow mods up to and including the next barrier request. Returns
    /// the priorities seen and the barrier's xid.
    fn read_install(&mut self) -> (Vec<u16>, u32) {
        let mut priorities = vec![];
        loop {
            match self.recv().unwrap() {
                (_, Message::FlowMod(fm)) => priorities.push(fm.priority),
                (xid, Message::BarrierRequest) => return (priorities, xid),
                (_, other) => panic!("unexpected {:?} during install", other),
            }
        }
    }
}

/// Ethernet/IPv4/TCP frame without checksums.
fn tcp_frame(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 1];
    frame.extend(ETH_TYP_IP.to_be_bytes());
    frame.extend([0x45, 0, 0, 40, 0, 1, 0x40, 0, 64, IP_PROTO_TCP, 0, 0]);
    frame.extend(src.0.octets());
    frame.extend(dst.0.octets());
    frame.extend(src.1.to_be_bytes());
    frame.extend(dst.1.to_be_bytes());
    frame.extend([0, 0, 0, 1, 0, 0, 0, 0, 0x50, 0x02, 0xff, 0xff, 0, 0, 0, 0]);
    frame
}

fn nat_controller(rig: &Rig, events: Receiver<Event>) -> (Sender<()>, JoinHandle<()>) {
    let nat = NatConfig {
        public_ip: PUBLIC_IP,
        min_port: 10000,
        max_port: 10999,
        inside: Location {
            switch: 1,
            port: 1,
            uplink: None,
        },
        outside: Location {
            switch: 1,
            port: 2,
            uplink: None,
        },
    };
    let policy = NatPolicy::new(&nat, StaticPolicy::new()).unwrap();
    let settings = ControllerSettings {
        barrier_mode: BarrierMode::Sync,
        tick: Duration::from_millis(10),
    };
    let (shutdown_tx, shutdown) = bounded(1);
    let registry = rig.registry.clone();
    let handle = thread::spawn(move || Controller::new(policy, registry, settings, events, shutdown).run());
    (shutdown_tx, handle)
}

#[test]
fn nat_switch_end_to_end() {
    let (events_tx, events) = unbounded();
    let rig = Rig::start(events_tx, Duration::from_secs(2));
    let (shutdown, controller) = nat_controller(&rig, events);

    let mut switch = FakeSwitch::connect(rig.addr);
    switch.handshake(1);
    wait_until("registration", || rig.registry.get(1).is_some());

    let (priorities, barrier) = switch.read_install();
    assert_eq!(priorities, vec![100, 90, 0]);

    // Echo is answered in place even while the barrier is outstanding.
    switch.send(77, &Message::EchoRequest(b"ping".to_vec()));
    assert_eq!(switch.recv().unwrap(), (77, Message::EchoReply(b"ping".to_vec())));
    switch.send(barrier, &Message::BarrierReply);

    let private = Ipv4Addr::new(10, 0, 0, 5);
    let data = tcp_frame((private, 5000), (Ipv4Addr::new(8, 8, 8, 8), 80));
    switch.send(
        5,
        &Message::PacketIn(PacketIn {
            total_len: data.len() as u16,
            input_payload: Payload::NotBuffered(data),
            port: 1,
            reason: PacketInReason::NoMatch,
        }),
    );

    let (priorities, barrier) = switch.read_install();
    assert_eq!(priorities, vec![1000, 1000, 100, 90, 0]);
    switch.send(barrier, &Message::BarrierReply);

    let po = match switch.recv().unwrap() {
        (_, Message::PacketOut(po)) => po,
        (_, other) => panic!("expected packet out, got {:?}", other),
    };
    assert_eq!(po.port_id, Some(1));
    let rewritten = Packet::parse(po.output_payload.bytes()).unwrap();
    let ip = rewritten.ip().unwrap();
    assert_eq!(Ipv4Addr::from(ip.src), PUBLIC_IP);
    assert_eq!(ip.ports(), Some((10000, 80)));

    shutdown.send(()).unwrap();
    controller.join().unwrap();
}

#[test]
fn features_before_hello_fails_handshake() {
    let (events_tx, events) = unbounded();
    let rig = Rig::start(events_tx, Duration::from_secs(2));
    let mut switch = FakeSwitch::connect(rig.addr);
    assert_eq!(switch.recv().unwrap(), (0, Message::Hello));
    switch.send(0, &Message::FeaturesReply(features(9)));
    assert!(switch.recv().is_err());
    assert!(rig.registry.is_empty());
    assert_eq!(events.recv_timeout(Duration::from_millis(200)), Err(RecvTimeoutError::Timeout));
}

#[test]
fn silent_peer_times_out() {
    let (events_tx, _events) = unbounded();
    let rig = Rig::start(events_tx, Duration::from_millis(100));
    let mut switch = FakeSwitch::connect(rig.addr);
    assert_eq!(switch.recv().unwrap(), (0, Message::Hello));
    // Never answer; the controller gives up and closes.
    assert!(switch.recv().is_err());
    assert!(rig.registry.is_empty());
}

#[test]
fn disconnect_is_reported_once() {
    let (events_tx, events) = unbounded();
    let rig = Rig::start(events_tx, Duration::from_secs(2));
    let mut switch = FakeSwitch::connect(rig.addr);
    switch.handshake(3);
    let conn_id = match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        Event::SwitchConnected { switch_id: 3, conn_id, .. } => conn_id,
        other => panic!("unexpected {:?}", other),
    };
    assert!(rig.registry.get(3).is_some());

    drop(switch);
    assert_eq!(
        events.recv_timeout(Duration::from_secs(5)),
        Ok(Event::SwitchDisconnected { switch_id: 3, conn_id })
    );
    wait_until("registry cleanup", || rig.registry.is_empty());
    assert!(!rig.registry.disconnect(3));
    assert_eq!(events.recv_timeout(Duration::from_millis(200)), Err(RecvTimeoutError::Timeout));
}

#[test]
fn reconnect_with_same_id_replaces_connection() {
    let (events_tx, events) = unbounded();
    let rig = Rig::start(events_tx, Duration::from_secs(2));

    let mut first = FakeSwitch::connect(rig.addr);
    first.handshake(4);
    let first_conn = match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        Event::SwitchConnected { conn_id, .. } => conn_id,
        other => panic!("unexpected {:?}", other),
    };

    let mut second = FakeSwitch::connect(rig.addr);
    second.handshake(4);
    assert_eq!(
        events.recv_timeout(Duration::from_secs(5)),
        Ok(Event::SwitchDisconnected {
            switch_id: 4,
            conn_id: first_conn
        })
    );
    let second_conn = match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        Event::SwitchConnected { conn_id, .. } => conn_id,
        other => panic!("unexpected {:?}", other),
    };
    assert_ne!(first_conn, second_conn);

    // The replaced connection is shut down; the new one stays registered.
    assert!(first.recv().is_err());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.registry.get(4).map(|h| h.conn_id()), Some(second_conn));
    assert_eq!(events.recv_timeout(Duration::from_millis(200)), Err(RecvTimeoutError::Timeout));
}
