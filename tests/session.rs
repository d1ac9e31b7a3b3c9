//! End-to-end session tests: a fake switch dials the controller over TCP,
//! speaks the OpenFlow 1.3 handshake, and observes the messages the
//! controller emits.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rust_of13::learning_switch::LearningSwitch;
use rust_of13::ofp_controller::openflow0x04::DeviceManager;
use rust_of13::ofp_controller::OfpController;
use rust_of13::ofp_header::OfpHeader;
use rust_of13::ofp_message::OfpMessage;
use rust_of13::openflow0x04::message::Message;
use rust_of13::openflow0x04::{
    Action, Capabilities, MsgCode, PacketIn, PacketInReason, Payload, PseudoPort, SwitchFeatures,
    OFPCML_NO_BUFFER,
};
use rust_of13::packet::MacAddr;

const HOST_A: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xaa]);
const HOST_B: MacAddr = MacAddr([0, 0, 0, 0, 0, 0xbb]);
const DPID: u64 = 0x2a;

fn start_controller() -> (SocketAddr, Arc<DeviceManager<LearningSwitch>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let manager = Arc::new(DeviceManager::new(LearningSwitch::new()));
    let accept_manager = Arc::clone(&manager);
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let manager = Arc::clone(&accept_manager);
                    thread::spawn(move || manager.handle_client_connected(stream));
                }
                Err(_) => break,
            }
        }
    });
    (addr, manager)
}

struct FakeSwitch {
    stream: TcpStream,
}

impl FakeSwitch {
    fn connect(addr: SocketAddr) -> FakeSwitch {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        FakeSwitch { stream }
    }

    fn send(&mut self, xid: u32, msg: Message) {
        let bytes = Message::marshal(xid, msg).unwrap();
        self.stream.write_all(&bytes).unwrap();
    }

    fn send_raw_header(&mut self, version: u8, typ: u8, xid: u32) {
        let mut bytes = vec![];
        OfpHeader::marshal(&mut bytes, OfpHeader::new(version, typ, 8, xid));
        self.stream.write_all(&bytes).unwrap();
    }

    fn recv(&mut self) -> (OfpHeader, Message) {
        let mut hbuf = [0u8; 8];
        self.stream.read_exact(&mut hbuf).unwrap();
        let header = OfpHeader::parse(hbuf);
        let mut body = vec![0; header.length() - OfpHeader::size()];
        self.stream.read_exact(&mut body).unwrap();
        let (_, msg) = Message::parse(&header, &body).unwrap();
        (header, msg)
    }

    fn features_reply(&mut self, xid: u32) {
        self.send(
            xid,
            Message::FeaturesReply(SwitchFeatures {
                datapath_id: DPID,
                num_buffers: 256,
                num_tables: 254,
                auxiliary_id: 0,
                supported_capabilities: Capabilities {
                    flow_stats: true,
                    table_stats: true,
                    port_stats: true,
                    group_stats: false,
                    ip_reasm: false,
                    queue_stats: false,
                    port_blocked: false,
                },
            }),
        );
    }

    fn packet_in(&mut self, src: MacAddr, dst: MacAddr, in_port: u32, buffer: Option<u32>) {
        let data = frame(dst, src);
        let total_len = data.len() as u16;
        self.send(
            9,
            Message::PacketIn(PacketIn {
                input_payload: match buffer {
                    Some(id) => Payload::Buffered(id, data),
                    None => Payload::NotBuffered(data),
                },
                total_len,
                port: in_port,
                reason: PacketInReason::NoMatch,
                table_id: 0,
                cookie: 0,
            }),
        );
    }
}

fn frame(dst: MacAddr, src: MacAddr) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&dst.octets());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&0x0800u16.to_be_bytes());
    buf.extend_from_slice(&[0u8; 46]);
    buf
}

/// Hello and features-request from the controller, then the features-reply
/// and the table-miss install.
fn handshake(switch: &mut FakeSwitch) {
    let (header, msg) = switch.recv();
    assert_eq!(msg, Message::Hello);
    assert_eq!(header.version(), 0x04);
    switch.send(0, Message::Hello);

    let (_, msg) = switch.recv();
    assert_eq!(msg, Message::FeaturesReq);
    switch.features_reply(1);

    let (_, msg) = switch.recv();
    let Message::FlowMod(fm) = msg else {
        panic!("expected the table-miss flow-mod, got {:?}", msg);
    };
    assert_eq!(fm.priority, 0);
    assert_eq!(fm.pattern.in_port, None);
    assert_eq!(fm.pattern.dl_dst, None);
    assert_eq!(fm.pattern.dl_src, None);
    assert_eq!(
        fm.actions,
        vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))]
    );
}

fn wait_for<F: FnMut() -> bool>(what: &str, mut cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn learning_scenario_over_tcp() {
    let (addr, manager) = start_controller();
    let mut switch = FakeSwitch::connect(addr);
    handshake(&mut switch);
    wait_for("session registration", || manager.device_count() == 1);

    // A -> B: destination unknown, expect a flood and no flow-mod
    switch.packet_in(HOST_A, HOST_B, 1, None);
    let (_, msg) = switch.recv();
    let Message::PacketOut(po) = msg else {
        panic!("expected packet-out, got {:?}", msg);
    };
    assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::Flood)]);
    assert_eq!(po.port_id, Some(1));
    assert_eq!(po.output_payload.bytes(), frame(HOST_B, HOST_A));
    assert_eq!(
        manager.controller().known_hosts().lookup(DPID, HOST_A),
        Some(1)
    );

    // B -> A: now directed; the flow-mod must arrive before the packet-out
    switch.packet_in(HOST_B, HOST_A, 2, None);
    let (_, msg) = switch.recv();
    let Message::FlowMod(fm) = msg else {
        panic!("expected flow-mod before packet-out, got {:?}", msg);
    };
    assert_eq!(fm.priority, 1);
    assert_eq!(fm.pattern.in_port, Some(2));
    assert_eq!(fm.pattern.dl_dst, Some(HOST_A));
    assert_eq!(fm.pattern.dl_src, Some(HOST_B));
    assert_eq!(fm.actions, vec![Action::Output(PseudoPort::PhysicalPort(1))]);
    assert_eq!(fm.apply_to_packet, None);

    let (_, msg) = switch.recv();
    let Message::PacketOut(po) = msg else {
        panic!("expected packet-out, got {:?}", msg);
    };
    assert_eq!(
        po.apply_actions,
        vec![Action::Output(PseudoPort::PhysicalPort(1))]
    );

    // closing the transport releases everything learned for the device
    drop(switch);
    wait_for("session teardown", || manager.device_count() == 0);
    wait_for("learning state release", || {
        manager.controller().known_hosts().lookup(DPID, HOST_A).is_none()
    });
}

#[test]
fn buffered_packet_in_suppresses_packet_out() {
    let (addr, _manager) = start_controller();
    let mut switch = FakeSwitch::connect(addr);
    handshake(&mut switch);

    // teach the controller where B lives
    switch.packet_in(HOST_B, HOST_A, 2, None);
    let (_, msg) = switch.recv();
    assert!(matches!(msg, Message::PacketOut(_)));

    // A -> B with a device-side buffer: the flow-mod carries the buffer id
    // and resolves the packet, so nothing else may follow it
    switch.packet_in(HOST_A, HOST_B, 1, Some(0x99));
    let (_, msg) = switch.recv();
    let Message::FlowMod(fm) = msg else {
        panic!("expected flow-mod, got {:?}", msg);
    };
    assert_eq!(fm.apply_to_packet, Some(0x99));

    // an echo round-trip proves no packet-out was queued in between
    switch.send(0x1234, Message::EchoRequest(vec![7]));
    let (header, msg) = switch.recv();
    assert_eq!(msg, Message::EchoReply(vec![7]));
    assert_eq!(header.xid(), 0x1234);
}

#[test]
fn early_packet_in_is_dropped() {
    let (addr, manager) = start_controller();
    let mut switch = FakeSwitch::connect(addr);

    let (_, msg) = switch.recv();
    assert_eq!(msg, Message::Hello);
    switch.send(0, Message::Hello);
    let (_, msg) = switch.recv();
    assert_eq!(msg, Message::FeaturesReq);

    // a packet-in before the features-reply must be discarded, not answered
    switch.packet_in(HOST_A, HOST_B, 1, None);
    switch.features_reply(1);

    // the next message is the table-miss install, not a packet-out
    let (_, msg) = switch.recv();
    let Message::FlowMod(fm) = msg else {
        panic!("expected the table-miss flow-mod, got {:?}", msg);
    };
    assert_eq!(fm.priority, 0);
    wait_for("session registration", || manager.device_count() == 1);
    assert_eq!(
        manager.controller().known_hosts().lookup(DPID, HOST_A),
        None
    );
}

#[test]
fn incompatible_version_is_refused() {
    let (addr, manager) = start_controller();
    let mut switch = FakeSwitch::connect(addr);

    let (_, msg) = switch.recv();
    assert_eq!(msg, Message::Hello);
    // an OpenFlow 1.0 hello
    switch.send_raw_header(0x01, MsgCode::Hello as u8, 3);

    let (_, msg) = switch.recv();
    let Message::Error(err) = msg else {
        panic!("expected hello-failed error, got {:?}", msg);
    };
    assert_eq!(err.typ, 0);
    assert_eq!(err.code, 0);

    // the controller hangs up after refusing the session
    let mut rest = vec![];
    wait_for("connection close", || {
        matches!(switch.stream.read_to_end(&mut rest), Ok(_))
    });
    assert_eq!(manager.device_count(), 0);
}
