use std::net::TcpStream;

use crate::ofp_message::OfpMessage;

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller.
pub trait OfpController {
    /// OpenFlow message type supporting the same protocol version as the
    /// controller.
    type Message: OfpMessage;

    /// Accept a device connection and service its session until it closes.
    fn handle_client_connected(&self, stream: TcpStream);
}

pub mod openflow0x04 {
    use std::io::{self, Read, Write};
    use std::net::TcpStream;

    use dashmap::DashMap;
    use tracing::{debug, info, warn};

    use super::OfpController;
    use crate::error::{MalformedMessage, SessionError};
    use crate::mac_table::DatapathId;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use crate::openflow0x04::message::Message;
    use crate::openflow0x04::{ErrorMsg, PacketIn, PacketOut, SwitchFeatures, OFP_VERSION};

    /// Lifecycle of one device session.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum SessionState {
        /// Transport is up; waiting for the peer's hello.
        Connecting,
        /// Hello exchanged; waiting for the features-reply.
        FeaturesPending,
        /// Handshake complete; packet-in events are dispatched.
        Active,
        /// Torn down; all per-device state has been released.
        Closed,
    }

    impl SessionState {
        pub fn name(&self) -> &'static str {
            match self {
                SessionState::Connecting => "connecting",
                SessionState::FeaturesPending => "features-pending",
                SessionState::Active => "active",
                SessionState::Closed => "closed",
            }
        }
    }

    /// Sole write path to a device's socket.
    ///
    /// Only the session's own thread holds one of these, so writes to a
    /// device are serialized: each send completes before the next message is
    /// dispatched.
    pub struct OfpMessageWriter<'a, S: Write> {
        sink: &'a mut S,
        next_xid: &'a mut u32,
    }

    impl<'a, S: Write> OfpMessageWriter<'a, S> {
        pub fn new(sink: &'a mut S, next_xid: &'a mut u32) -> OfpMessageWriter<'a, S> {
            OfpMessageWriter { sink, next_xid }
        }

        /// Send `msg` under a fresh transaction id.
        pub fn send(&mut self, msg: Message) -> Result<(), SessionError> {
            let xid = *self.next_xid;
            *self.next_xid = self.next_xid.wrapping_add(1);
            self.send_with_xid(xid, msg)
        }

        /// Send `msg` reusing `xid`, pairing a reply with its request.
        pub fn send_with_xid(&mut self, xid: u32, msg: Message) -> Result<(), SessionError> {
            let bytes = Message::marshal(xid, msg)?;
            self.sink
                .write_all(&bytes)
                .map_err(SessionError::TransportError)
        }
    }

    /// OpenFlow0x04 Controller API
    ///
    /// OpenFlow 1.3-specific callbacks for communicating between a controller
    /// and the dataplane. Handlers may be invoked concurrently for different
    /// devices; per-device invocations are serialized by the session thread.
    pub trait OF0x04Controller {
        /// Callback invoked when a switch with datapath id `sw` completes its
        /// handshake.
        fn switch_connected<S: Write>(
            &self,
            sw: DatapathId,
            feats: SwitchFeatures,
            writer: &mut OfpMessageWriter<S>,
        ) -> Result<(), SessionError>;

        /// Callback invoked when the session for switch `sw` closes. All
        /// state keyed by `sw` must be released here.
        fn switch_disconnected(&self, sw: DatapathId);

        /// Callback invoked when a packet `pkt` with transaction id `xid`
        /// from switch `sw` arrives at the controller.
        fn packet_in<S: Write>(
            &self,
            sw: DatapathId,
            xid: u32,
            pkt: PacketIn,
            writer: &mut OfpMessageWriter<S>,
        ) -> Result<(), SessionError>;

        /// Send packet `pkt` to the device behind `writer`.
        fn send_packet_out<S: Write>(
            writer: &mut OfpMessageWriter<S>,
            pkt: PacketOut,
        ) -> Result<(), SessionError> {
            writer.send(Message::PacketOut(pkt))
        }
    }

    /// One row of the session table: a device whose handshake completed.
    #[derive(Debug)]
    struct SessionEntry {
        version: u8,
        peer: String,
    }

    /// Per-connection handshake and dispatch state.
    struct Session {
        state: SessionState,
        switch_id: Option<DatapathId>,
        next_xid: u32,
    }

    impl Session {
        fn new() -> Session {
            Session {
                state: SessionState::Connecting,
                switch_id: None,
                next_xid: 0,
            }
        }
    }

    /// Owns the session table and runs one session per connected device:
    /// performs the handshake, dispatches decoded messages to the
    /// controller's handlers, and releases the device's state when the
    /// transport goes away.
    pub struct DeviceManager<Cntl> {
        cntl: Cntl,
        sessions: DashMap<DatapathId, SessionEntry>,
    }

    impl<Cntl: OF0x04Controller> DeviceManager<Cntl> {
        pub fn new(cntl: Cntl) -> DeviceManager<Cntl> {
            DeviceManager {
                cntl,
                sessions: DashMap::new(),
            }
        }

        /// The controller the manager dispatches to.
        pub fn controller(&self) -> &Cntl {
            &self.cntl
        }

        /// Number of devices with a completed handshake.
        pub fn device_count(&self) -> usize {
            self.sessions.len()
        }

        /// Run a device session over `stream` to completion. Per-device
        /// state is released before this returns, whatever the outcome.
        pub fn run<S: Read + Write>(&self, mut stream: S, peer: &str) -> Result<(), SessionError> {
            let mut session = Session::new();
            let result = self.session_loop(&mut stream, &mut session, peer);
            self.close_session(&mut session);
            result
        }

        fn session_loop<S: Read + Write>(
            &self,
            stream: &mut S,
            session: &mut Session,
            peer: &str,
        ) -> Result<(), SessionError> {
            OfpMessageWriter::new(&mut *stream, &mut session.next_xid).send(Message::Hello)?;

            loop {
                let mut hbuf = [0u8; 8];
                if let Err(e) = stream.read_exact(&mut hbuf) {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        debug!(peer, "connection closed by device");
                        return Ok(());
                    }
                    return Err(SessionError::TransportError(e));
                }
                let header = OfpHeader::parse(hbuf);
                if header.length() < OfpHeader::size() {
                    // an impossible length field loses the framing; the
                    // session cannot resynchronize
                    return Err(MalformedMessage::new(
                        "header",
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("length field {} below header size", header.length()),
                        ),
                    )
                    .into());
                }
                let mut body = vec![0; header.length() - OfpHeader::size()];
                stream
                    .read_exact(&mut body)
                    .map_err(SessionError::TransportError)?;

                let (xid, msg) = match Message::parse(&header, &body) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(peer, error = %e, "dropping undecodable message");
                        continue;
                    }
                };
                match self.process_message(session, &header, xid, msg, stream, peer) {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(peer, error = %e, "message dropped"),
                }
                if session.state == SessionState::Closed {
                    return Ok(());
                }
            }
        }

        fn process_message<S: Read + Write>(
            &self,
            session: &mut Session,
            header: &OfpHeader,
            xid: u32,
            msg: Message,
            stream: &mut S,
            peer: &str,
        ) -> Result<(), SessionError> {
            let state = session.state;
            let mut writer = OfpMessageWriter::new(&mut *stream, &mut session.next_xid);
            match (state, msg) {
                (SessionState::Connecting, Message::Hello) => {
                    if header.version() < OFP_VERSION {
                        warn!(
                            peer,
                            version = header.version(),
                            "device speaks an incompatible protocol version"
                        );
                        writer.send_with_xid(
                            xid,
                            Message::Error(ErrorMsg::hello_failed("OpenFlow 1.3 required")),
                        )?;
                        session.state = SessionState::Closed;
                        return Ok(());
                    }
                    debug!(peer, "hello received; requesting features");
                    writer.send(Message::FeaturesReq)?;
                    session.state = SessionState::FeaturesPending;
                    Ok(())
                }
                (SessionState::FeaturesPending, Message::FeaturesReply(feats)) => {
                    let dpid = feats.datapath_id;
                    session.switch_id = Some(dpid);
                    session.state = SessionState::Active;
                    let entry = SessionEntry {
                        version: OFP_VERSION,
                        peer: peer.to_string(),
                    };
                    info!(
                        dpid,
                        peer,
                        version = entry.version,
                        num_buffers = feats.num_buffers,
                        num_tables = feats.num_tables,
                        "handshake complete"
                    );
                    if let Some(stale) = self.sessions.insert(dpid, entry) {
                        warn!(
                            dpid,
                            old_peer = %stale.peer,
                            "device reconnected; replacing stale session"
                        );
                    }
                    self.cntl.switch_connected(dpid, feats, &mut writer)
                }
                (SessionState::Active, Message::PacketIn(pkt)) => match session.switch_id {
                    Some(sw) => self.cntl.packet_in(sw, xid, pkt, &mut writer),
                    None => Err(SessionError::UnexpectedStateMessage {
                        message: "packet-in",
                        state: state.name(),
                    }),
                },
                (SessionState::Active, Message::EchoRequest(bytes)) => {
                    writer.send_with_xid(xid, Message::EchoReply(bytes))
                }
                (_, Message::Error(err)) => {
                    warn!(
                        peer,
                        typ = err.typ,
                        code = err.code,
                        data_len = err.data.len(),
                        "device reported an error"
                    );
                    Ok(())
                }
                (_, Message::Unsupported(typ)) => {
                    debug!(peer, typ, "ignoring unsupported message type");
                    Ok(())
                }
                (state, msg) => Err(SessionError::UnexpectedStateMessage {
                    message: msg.type_name(),
                    state: state.name(),
                }),
            }
        }

        /// Idempotent teardown: releases the session-table entry and the
        /// controller's per-device state exactly once.
        fn close_session(&self, session: &mut Session) {
            session.state = SessionState::Closed;
            if let Some(sw) = session.switch_id.take() {
                self.sessions.remove(&sw);
                self.cntl.switch_disconnected(sw);
                info!(dpid = sw, "session closed");
            }
        }
    }

    impl<Cntl: OF0x04Controller> OfpController for DeviceManager<Cntl> {
        type Message = Message;

        fn handle_client_connected(&self, stream: TcpStream) {
            let peer = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            info!(peer, "device connected");
            match self.run(stream, &peer) {
                Ok(()) => {}
                Err(e) => warn!(peer, error = %e, "session ended with error"),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::openflow0x04::{
            Action, Capabilities, FlowMod, MsgCode, PacketInReason, Payload, PseudoPort,
        };
        use std::io::Cursor;
        use std::sync::Mutex;

        /// In-memory stand-in for a device socket: reads a scripted byte
        /// stream, captures everything the controller writes.
        struct Pipe {
            input: Cursor<Vec<u8>>,
            output: Vec<u8>,
        }

        impl Pipe {
            fn new(input: Vec<u8>) -> Pipe {
                Pipe {
                    input: Cursor::new(input),
                    output: Vec::new(),
                }
            }
        }

        impl Read for Pipe {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.input.read(buf)
            }
        }

        impl Write for Pipe {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.output.write(buf)
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        #[derive(Default)]
        struct Recorder {
            events: Mutex<Vec<String>>,
        }

        impl Recorder {
            fn events(&self) -> Vec<String> {
                self.events.lock().unwrap().clone()
            }
        }

        impl OF0x04Controller for Recorder {
            fn switch_connected<S: Write>(
                &self,
                sw: DatapathId,
                _feats: SwitchFeatures,
                _writer: &mut OfpMessageWriter<S>,
            ) -> Result<(), SessionError> {
                self.events.lock().unwrap().push(format!("connected:{}", sw));
                Ok(())
            }

            fn switch_disconnected(&self, sw: DatapathId) {
                self.events
                    .lock()
                    .unwrap()
                    .push(format!("disconnected:{}", sw));
            }

            fn packet_in<S: Write>(
                &self,
                sw: DatapathId,
                _xid: u32,
                pkt: PacketIn,
                _writer: &mut OfpMessageWriter<S>,
            ) -> Result<(), SessionError> {
                self.events
                    .lock()
                    .unwrap()
                    .push(format!("packet-in:{}:{}", sw, pkt.port));
                Ok(())
            }
        }

        fn features_reply(dpid: DatapathId) -> Message {
            Message::FeaturesReply(SwitchFeatures {
                datapath_id: dpid,
                num_buffers: 256,
                num_tables: 254,
                auxiliary_id: 0,
                supported_capabilities: Capabilities {
                    flow_stats: true,
                    table_stats: false,
                    port_stats: false,
                    group_stats: false,
                    ip_reasm: false,
                    queue_stats: false,
                    port_blocked: false,
                },
            })
        }

        fn packet_in(port: u32) -> Message {
            Message::PacketIn(PacketIn {
                input_payload: Payload::NotBuffered(vec![0xab; 20]),
                total_len: 20,
                port,
                reason: PacketInReason::NoMatch,
                table_id: 0,
                cookie: 0,
            })
        }

        fn script(messages: Vec<Message>) -> Vec<u8> {
            let mut bytes = vec![];
            for (i, msg) in messages.into_iter().enumerate() {
                bytes.extend(Message::marshal(100 + i as u32, msg).unwrap());
            }
            bytes
        }

        fn sent_messages(buf: &[u8]) -> Vec<Message> {
            let mut out = vec![];
            let mut pos = 0;
            while pos < buf.len() {
                let mut hbuf = [0; 8];
                hbuf.copy_from_slice(&buf[pos..pos + 8]);
                let header = OfpHeader::parse(hbuf);
                let body = &buf[pos + 8..pos + header.length()];
                let (_, msg) = Message::parse(&header, body).unwrap();
                out.push(msg);
                pos += header.length();
            }
            out
        }

        #[test]
        fn handshake_then_dispatch_then_teardown() {
            let manager = DeviceManager::new(Recorder::default());
            let mut pipe = Pipe::new(script(vec![
                Message::Hello,
                features_reply(42),
                packet_in(3),
            ]));
            manager.run(&mut pipe, "test").unwrap();

            let sent = sent_messages(&pipe.output);
            assert_eq!(sent[0], Message::Hello);
            assert_eq!(sent[1], Message::FeaturesReq);
            assert_eq!(
                manager.controller().events(),
                vec!["connected:42", "packet-in:42:3", "disconnected:42"]
            );
            assert_eq!(manager.device_count(), 0);
        }

        #[test]
        fn echo_is_answered_with_request_xid() {
            let manager = DeviceManager::new(Recorder::default());
            let mut script_bytes = script(vec![Message::Hello, features_reply(1)]);
            script_bytes.extend(Message::marshal(0x55, Message::EchoRequest(vec![9, 9])).unwrap());
            let mut pipe = Pipe::new(script_bytes);
            manager.run(&mut pipe, "test").unwrap();

            let mut pos = 0;
            let mut replies = vec![];
            let buf = &pipe.output;
            while pos < buf.len() {
                let mut hbuf = [0; 8];
                hbuf.copy_from_slice(&buf[pos..pos + 8]);
                let header = OfpHeader::parse(hbuf);
                let body = &buf[pos + 8..pos + header.length()];
                let (xid, msg) = Message::parse(&header, body).unwrap();
                if let Message::EchoReply(bytes) = msg {
                    replies.push((xid, bytes));
                }
                pos += header.length();
            }
            assert_eq!(replies, vec![(0x55, vec![9, 9])]);
        }

        #[test]
        fn messages_outside_active_are_dropped() {
            let manager = DeviceManager::new(Recorder::default());
            // packet-in and echo arrive before the features-reply; both must
            // be discarded without killing the session
            let mut pipe = Pipe::new(script(vec![
                Message::Hello,
                packet_in(1),
                Message::EchoRequest(vec![1]),
                features_reply(7),
                packet_in(2),
            ]));
            manager.run(&mut pipe, "test").unwrap();
            assert_eq!(
                manager.controller().events(),
                vec!["connected:7", "packet-in:7:2", "disconnected:7"]
            );
        }

        #[test]
        fn incompatible_hello_is_refused() {
            let manager = DeviceManager::new(Recorder::default());
            // an OpenFlow 1.0 hello
            let mut bytes = vec![];
            OfpHeader::marshal(&mut bytes, OfpHeader::new(0x01, 0, 8, 77));
            let mut pipe = Pipe::new(bytes);
            manager.run(&mut pipe, "test").unwrap();

            let sent = sent_messages(&pipe.output);
            assert_eq!(sent[0], Message::Hello);
            assert!(matches!(sent[1], Message::Error(ref err) if err.typ == 0 && err.code == 0));
            assert_eq!(sent.len(), 2);
            assert!(manager.controller().events().is_empty());
        }

        #[test]
        fn malformed_body_does_not_kill_session() {
            let manager = DeviceManager::new(Recorder::default());
            let mut bytes = script(vec![Message::Hello]);
            // a features-reply whose body is too short to decode
            OfpHeader::marshal(
                &mut bytes,
                OfpHeader::new(OFP_VERSION, MsgCode::FeaturesResp as u8, 8 + 4, 5),
            );
            bytes.extend_from_slice(&[0; 4]);
            bytes.extend(script(vec![features_reply(9)]));
            let mut pipe = Pipe::new(bytes);
            manager.run(&mut pipe, "test").unwrap();
            assert_eq!(
                manager.controller().events(),
                vec!["connected:9", "disconnected:9"]
            );
        }

        #[test]
        fn flow_mod_passthrough_keeps_buffer_reference() {
            // regression-style check that the writer emits what it was given
            let mut sink = Vec::new();
            let mut xid = 0;
            let mut writer = OfpMessageWriter::new(&mut sink, &mut xid);
            writer
                .send(Message::FlowMod(FlowMod {
                    command: crate::openflow0x04::FlowModCmd::AddFlow,
                    table_id: 0,
                    pattern: Default::default(),
                    priority: 1,
                    actions: vec![Action::Output(PseudoPort::PhysicalPort(2))],
                    cookie: 0,
                    idle_timeout: crate::openflow0x04::Timeout::Permanent,
                    hard_timeout: crate::openflow0x04::Timeout::Permanent,
                    notify_when_removed: false,
                    apply_to_packet: Some(11),
                    out_port: None,
                    check_overlap: false,
                }))
                .unwrap();
            let sent = sent_messages(&sink);
            assert!(
                matches!(&sent[0], Message::FlowMod(fm) if fm.apply_to_packet == Some(11))
            );
        }
    }
}
