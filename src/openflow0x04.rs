use std::io::{self, BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::test_bit;
use crate::error::{EncodeFailure, MalformedMessage};
use crate::packet::MacAddr;

/// Wire version implemented by this module.
pub const OFP_VERSION: u8 = 0x04;

/// Sentinel buffer id meaning "the device did not buffer this packet".
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// `max_len` value requesting the whole packet with no device-side
/// buffering.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// OpenFlow 1.3 message type codes, used by headers to identify meaning of
/// the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Experimenter,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartReq,
    MultipartResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
    RoleReq,
    RoleResp,
    GetAsyncReq,
    GetAsyncResp,
    SetAsync,
    MeterMod,
}

impl MsgCode {
    /// Map a raw type octet back to a `MsgCode`.
    pub fn of_u8(typ: u8) -> Option<MsgCode> {
        match typ {
            0 => Some(MsgCode::Hello),
            1 => Some(MsgCode::Error),
            2 => Some(MsgCode::EchoReq),
            3 => Some(MsgCode::EchoResp),
            4 => Some(MsgCode::Experimenter),
            5 => Some(MsgCode::FeaturesReq),
            6 => Some(MsgCode::FeaturesResp),
            7 => Some(MsgCode::GetConfigReq),
            8 => Some(MsgCode::GetConfigResp),
            9 => Some(MsgCode::SetConfig),
            10 => Some(MsgCode::PacketIn),
            11 => Some(MsgCode::FlowRemoved),
            12 => Some(MsgCode::PortStatus),
            13 => Some(MsgCode::PacketOut),
            14 => Some(MsgCode::FlowMod),
            15 => Some(MsgCode::GroupMod),
            16 => Some(MsgCode::PortMod),
            17 => Some(MsgCode::TableMod),
            18 => Some(MsgCode::MultipartReq),
            19 => Some(MsgCode::MultipartResp),
            20 => Some(MsgCode::BarrierReq),
            21 => Some(MsgCode::BarrierResp),
            22 => Some(MsgCode::QueueGetConfigReq),
            23 => Some(MsgCode::QueueGetConfigResp),
            24 => Some(MsgCode::RoleReq),
            25 => Some(MsgCode::RoleResp),
            26 => Some(MsgCode::GetAsyncReq),
            27 => Some(MsgCode::GetAsyncResp),
            28 => Some(MsgCode::SetAsync),
            29 => Some(MsgCode::MeterMod),
            _ => None,
        }
    }
}

/// Common API for message types implementing OpenFlow message codes (see
/// `MsgCode` enum).
pub trait MessageType: Sized {
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, MalformedMessage>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure>;
}

fn bad_data(detail: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, detail)
}

fn bad_input(detail: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, detail)
}

fn at_end(bytes: &Cursor<&[u8]>) -> bool {
    bytes.position() as usize >= bytes.get_ref().len()
}

// OXM match encoding.
const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;
const OFPXMT_OFB_IN_PORT: u8 = 0;
const OFPXMT_OFB_ETH_DST: u8 = 3;
const OFPXMT_OFB_ETH_SRC: u8 = 4;
const OFPMT_OXM: u16 = 1;

/// Fields to match against flows.
///
/// Unset fields are wildcarded. Only the fields the learning switch installs
/// are modeled; unknown OXM entries in a received match are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u32>,
    pub dl_dst: Option<MacAddr>,
    pub dl_src: Option<MacAddr>,
}

impl Pattern {
    /// A pattern that matches every packet.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Length of the match structure on the wire, excluding the trailing pad
    /// to the 8-byte boundary.
    fn length(&self) -> usize {
        let mut length = 4;
        if self.in_port.is_some() {
            length += 4 + 4;
        }
        if self.dl_dst.is_some() {
            length += 4 + 6;
        }
        if self.dl_src.is_some() {
            length += 4 + 6;
        }
        length
    }

    fn pad_len(&self) -> usize {
        let len = self.length();
        (len + 7) / 8 * 8 - len
    }

    fn oxm_header(field: u8, len: u8) -> u32 {
        ((OFPXMC_OPENFLOW_BASIC as u32) << 16) | ((field as u32) << 9) | len as u32
    }

    fn marshal(pat: &Pattern, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(OFPMT_OXM)?;
        bytes.write_u16::<BigEndian>(pat.length() as u16)?;
        if let Some(port) = pat.in_port {
            bytes.write_u32::<BigEndian>(Self::oxm_header(OFPXMT_OFB_IN_PORT, 4))?;
            bytes.write_u32::<BigEndian>(port)?;
        }
        if let Some(mac) = pat.dl_dst {
            bytes.write_u32::<BigEndian>(Self::oxm_header(OFPXMT_OFB_ETH_DST, 6))?;
            bytes.extend_from_slice(&mac.octets());
        }
        if let Some(mac) = pat.dl_src {
            bytes.write_u32::<BigEndian>(Self::oxm_header(OFPXMT_OFB_ETH_SRC, 6))?;
            bytes.extend_from_slice(&mac.octets());
        }
        bytes.extend_from_slice(&vec![0; pat.pad_len()]);
        Ok(())
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> io::Result<Pattern> {
        let typ = bytes.read_u16::<BigEndian>()?;
        if typ != OFPMT_OXM {
            return Err(bad_data(format!("unsupported match type {}", typ)));
        }
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if length < 4 {
            return Err(bad_data(format!("match length {} below minimum", length)));
        }
        let mut oxm = vec![0; length - 4];
        bytes.read_exact(&mut oxm)?;

        let mut pat = Pattern::match_all();
        let mut fields = Cursor::new(oxm.as_slice());
        while !at_end(&fields) {
            let header = fields.read_u32::<BigEndian>()?;
            let class = (header >> 16) as u16;
            let field = ((header >> 9) & 0x7f) as u8;
            let hasmask = test_bit(8, header as u64);
            let len = (header & 0xff) as usize;
            let mut value = vec![0; len];
            fields.read_exact(&mut value)?;
            if class != OFPXMC_OPENFLOW_BASIC || hasmask {
                continue;
            }
            match field {
                OFPXMT_OFB_IN_PORT if len == 4 => {
                    pat.in_port = Some(u32::from_be_bytes([
                        value[0], value[1], value[2], value[3],
                    ]));
                }
                OFPXMT_OFB_ETH_DST if len == 6 => {
                    let mut mac = [0; 6];
                    mac.copy_from_slice(&value);
                    pat.dl_dst = Some(MacAddr(mac));
                }
                OFPXMT_OFB_ETH_SRC if len == 6 => {
                    let mut mac = [0; 6];
                    mac.copy_from_slice(&value);
                    pat.dl_src = Some(MacAddr(mac));
                }
                _ => {}
            }
        }
        // skip the pad up to the 8-byte boundary
        let padded = (length + 7) / 8 * 8;
        bytes.consume(padded - length);
        Ok(pat)
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u32),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u16),
    Local,
    Any,
}

#[repr(u32)]
enum OfpPort {
    OFPPMax = 0xffff_ff00,
    OFPPInPort = 0xffff_fff8,
    OFPPTable = 0xffff_fff9,
    OFPPNormal = 0xffff_fffa,
    OFPPFlood = 0xffff_fffb,
    OFPPAll = 0xffff_fffc,
    OFPPController = 0xffff_fffd,
    OFPPLocal = 0xffff_fffe,
    OFPPAny = 0xffff_ffff,
}

impl PseudoPort {
    fn of_int(p: u32) -> io::Result<Option<PseudoPort>> {
        if p == OfpPort::OFPPAny as u32 {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u32, max_len: u16) -> io::Result<PseudoPort> {
        match p {
            p if p == OfpPort::OFPPInPort as u32 => Ok(PseudoPort::InPort),
            p if p == OfpPort::OFPPTable as u32 => Ok(PseudoPort::Table),
            p if p == OfpPort::OFPPNormal as u32 => Ok(PseudoPort::Normal),
            p if p == OfpPort::OFPPFlood as u32 => Ok(PseudoPort::Flood),
            p if p == OfpPort::OFPPAll as u32 => Ok(PseudoPort::AllPorts),
            p if p == OfpPort::OFPPController as u32 => Ok(PseudoPort::Controller(max_len)),
            p if p == OfpPort::OFPPLocal as u32 => Ok(PseudoPort::Local),
            p if p <= OfpPort::OFPPMax as u32 => Ok(PseudoPort::PhysicalPort(p)),
            _ => Err(bad_data(format!("unsupported port number {:#x}", p))),
        }
    }

    fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) -> io::Result<()> {
        let p = match pp {
            PseudoPort::PhysicalPort(p) => {
                if p > OfpPort::OFPPMax as u32 {
                    return Err(bad_input(format!("physical port {:#x} above maximum", p)));
                }
                p
            }
            PseudoPort::InPort => OfpPort::OFPPInPort as u32,
            PseudoPort::Table => OfpPort::OFPPTable as u32,
            PseudoPort::Normal => OfpPort::OFPPNormal as u32,
            PseudoPort::Flood => OfpPort::OFPPFlood as u32,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u32,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u32,
            PseudoPort::Local => OfpPort::OFPPLocal as u32,
            PseudoPort::Any => OfpPort::OFPPAny as u32,
        };
        bytes.write_u32::<BigEndian>(p)
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
}

const ACTION_OUTPUT_LEN: usize = 16;

impl Action {
    fn marshal(act: Action, bytes: &mut Vec<u8>) -> io::Result<()> {
        match act {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(OfpActionType::OFPATOutput as u16)?;
                bytes.write_u16::<BigEndian>(ACTION_OUTPUT_LEN as u16)?;
                PseudoPort::marshal(pp, bytes)?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(max_len) => max_len,
                    _ => 0,
                })?;
                bytes.extend_from_slice(&[0; 6]);
            }
        }
        Ok(())
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions
            .iter()
            .map(|act| match act {
                Action::Output(_) => ACTION_OUTPUT_LEN,
            })
            .sum()
    }

    fn marshal_sequence(actions: &[Action], bytes: &mut Vec<u8>) -> io::Result<()> {
        for act in actions {
            Action::marshal(*act, bytes)?;
        }
        Ok(())
    }

    fn parse_sequence(buf: &[u8]) -> io::Result<Vec<Action>> {
        let mut bytes = Cursor::new(buf);
        let mut actions = vec![];
        while !at_end(&bytes) {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if typ != OfpActionType::OFPATOutput as u16 {
                return Err(bad_data(format!("unsupported action type {}", typ)));
            }
            if len != ACTION_OUTPUT_LEN {
                return Err(bad_data(format!("output action length {}", len)));
            }
            let port = bytes.read_u32::<BigEndian>()?;
            let max_len = bytes.read_u16::<BigEndian>()?;
            bytes.consume(6);
            actions.push(Action::Output(PseudoPort::make(port, max_len)?));
        }
        Ok(actions)
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub group_stats: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub port_blocked: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d as u64),
            table_stats: test_bit(1, d as u64),
            port_stats: test_bit(2, d as u64),
            group_stats: test_bit(3, d as u64),
            ip_reasm: test_bit(5, d as u64),
            queue_stats: test_bit(6, d as u64),
            port_blocked: test_bit(8, d as u64),
        }
    }

    fn to_int(caps: &Capabilities) -> u32 {
        (caps.flow_stats as u32)
            | (caps.table_stats as u32) << 1
            | (caps.port_stats as u32) << 2
            | (caps.group_stats as u32) << 3
            | (caps.ip_reasm as u32) << 5
            | (caps.queue_stats as u32) << 6
            | (caps.port_blocked as u32) << 8
    }
}

/// Switch features, as reported in the handshake's features-reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub auxiliary_id: u8,
    pub supported_capabilities: Capabilities,
}

impl SwitchFeatures {
    fn parse_inner(bytes: &mut Cursor<&[u8]>) -> io::Result<SwitchFeatures> {
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        let auxiliary_id = bytes.read_u8()?;
        bytes.consume(2);
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let _reserved = bytes.read_u32::<BigEndian>()?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id,
            supported_capabilities,
        })
    }

    fn marshal_inner(sf: &SwitchFeatures, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.write_u8(sf.auxiliary_id)?;
        bytes.extend_from_slice(&[0; 2]);
        bytes.write_u32::<BigEndian>(Capabilities::to_int(&sf.supported_capabilities))?;
        bytes.write_u32::<BigEndian>(0)
    }
}

impl MessageType for SwitchFeatures {
    fn parse(buf: &[u8]) -> Result<SwitchFeatures, MalformedMessage> {
        Self::parse_inner(&mut Cursor::new(buf))
            .map_err(|e| MalformedMessage::new("features-reply", e))
    }

    fn marshal(msg: SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure> {
        Self::marshal_inner(&msg, bytes).map_err(|e| EncodeFailure::new("features-reply", e))
    }
}

/// Type of modification to perform on a flow table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(cmd: u8) -> io::Result<FlowModCmd> {
        match cmd {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(bad_data(format!("unknown flow-mod command {}", c))),
        }
    }
}

const OFPIT_APPLY_ACTIONS: u16 = 4;
const OFPG_ANY: u32 = 0xffff_ffff;

/// Represents modifications to a flow table from the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub table_id: u8,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    /// Device-held buffer to run through the new flow, if any.
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }

    fn parse_inner(bytes: &mut Cursor<&[u8]>) -> io::Result<FlowMod> {
        let cookie = bytes.read_u64::<BigEndian>()?;
        let _cookie_mask = bytes.read_u64::<BigEndian>()?;
        let table_id = bytes.read_u8()?;
        let command = FlowModCmd::of_int(bytes.read_u8()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u32::<BigEndian>()?)?;
        let _out_group = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        bytes.consume(2);
        let pattern = Pattern::parse(bytes)?;
        let mut actions = vec![];
        while !at_end(bytes) {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 8 {
                return Err(bad_data(format!("instruction length {} below minimum", len)));
            }
            if typ == OFPIT_APPLY_ACTIONS {
                bytes.consume(4);
                let mut acts = vec![0; len - 8];
                bytes.read_exact(&mut acts)?;
                actions.append(&mut Action::parse_sequence(&acts)?);
            } else {
                bytes.consume(len - 4);
            }
        }
        Ok(FlowMod {
            command,
            table_id,
            pattern,
            priority: prio,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: match buffer_id {
                OFP_NO_BUFFER => None,
                n => Some(n),
            },
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal_inner(fm: &FlowMod, bytes: &mut Vec<u8>) -> io::Result<()> {
        for act in &fm.actions {
            if let Action::Output(PseudoPort::Table) = act {
                return Err(bad_input("OFPPTable not allowed in installed flow".to_string()));
            }
        }
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u64::<BigEndian>(0)?;
        bytes.write_u8(fm.table_id)?;
        bytes.write_u8(fm.command as u8)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        match fm.out_port {
            None => bytes.write_u32::<BigEndian>(OfpPort::OFPPAny as u32)?,
            Some(p) => PseudoPort::marshal(p, bytes)?,
        }
        bytes.write_u32::<BigEndian>(OFPG_ANY)?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(
            fm.check_overlap,
            fm.notify_when_removed,
        ))?;
        bytes.extend_from_slice(&[0; 2]);
        Pattern::marshal(&fm.pattern, bytes)?;
        bytes.write_u16::<BigEndian>(OFPIT_APPLY_ACTIONS)?;
        bytes.write_u16::<BigEndian>(8 + Action::size_of_sequence(&fm.actions) as u16)?;
        bytes.extend_from_slice(&[0; 4]);
        Action::marshal_sequence(&fm.actions, bytes)
    }
}

impl MessageType for FlowMod {
    fn parse(buf: &[u8]) -> Result<FlowMod, MalformedMessage> {
        Self::parse_inner(&mut Cursor::new(buf)).map_err(|e| MalformedMessage::new("flow-mod", e))
    }

    fn marshal(msg: FlowMod, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure> {
        Self::marshal_inner(&msg, bytes).map_err(|e| EncodeFailure::new("flow-mod", e))
    }
}

/// The data associated with a packet received by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Payload::Buffered(_, buf) | Payload::NotBuffered(buf) => buf,
        }
    }

    pub fn buffer_id(&self) -> Option<u32> {
        match self {
            Payload::Buffered(id, _) => Some(*id),
            Payload::NotBuffered(_) => None,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
    InvalidTtl,
}

impl PacketInReason {
    fn of_int(reason: u8) -> io::Result<PacketInReason> {
        match reason {
            0 => Ok(PacketInReason::NoMatch),
            1 => Ok(PacketInReason::ExplicitSend),
            2 => Ok(PacketInReason::InvalidTtl),
            r => Err(bad_data(format!("unknown packet-in reason {}", r))),
        }
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketIn {
    pub input_payload: Payload,
    /// Full length of the frame on the wire; the payload may hold fewer
    /// bytes when the device truncated its report.
    pub total_len: u16,
    /// Ingress port, taken from the OXM match.
    pub port: u32,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
}

impl PacketIn {
    /// True when the device reported fewer payload bytes than the frame held.
    pub fn is_truncated(&self) -> bool {
        self.input_payload.bytes().len() < self.total_len as usize
    }

    pub fn buffer_id(&self) -> Option<u32> {
        self.input_payload.buffer_id()
    }

    fn parse_inner(bytes: &mut Cursor<&[u8]>) -> io::Result<PacketIn> {
        let buf_id = match bytes.read_u32::<BigEndian>()? {
            OFP_NO_BUFFER => None,
            n => Some(n),
        };
        let total_len = bytes.read_u16::<BigEndian>()?;
        let reason = PacketInReason::of_int(bytes.read_u8()?)?;
        let table_id = bytes.read_u8()?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let pattern = Pattern::parse(bytes)?;
        let port = pattern
            .in_port
            .ok_or_else(|| bad_data("packet-in match carries no in_port".to_string()))?;
        bytes.consume(2);
        let mut data = vec![];
        bytes.read_to_end(&mut data)?;
        let payload = match buf_id {
            None => Payload::NotBuffered(data),
            Some(n) => Payload::Buffered(n, data),
        };
        Ok(PacketIn {
            input_payload: payload,
            total_len,
            port,
            reason,
            table_id,
            cookie,
        })
    }

    fn marshal_inner(pi: &PacketIn, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(pi.buffer_id().unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(pi.table_id)?;
        bytes.write_u64::<BigEndian>(pi.cookie)?;
        let pattern = Pattern {
            in_port: Some(pi.port),
            ..Pattern::match_all()
        };
        Pattern::marshal(&pattern, bytes)?;
        bytes.extend_from_slice(&[0; 2]);
        bytes.extend_from_slice(pi.input_payload.bytes());
        Ok(())
    }
}

impl MessageType for PacketIn {
    fn parse(buf: &[u8]) -> Result<PacketIn, MalformedMessage> {
        Self::parse_inner(&mut Cursor::new(buf)).map_err(|e| MalformedMessage::new("packet-in", e))
    }

    fn marshal(msg: PacketIn, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure> {
        Self::marshal_inner(&msg, bytes).map_err(|e| EncodeFailure::new("packet-in", e))
    }
}

/// Represents packets sent from the controller for the datapath to forward.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketOut {
    pub output_payload: Payload,
    /// Ingress port of the frame being resolved, if it came from a port.
    /// FLOOD output excludes this port.
    pub port_id: Option<u32>,
    pub apply_actions: Vec<Action>,
}

impl PacketOut {
    fn parse_inner(bytes: &mut Cursor<&[u8]>) -> io::Result<PacketOut> {
        let buf_id = match bytes.read_u32::<BigEndian>()? {
            OFP_NO_BUFFER => None,
            n => Some(n),
        };
        let in_port = bytes.read_u32::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        bytes.consume(6);
        let mut acts = vec![0; actions_len];
        bytes.read_exact(&mut acts)?;
        let apply_actions = Action::parse_sequence(&acts)?;
        let mut data = vec![];
        bytes.read_to_end(&mut data)?;
        Ok(PacketOut {
            output_payload: match buf_id {
                None => Payload::NotBuffered(data),
                Some(n) => Payload::Buffered(n, data),
            },
            port_id: if in_port == OfpPort::OFPPController as u32 {
                None
            } else {
                Some(in_port)
            },
            apply_actions,
        })
    }

    fn marshal_inner(po: &PacketOut, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(po.output_payload.buffer_id().unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u32::<BigEndian>(
            po.port_id.unwrap_or(OfpPort::OFPPController as u32),
        )?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        bytes.extend_from_slice(&[0; 6]);
        Action::marshal_sequence(&po.apply_actions, bytes)?;
        // a buffered packet is resumed on the device; only unbuffered
        // packet-outs carry the frame
        if let Payload::NotBuffered(data) = &po.output_payload {
            bytes.extend_from_slice(data);
        }
        Ok(())
    }
}

impl MessageType for PacketOut {
    fn parse(buf: &[u8]) -> Result<PacketOut, MalformedMessage> {
        Self::parse_inner(&mut Cursor::new(buf)).map_err(|e| MalformedMessage::new("packet-out", e))
    }

    fn marshal(msg: PacketOut, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure> {
        Self::marshal_inner(&msg, bytes).map_err(|e| EncodeFailure::new("packet-out", e))
    }
}

const OFPET_HELLO_FAILED: u16 = 0;
const OFPHFC_INCOMPATIBLE: u16 = 0;

/// An error reported by one side of the connection to the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl ErrorMsg {
    /// The error sent when version negotiation fails.
    pub fn hello_failed(explanation: &str) -> ErrorMsg {
        ErrorMsg {
            typ: OFPET_HELLO_FAILED,
            code: OFPHFC_INCOMPATIBLE,
            data: explanation.as_bytes().to_vec(),
        }
    }

    fn parse_inner(bytes: &mut Cursor<&[u8]>) -> io::Result<ErrorMsg> {
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        let mut data = vec![];
        bytes.read_to_end(&mut data)?;
        Ok(ErrorMsg { typ, code, data })
    }

    fn marshal_inner(err: &ErrorMsg, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(err.typ)?;
        bytes.write_u16::<BigEndian>(err.code)?;
        bytes.extend_from_slice(&err.data);
        Ok(())
    }
}

impl MessageType for ErrorMsg {
    fn parse(buf: &[u8]) -> Result<ErrorMsg, MalformedMessage> {
        Self::parse_inner(&mut Cursor::new(buf)).map_err(|e| MalformedMessage::new("error", e))
    }

    fn marshal(msg: ErrorMsg, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure> {
        Self::marshal_inner(&msg, bytes).map_err(|e| EncodeFailure::new("error", e))
    }
}

/// Encapsulates handling of messages implementing the `MessageType` trait.
pub mod message {
    use super::*;
    use crate::error::{EncodeFailure, MalformedMessage};
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use std::io;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        /// A decodable header whose type this controller does not handle.
        /// Carried so the session layer can log and discard it.
        Unsupported(u8),
    }

    impl Message {
        /// Map `Message` to the associated OpenFlow message type code.
        fn msg_code_of_message(msg: &Message) -> Option<MsgCode> {
            match msg {
                Message::Hello => Some(MsgCode::Hello),
                Message::Error(_) => Some(MsgCode::Error),
                Message::EchoRequest(_) => Some(MsgCode::EchoReq),
                Message::EchoReply(_) => Some(MsgCode::EchoResp),
                Message::FeaturesReq => Some(MsgCode::FeaturesReq),
                Message::FeaturesReply(_) => Some(MsgCode::FeaturesResp),
                Message::FlowMod(_) => Some(MsgCode::FlowMod),
                Message::PacketIn(_) => Some(MsgCode::PacketIn),
                Message::PacketOut(_) => Some(MsgCode::PacketOut),
                Message::Unsupported(_) => None,
            }
        }

        /// A short name for logging.
        pub fn type_name(&self) -> &'static str {
            match self {
                Message::Hello => "hello",
                Message::Error(_) => "error",
                Message::EchoRequest(_) => "echo-request",
                Message::EchoReply(_) => "echo-reply",
                Message::FeaturesReq => "features-request",
                Message::FeaturesReply(_) => "features-reply",
                Message::FlowMod(_) => "flow-mod",
                Message::PacketIn(_) => "packet-in",
                Message::PacketOut(_) => "packet-out",
                Message::Unsupported(_) => "unsupported",
            }
        }

        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), EncodeFailure> {
            match msg {
                Message::Hello | Message::FeaturesReq => Ok(()),
                Message::Error(err) => ErrorMsg::marshal(err, bytes),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::FeaturesReply(feats) => SwitchFeatures::marshal(feats, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(packet_out) => PacketOut::marshal(packet_out, bytes),
                Message::Unsupported(typ) => Err(EncodeFailure::new(
                    "message",
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("cannot marshal unsupported message type {}", typ),
                    ),
                )),
            }
        }
    }

    impl OfpMessage for Message {
        /// Returns a `u8` buffer containing a marshaled OpenFlow header and
        /// the message `msg`.
        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>, EncodeFailure> {
            let code = Message::msg_code_of_message(&msg).ok_or_else(|| {
                EncodeFailure::new(
                    "message",
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "unsupported message has no type code".to_string(),
                    ),
                )
            })?;
            let mut body = vec![];
            Message::marshal_body(msg, &mut body)?;
            let mut bytes = Vec::with_capacity(OfpHeader::size() + body.len());
            let header = OfpHeader::new(
                OFP_VERSION,
                code as u8,
                (OfpHeader::size() + body.len()) as u16,
                xid,
            );
            OfpHeader::marshal(&mut bytes, header);
            bytes.extend_from_slice(&body);
            Ok(bytes)
        }

        /// Returns a pair `(u32, Message)` of the transaction id and OpenFlow
        /// message parsed from the given OpenFlow header `header` and body
        /// `buf`.
        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message), MalformedMessage> {
            let msg = match header.type_code() {
                Some(MsgCode::Hello) => Message::Hello,
                Some(MsgCode::Error) => Message::Error(ErrorMsg::parse(buf)?),
                Some(MsgCode::EchoReq) => Message::EchoRequest(buf.to_vec()),
                Some(MsgCode::EchoResp) => Message::EchoReply(buf.to_vec()),
                Some(MsgCode::FeaturesReq) => Message::FeaturesReq,
                Some(MsgCode::FeaturesResp) => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                Some(MsgCode::FlowMod) => Message::FlowMod(FlowMod::parse(buf)?),
                Some(MsgCode::PacketIn) => Message::PacketIn(PacketIn::parse(buf)?),
                Some(MsgCode::PacketOut) => Message::PacketOut(PacketOut::parse(buf)?),
                Some(_) | None => Message::Unsupported(header.typ()),
            };
            Ok((header.xid(), msg))
        }
    }
}
