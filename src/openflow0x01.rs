use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{bit, pack, test_bit};
use crate::error::ProtocolError;
use crate::packet::{bytes_of_mac, mac_of_bytes};

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello = 0,
    Error = 1,
    EchoReq = 2,
    EchoResp = 3,
    Vendor = 4,
    FeaturesReq = 5,
    FeaturesResp = 6,
    GetConfigReq = 7,
    GetConfigResp = 8,
    SetConfig = 9,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    PortMod = 15,
    StatsReq = 16,
    StatsResp = 17,
    BarrierReq = 18,
    BarrierResp = 19,
    QueueGetConfigReq = 20,
    QueueGetConfigResp = 21,
}

impl TryFrom<u8> for MsgCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<MsgCode, ProtocolError> {
        let msg_code = match code {
            0 => MsgCode::Hello,
            1 => MsgCode::Error,
            2 => MsgCode::EchoReq,
            3 => MsgCode::EchoResp,
            4 => MsgCode::Vendor,
            5 => MsgCode::FeaturesReq,
            6 => MsgCode::FeaturesResp,
            7 => MsgCode::GetConfigReq,
            8 => MsgCode::GetConfigResp,
            9 => MsgCode::SetConfig,
            10 => MsgCode::PacketIn,
            11 => MsgCode::FlowRemoved,
            12 => MsgCode::PortStatus,
            13 => MsgCode::PacketOut,
            14 => MsgCode::FlowMod,
            15 => MsgCode::PortMod,
            16 => MsgCode::StatsReq,
            17 => MsgCode::StatsResp,
            18 => MsgCode::BarrierReq,
            19 => MsgCode::BarrierResp,
            20 => MsgCode::QueueGetConfigReq,
            21 => MsgCode::QueueGetConfigResp,
            c => return Err(ProtocolError::UnsupportedMessageType(c)),
        };
        Ok(msg_code)
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(&self) -> usize;
    /// Parse a body buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, ProtocolError>;
    /// Marshal a message body into a `u8` buffer.
    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()>;
}

type Bytes<'a> = Cursor<&'a [u8]>;

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn malformed(what: &'static str) -> impl FnOnce(io::Error) -> ProtocolError {
    move |e| ProtocolError::MalformedBody(format!("{}: {}", what, e))
}

fn remaining(bytes: &Bytes) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn skip(bytes: &mut Bytes, n: usize) -> io::Result<()> {
    let mut pad = [0u8; 8];
    bytes.read_exact(&mut pad[..n])
}

fn read_mac(bytes: &mut Bytes) -> io::Result<u64> {
    let mut arr = [0u8; 6];
    bytes.read_exact(&mut arr)?;
    Ok(mac_of_bytes(arr))
}

fn read_rest(bytes: &mut Bytes) -> Vec<u8> {
    let start = (bytes.position() as usize).min(bytes.get_ref().len());
    bytes.set_position(bytes.get_ref().len() as u64);
    bytes.get_ref()[start..].to_vec()
}

/// A value with an optional prefix length; `mask: None` is an exact match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mask<T> {
    pub value: T,
    pub mask: Option<T>,
}

/// Fields to match against flows. `None` fields are wildcarded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub dl_src: Option<u64>,
    pub dl_dst: Option<u64>,
    pub dl_typ: Option<u16>,
    /// `Some(None)` matches frames without a VLAN tag.
    pub dl_vlan: Option<Option<u16>>,
    pub dl_vlan_pcp: Option<u8>,
    pub nw_src: Option<Mask<u32>>,
    pub nw_dst: Option<Mask<u32>>,
    pub nw_proto: Option<u8>,
    pub nw_tos: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
    pub in_port: Option<u16>,
}

const OFP_VLAN_NONE: u16 = 0xffff;

impl Pattern {
    /// Size of `ofp_match` on the wire.
    pub const SIZE: usize = 40;

    /// A pattern matching every packet.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    fn nw_wildcard(m: &Option<Mask<u32>>) -> u32 {
        match *m {
            None => 32,
            Some(Mask { mask: None, .. }) => 0,
            Some(Mask { mask: Some(prefix), .. }) => 32 - prefix.min(32),
        }
    }

    fn nw_of_wildcard(value: u32, wc: u32) -> Option<Mask<u32>> {
        match wc {
            0 => Some(Mask { value, mask: None }),
            wc if wc >= 32 => None,
            wc => Some(Mask {
                value,
                mask: Some(32 - wc),
            }),
        }
    }

    fn wildcards(&self) -> u32 {
        let flags = pack(&[
            self.in_port.is_none(),
            self.dl_vlan.is_none(),
            self.dl_src.is_none(),
            self.dl_dst.is_none(),
            self.dl_typ.is_none(),
            self.nw_proto.is_none(),
            self.tp_src.is_none(),
            self.tp_dst.is_none(),
        ]);
        let flags = flags | Self::nw_wildcard(&self.nw_src) << 8 | Self::nw_wildcard(&self.nw_dst) << 14;
        let flags = bit(20, flags, self.dl_vlan_pcp.is_none());
        bit(21, flags, self.nw_tos.is_none())
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(self.wildcards())?;
        bytes.write_u16::<BigEndian>(self.in_port.unwrap_or(0))?;
        bytes.write_all(&bytes_of_mac(self.dl_src.unwrap_or(0)))?;
        bytes.write_all(&bytes_of_mac(self.dl_dst.unwrap_or(0)))?;
        bytes.write_u16::<BigEndian>(match self.dl_vlan {
            Some(Some(vlan)) => vlan,
            Some(None) => OFP_VLAN_NONE,
            None => 0,
        })?;
        bytes.write_u8(self.dl_vlan_pcp.unwrap_or(0))?;
        bytes.write_u8(0)?;
        bytes.write_u16::<BigEndian>(self.dl_typ.unwrap_or(0))?;
        bytes.write_u8(self.nw_tos.unwrap_or(0))?;
        bytes.write_u8(self.nw_proto.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(0)?;
        bytes.write_u32::<BigEndian>(self.nw_src.map_or(0, |m| m.value))?;
        bytes.write_u32::<BigEndian>(self.nw_dst.map_or(0, |m| m.value))?;
        bytes.write_u16::<BigEndian>(self.tp_src.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(self.tp_dst.unwrap_or(0))
    }

    fn parse(bytes: &mut Bytes) -> io::Result<Pattern> {
        let w = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let dl_src = read_mac(bytes)?;
        let dl_dst = read_mac(bytes)?;
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = bytes.read_u8()?;
        skip(bytes, 1)?;
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        let nw_tos = bytes.read_u8()?;
        let nw_proto = bytes.read_u8()?;
        skip(bytes, 2)?;
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        let exact = |b: u32| !test_bit(b, w);
        Ok(Pattern {
            dl_src: Some(dl_src).filter(|_| exact(2)),
            dl_dst: Some(dl_dst).filter(|_| exact(3)),
            dl_typ: Some(dl_typ).filter(|_| exact(4)),
            dl_vlan: if test_bit(1, w) {
                None
            } else if dl_vlan == OFP_VLAN_NONE {
                Some(None)
            } else {
                Some(Some(dl_vlan))
            },
            dl_vlan_pcp: Some(dl_vlan_pcp).filter(|_| exact(20)),
            nw_src: Self::nw_of_wildcard(nw_src, (w >> 8) & 0x3f),
            nw_dst: Self::nw_of_wildcard(nw_dst, (w >> 14) & 0x3f),
            nw_proto: Some(nw_proto).filter(|_| exact(5)),
            nw_tos: Some(nw_tos).filter(|_| exact(21)),
            tp_src: Some(tp_src).filter(|_| exact(6)),
            tp_dst: Some(tp_dst).filter(|_| exact(7)),
            in_port: Some(in_port).filter(|_| exact(0)),
        })
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    /// Send to the controller, including at most this many bytes of the packet.
    Controller(u16),
    Local,
}

#[repr(u16)]
enum OfpPort {
    OFPPMax = 0xff00,
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

impl PseudoPort {
    fn of_int(p: u16) -> io::Result<Option<PseudoPort>> {
        if (OfpPort::OFPPNone as u16) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, len: u16) -> io::Result<PseudoPort> {
        let port = match p {
            p if p == (OfpPort::OFPPInPort as u16) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u16) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u16) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u16) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u16) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u16) => PseudoPort::Controller(len),
            p if p == (OfpPort::OFPPLocal as u16) => PseudoPort::Local,
            p if p <= (OfpPort::OFPPMax as u16) => PseudoPort::PhysicalPort(p),
            p => return Err(invalid(format!("unsupported port number {:#06x}", p))),
        };
        Ok(port)
    }

    fn to_int(self) -> u16 {
        match self {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u16,
            PseudoPort::Table => OfpPort::OFPPTable as u16,
            PseudoPort::Normal => OfpPort::OFPPNormal as u16,
            PseudoPort::Flood => OfpPort::OFPPFlood as u16,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u16,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u16,
            PseudoPort::Local => OfpPort::OFPPLocal as u16,
        }
    }

    fn marshal_opt(pp: Option<PseudoPort>, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(pp.map_or(OfpPort::OFPPNone as u16, PseudoPort::to_int))
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
    /// `None` strips the VLAN tag.
    SetDlVlan(Option<u16>),
    SetDlVlanPcp(u8),
    SetDlSrc(u64),
    SetDlDst(u64),
    SetNwSrc(u32),
    SetNwDst(u32),
    SetNwTos(u8),
    SetTpSrc(u16),
    SetTpDst(u16),
    Enqueue(PseudoPort, u32),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput,
    OFPATSetVlanVId,
    OFPATSetVlanPCP,
    OFPATStripVlan,
    OFPATSetDlSrc,
    OFPATSetDlDst,
    OFPATSetNwSrc,
    OFPATSetNwDst,
    OFPATSetNwTos,
    OFPATSetTpSrc,
    OFPATSetTpDst,
    OFPATEnqueue,
}

impl Action {
    fn type_code(&self) -> OfpActionType {
        match *self {
            Action::Output(_) => OfpActionType::OFPATOutput,
            Action::SetDlVlan(None) => OfpActionType::OFPATStripVlan,
            Action::SetDlVlan(Some(_)) => OfpActionType::OFPATSetVlanVId,
            Action::SetDlVlanPcp(_) => OfpActionType::OFPATSetVlanPCP,
            Action::SetDlSrc(_) => OfpActionType::OFPATSetDlSrc,
            Action::SetDlDst(_) => OfpActionType::OFPATSetDlDst,
            Action::SetNwSrc(_) => OfpActionType::OFPATSetNwSrc,
            Action::SetNwDst(_) => OfpActionType::OFPATSetNwDst,
            Action::SetNwTos(_) => OfpActionType::OFPATSetNwTos,
            Action::SetTpSrc(_) => OfpActionType::OFPATSetTpSrc,
            Action::SetTpDst(_) => OfpActionType::OFPATSetTpDst,
            Action::Enqueue(_, _) => OfpActionType::OFPATEnqueue,
        }
    }

    /// Wire size of one action, header included.
    pub fn size_of(&self) -> usize {
        match *self {
            Action::SetDlSrc(_) | Action::SetDlDst(_) | Action::Enqueue(_, _) => 16,
            _ => 8,
        }
    }

    pub fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Bytes) -> io::Result<Action> {
        let start = bytes.position();
        let action_code = bytes.read_u16::<BigEndian>()?;
        let len = bytes.read_u16::<BigEndian>()? as usize;
        if len < 8 || len % 8 != 0 || len - 4 > remaining(bytes) {
            return Err(invalid(format!("bad action length {}", len)));
        }
        let action = match action_code {
            t if t == (OfpActionType::OFPATOutput as u16) => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                let max_len = bytes.read_u16::<BigEndian>()?;
                Action::Output(PseudoPort::make(port_code, max_len)?)
            }
            t if t == (OfpActionType::OFPATSetVlanVId as u16) => {
                let vid = bytes.read_u16::<BigEndian>()?;
                Action::SetDlVlan(if vid == OFP_VLAN_NONE { None } else { Some(vid) })
            }
            t if t == (OfpActionType::OFPATSetVlanPCP as u16) => Action::SetDlVlanPcp(bytes.read_u8()?),
            t if t == (OfpActionType::OFPATStripVlan as u16) => Action::SetDlVlan(None),
            t if t == (OfpActionType::OFPATSetDlSrc as u16) => Action::SetDlSrc(read_mac(bytes)?),
            t if t == (OfpActionType::OFPATSetDlDst as u16) => Action::SetDlDst(read_mac(bytes)?),
            t if t == (OfpActionType::OFPATSetNwSrc as u16) => Action::SetNwSrc(bytes.read_u32::<BigEndian>()?),
            t if t == (OfpActionType::OFPATSetNwDst as u16) => Action::SetNwDst(bytes.read_u32::<BigEndian>()?),
            t if t == (OfpActionType::OFPATSetNwTos as u16) => Action::SetNwTos(bytes.read_u8()?),
            t if t == (OfpActionType::OFPATSetTpSrc as u16) => Action::SetTpSrc(bytes.read_u16::<BigEndian>()?),
            t if t == (OfpActionType::OFPATSetTpDst as u16) => Action::SetTpDst(bytes.read_u16::<BigEndian>()?),
            t if t == (OfpActionType::OFPATEnqueue as u16) => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                skip(bytes, 6)?;
                let queue_id = bytes.read_u32::<BigEndian>()?;
                Action::Enqueue(PseudoPort::make(port_code, 0)?, queue_id)
            }
            t => return Err(invalid(format!("unsupported action type {}", t))),
        };
        bytes.set_position(start + len as u64);
        Ok(action)
    }

    fn parse_sequence(bytes: &mut Bytes) -> io::Result<Vec<Action>> {
        let mut actions = vec![];
        while remaining(bytes) > 0 {
            actions.push(Action::parse(bytes)?);
        }
        Ok(actions)
    }

    fn move_controller_last(acts: &[Action]) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .iter()
            .partition(|act| matches!(act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(self.type_code() as u16)?;
        bytes.write_u16::<BigEndian>(self.size_of() as u16)?;
        match *self {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(pp.to_int())?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })
            }
            Action::SetDlVlan(None) => bytes.write_u32::<BigEndian>(0),
            Action::SetDlVlan(Some(vid)) => {
                bytes.write_u16::<BigEndian>(vid)?;
                bytes.write_u16::<BigEndian>(0)
            }
            Action::SetDlVlanPcp(pcp) | Action::SetNwTos(pcp) => {
                bytes.write_u8(pcp)?;
                bytes.write_all(&[0; 3])
            }
            Action::SetDlSrc(mac) | Action::SetDlDst(mac) => {
                bytes.write_all(&bytes_of_mac(mac))?;
                bytes.write_all(&[0; 6])
            }
            Action::SetNwSrc(addr) | Action::SetNwDst(addr) => bytes.write_u32::<BigEndian>(addr),
            Action::SetTpSrc(pt) | Action::SetTpDst(pt) => {
                bytes.write_u16::<BigEndian>(pt)?;
                bytes.write_u16::<BigEndian>(0)
            }
            Action::Enqueue(pp, queue_id) => {
                bytes.write_u16::<BigEndian>(pp.to_int())?;
                bytes.write_all(&[0; 6])?;
                bytes.write_u32::<BigEndian>(queue_id)
            }
        }
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

    fn to_int(self) -> u16 {
        match self {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d),
            table_stats: test_bit(1, d),
            port_stats: test_bit(2, d),
            stp: test_bit(3, d),
            ip_reasm: test_bit(5, d),
            queue_stats: test_bit(6, d),
            arp_match_ip: test_bit(7, d),
        }
    }

    fn to_int(self) -> u32 {
        // Bit 4 is reserved.
        pack(&[
            self.flow_stats,
            self.table_stats,
            self.port_stats,
            self.stp,
            false,
            self.ip_reasm,
            self.queue_stats,
            self.arp_match_ip,
        ])
    }
}

/// Actions supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SupportedActions {
    pub output: bool,
    pub set_vlan_id: bool,
    pub set_vlan_pcp: bool,
    pub strip_vlan: bool,
    pub set_dl_src: bool,
    pub set_dl_dst: bool,
    pub set_nw_src: bool,
    pub set_nw_dst: bool,
    pub set_nw_tos: bool,
    pub set_tp_src: bool,
    pub set_tp_dst: bool,
    pub enqueue: bool,
    pub vendor: bool,
}

impl SupportedActions {
    fn of_int(d: u32) -> SupportedActions {
        SupportedActions {
            output: test_bit(0, d),
            set_vlan_id: test_bit(1, d),
            set_vlan_pcp: test_bit(2, d),
            strip_vlan: test_bit(3, d),
            set_dl_src: test_bit(4, d),
            set_dl_dst: test_bit(5, d),
            set_nw_src: test_bit(6, d),
            set_nw_dst: test_bit(7, d),
            set_nw_tos: test_bit(8, d),
            set_tp_src: test_bit(9, d),
            set_tp_dst: test_bit(10, d),
            enqueue: test_bit(11, d),
            vendor: test_bit(12, d),
        }
    }

    fn to_int(self) -> u32 {
        pack(&[
            self.output,
            self.set_vlan_id,
            self.set_vlan_pcp,
            self.strip_vlan,
            self.set_dl_src,
            self.set_dl_dst,
            self.set_nw_src,
            self.set_nw_dst,
            self.set_nw_tos,
            self.set_tp_src,
            self.set_tp_dst,
            self.enqueue,
            self.vendor,
        ])
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    pub supported_actions: SupportedActions,
    pub ports: Vec<PortDesc>,
}

const SWITCH_FEATURES_FIXED: usize = 24;

impl MessageType for SwitchFeatures {
    fn size_of(&self) -> usize {
        SWITCH_FEATURES_FIXED + self.ports.len() * PortDesc::SIZE
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, ProtocolError> {
        let mut bytes = Cursor::new(buf);
        let parse = |bytes: &mut Bytes| -> io::Result<SwitchFeatures> {
            let datapath_id = bytes.read_u64::<BigEndian>()?;
            let num_buffers = bytes.read_u32::<BigEndian>()?;
            let num_tables = bytes.read_u8()?;
            skip(bytes, 3)?;
            let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
            let supported_actions = SupportedActions::of_int(bytes.read_u32::<BigEndian>()?);
            if remaining(bytes) % PortDesc::SIZE != 0 {
                return Err(invalid(format!("trailing {} bytes in port list", remaining(bytes))));
            }
            let mut ports = vec![];
            while remaining(bytes) > 0 {
                ports.push(PortDesc::parse(bytes)?);
            }
            Ok(SwitchFeatures {
                datapath_id,
                num_buffers,
                num_tables,
                supported_capabilities,
                supported_actions,
                ports,
            })
        };
        parse(&mut bytes).map_err(malformed("features_reply"))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u64::<BigEndian>(self.datapath_id)?;
        bytes.write_u32::<BigEndian>(self.num_buffers)?;
        bytes.write_u8(self.num_tables)?;
        bytes.write_all(&[0; 3])?;
        bytes.write_u32::<BigEndian>(self.supported_capabilities.to_int())?;
        bytes.write_u32::<BigEndian>(self.supported_actions.to_int())?;
        for port in &self.ports {
            port.marshal(bytes)?;
        }
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(cmd: u16) -> io::Result<FlowModCmd> {
        match cmd {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(invalid(format!("unknown flow_mod command {}", c))),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

const FLOW_MOD_FIXED: usize = Pattern::SIZE + 24;
const NO_BUFFER: u32 = 0xffff_ffff;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        pack(&[notify_when_removed, check_overlap]) as u16
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        test_bit(1, flags as u32)
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        test_bit(0, flags as u32)
    }

    /// Actions in the order they go on the wire. Output to the controller goes last
    /// and output to `Table` is not allowed in an installed flow.
    fn wire_actions(&self) -> Vec<Action> {
        Action::move_controller_last(&self.actions)
            .into_iter()
            .filter(|act| !matches!(act, Action::Output(PseudoPort::Table)))
            .collect()
    }
}

impl MessageType for FlowMod {
    fn size_of(&self) -> usize {
        FLOW_MOD_FIXED + Action::size_of_sequence(&self.wire_actions())
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, ProtocolError> {
        let mut bytes = Cursor::new(buf);
        let parse = |bytes: &mut Bytes| -> io::Result<FlowMod> {
            let pattern = Pattern::parse(bytes)?;
            let cookie = bytes.read_u64::<BigEndian>()?;
            let command = FlowModCmd::of_int(bytes.read_u16::<BigEndian>()?)?;
            let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
            let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
            let prio = bytes.read_u16::<BigEndian>()?;
            let buffer_id = bytes.read_u32::<BigEndian>()?;
            let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
            let flags = bytes.read_u16::<BigEndian>()?;
            let actions = Action::parse_sequence(bytes)?;
            Ok(FlowMod {
                command,
                pattern,
                priority: prio,
                actions,
                cookie,
                idle_timeout: idle,
                hard_timeout: hard,
                notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
                apply_to_packet: Some(buffer_id).filter(|&id| id != NO_BUFFER),
                out_port,
                check_overlap: FlowMod::check_overlap_of_flags(flags),
            })
        };
        parse(&mut bytes).map_err(malformed("flow_mod"))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        self.pattern.marshal(bytes)?;
        bytes.write_u64::<BigEndian>(self.cookie)?;
        bytes.write_u16::<BigEndian>(self.command as u16)?;
        bytes.write_u16::<BigEndian>(self.idle_timeout.to_int())?;
        bytes.write_u16::<BigEndian>(self.hard_timeout.to_int())?;
        bytes.write_u16::<BigEndian>(self.priority)?;
        bytes.write_u32::<BigEndian>(self.apply_to_packet.unwrap_or(NO_BUFFER))?;
        PseudoPort::marshal_opt(self.out_port, bytes)?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(self.check_overlap, self.notify_when_removed))?;
        let actions = self.wire_actions();
        if actions.len() != self.actions.len() {
            log::warn!("dropping output to OFPP_TABLE from installed flow");
        }
        for act in actions {
            act.marshal(bytes)?;
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Packet held in a switch buffer; only the id travels in a `PacketOut`.
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(&self) -> usize {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf.len(),
        }
    }

    /// The packet bytes, as far as the controller has seen them.
    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    pub fn buffer_id(&self) -> Option<u32> {
        match *self {
            Payload::Buffered(id, _) => Some(id),
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
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

const PACKET_IN_FIXED: usize = 10;

impl MessageType for PacketIn {
    fn size_of(&self) -> usize {
        PACKET_IN_FIXED + self.input_payload.size_of()
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, ProtocolError> {
        let mut bytes = Cursor::new(buf);
        let parse = |bytes: &mut Bytes| -> io::Result<PacketIn> {
            let buf_id = bytes.read_u32::<BigEndian>()?;
            let total_len = bytes.read_u16::<BigEndian>()?;
            let port = bytes.read_u16::<BigEndian>()?;
            let reason = match bytes.read_u8()? {
                0 => PacketInReason::NoMatch,
                1 => PacketInReason::ExplicitSend,
                r => return Err(invalid(format!("unknown packet_in reason {}", r))),
            };
            skip(bytes, 1)?;
            let pk = read_rest(bytes);
            let input_payload = match buf_id {
                NO_BUFFER => Payload::NotBuffered(pk),
                n => Payload::Buffered(n, pk),
            };
            Ok(PacketIn {
                input_payload,
                total_len,
                port,
                reason,
            })
        };
        parse(&mut bytes).map_err(malformed("packet_in"))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(self.input_payload.buffer_id().unwrap_or(NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(self.total_len)?;
        bytes.write_u16::<BigEndian>(self.port)?;
        bytes.write_u8(self.reason as u8)?;
        bytes.write_u8(0)?;
        bytes.write_all(self.input_payload.bytes())
    }
}

/// Represents packets sent from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

const PACKET_OUT_FIXED: usize = 8;

impl MessageType for PacketOut {
    fn size_of(&self) -> usize {
        let data = match self.output_payload {
            Payload::Buffered(_, _) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        PACKET_OUT_FIXED + Action::size_of_sequence(&self.apply_actions) + data
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, ProtocolError> {
        let mut bytes = Cursor::new(buf);
        let parse = |bytes: &mut Bytes| -> io::Result<PacketOut> {
            let buf_id = bytes.read_u32::<BigEndian>()?;
            let port_id = Some(bytes.read_u16::<BigEndian>()?).filter(|&p| p != OfpPort::OFPPNone as u16);
            let actions_len = bytes.read_u16::<BigEndian>()? as usize;
            if actions_len > remaining(bytes) {
                return Err(invalid(format!("actions length {} exceeds body", actions_len)));
            }
            let start = bytes.position() as usize;
            let action_bytes = &bytes.get_ref()[start..start + actions_len];
            let apply_actions = Action::parse_sequence(&mut Cursor::new(action_bytes))?;
            bytes.set_position((start + actions_len) as u64);
            let data = read_rest(bytes);
            let output_payload = match buf_id {
                NO_BUFFER => Payload::NotBuffered(data),
                n => Payload::Buffered(n, data),
            };
            Ok(PacketOut {
                output_payload,
                port_id,
                apply_actions,
            })
        };
        parse(&mut bytes).map_err(malformed("packet_out"))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(self.output_payload.buffer_id().unwrap_or(NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(self.port_id.unwrap_or(OfpPort::OFPPNone as u16))?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&self.apply_actions) as u16)?;
        for act in &self.apply_actions {
            act.marshal(bytes)?;
        }
        match self.output_payload {
            Payload::Buffered(_, _) => Ok(()),
            Payload::NotBuffered(ref buf) => bytes.write_all(buf),
        }
    }
}

/// STP state of a port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StpState {
    Listen,
    Learn,
    Forward,
    Block,
}

/// Current state of a physical port. Not configurable by the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortState {
    pub down: bool,
    pub stp_state: StpState,
}

impl PortState {
    fn of_int(d: u32) -> PortState {
        let stp_state = match (d >> 8) & 3 {
            0 => StpState::Listen,
            1 => StpState::Learn,
            2 => StpState::Forward,
            _ => StpState::Block,
        };
        PortState {
            down: test_bit(0, d),
            stp_state,
        }
    }

    fn to_int(self) -> u32 {
        bit(0, (self.stp_state as u32) << 8, self.down)
    }
}

/// Features of physical ports available in a datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PortFeatures {
    pub f_10mbhd: bool,
    pub f_10mbfd: bool,
    pub f_100mbhd: bool,
    pub f_100mbfd: bool,
    pub f_1gbhd: bool,
    pub f_1gbfd: bool,
    pub f_10gbfd: bool,
    pub copper: bool,
    pub fiber: bool,
    pub autoneg: bool,
    pub pause: bool,
    pub pause_asym: bool,
}

impl PortFeatures {
    fn of_int(d: u32) -> PortFeatures {
        PortFeatures {
            f_10mbhd: test_bit(0, d),
            f_10mbfd: test_bit(1, d),
            f_100mbhd: test_bit(2, d),
            f_100mbfd: test_bit(3, d),
            f_1gbhd: test_bit(4, d),
            f_1gbfd: test_bit(5, d),
            f_10gbfd: test_bit(6, d),
            copper: test_bit(7, d),
            fiber: test_bit(8, d),
            autoneg: test_bit(9, d),
            pause: test_bit(10, d),
            pause_asym: test_bit(11, d),
        }
    }

    fn to_int(self) -> u32 {
        pack(&[
            self.f_10mbhd,
            self.f_10mbfd,
            self.f_100mbhd,
            self.f_100mbfd,
            self.f_1gbhd,
            self.f_1gbfd,
            self.f_10gbfd,
            self.copper,
            self.fiber,
            self.autoneg,
            self.pause,
            self.pause_asym,
        ])
    }
}

/// Flags to indicate behavior of the physical port.
///
/// These flags are used both to describe the current configuration of a physical port,
/// and to configure a port's behavior.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PortConfig {
    pub down: bool,
    pub no_stp: bool,
    pub no_recv: bool,
    pub no_recv_stp: bool,
    pub no_flood: bool,
    pub no_fwd: bool,
    pub no_packet_in: bool,
}

impl PortConfig {
    fn of_int(d: u32) -> PortConfig {
        PortConfig {
            down: test_bit(0, d),
            no_stp: test_bit(1, d),
            no_recv: test_bit(2, d),
            no_recv_stp: test_bit(3, d),
            no_flood: test_bit(4, d),
            no_fwd: test_bit(5, d),
            no_packet_in: test_bit(6, d),
        }
    }

    fn to_int(self) -> u32 {
        pack(&[
            self.down,
            self.no_stp,
            self.no_recv,
            self.no_recv_stp,
            self.no_flood,
            self.no_fwd,
            self.no_packet_in,
        ])
    }
}

/// Description of a physical port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: u64,
    pub name: String,
    pub config: PortConfig,
    pub state: PortState,
    pub curr: PortFeatures,
    pub advertised: PortFeatures,
    pub supported: PortFeatures,
    pub peer: PortFeatures,
}

const OFP_MAX_PORT_NAME_LEN: usize = 16;

impl PortDesc {
    const SIZE: usize = 48;

    fn parse(bytes: &mut Bytes) -> io::Result<PortDesc> {
        let port_no = bytes.read_u16::<BigEndian>()?;
        let hw_addr = read_mac(bytes)?;
        let name = {
            let mut arr = [0u8; OFP_MAX_PORT_NAME_LEN];
            bytes.read_exact(&mut arr)?;
            let end = arr.iter().position(|&b| b == 0).unwrap_or(arr.len());
            String::from_utf8_lossy(&arr[..end]).into_owned()
        };
        let config = PortConfig::of_int(bytes.read_u32::<BigEndian>()?);
        let state = PortState::of_int(bytes.read_u32::<BigEndian>()?);
        let curr = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let advertised = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let supported = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let peer = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        Ok(PortDesc {
            port_no,
            hw_addr,
            name,
            config,
            state,
            curr,
            advertised,
            supported,
            peer,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(self.port_no)?;
        bytes.write_all(&bytes_of_mac(self.hw_addr))?;
        let mut name = [0u8; OFP_MAX_PORT_NAME_LEN];
        let raw = self.name.as_bytes();
        let n = raw.len().min(OFP_MAX_PORT_NAME_LEN - 1);
        name[..n].copy_from_slice(&raw[..n]);
        bytes.write_all(&name)?;
        bytes.write_u32::<BigEndian>(self.config.to_int())?;
        bytes.write_u32::<BigEndian>(self.state.to_int())?;
        bytes.write_u32::<BigEndian>(self.curr.to_int())?;
        bytes.write_u32::<BigEndian>(self.advertised.to_int())?;
        bytes.write_u32::<BigEndian>(self.supported.to_int())?;
        bytes.write_u32::<BigEndian>(self.peer.to_int())
    }
}

/// What changed about a physical port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortReason {
    PortAdd,
    PortDelete,
    PortModify,
}

/// A physical port has changed in the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

impl MessageType for PortStatus {
    fn size_of(&self) -> usize {
        8 + PortDesc::SIZE
    }

    fn parse(buf: &[u8]) -> Result<PortStatus, ProtocolError> {
        let mut bytes = Cursor::new(buf);
        let parse = |bytes: &mut Bytes| -> io::Result<PortStatus> {
            let reason = match bytes.read_u8()? {
                0 => PortReason::PortAdd,
                1 => PortReason::PortDelete,
                2 => PortReason::PortModify,
                r => return Err(invalid(format!("unknown port_status reason {}", r))),
            };
            skip(bytes, 7)?;
            let desc = PortDesc::parse(bytes)?;
            Ok(PortStatus { reason, desc })
        };
        parse(&mut bytes).map_err(malformed("port_status"))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u8(self.reason as u8)?;
        bytes.write_all(&[0; 7])?;
        self.desc.marshal(bytes)
    }
}

/// Error reported by a switch (datapath -> controller).
///
/// Only the raw type and code are kept; the controller logs them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchError {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for SwitchError {
    fn size_of(&self) -> usize {
        4 + self.data.len()
    }

    fn parse(buf: &[u8]) -> Result<SwitchError, ProtocolError> {
        let mut bytes = Cursor::new(buf);
        let parse = |bytes: &mut Bytes| -> io::Result<SwitchError> {
            let typ = bytes.read_u16::<BigEndian>()?;
            let code = bytes.read_u16::<BigEndian>()?;
            Ok(SwitchError {
                typ,
                code,
                data: read_rest(bytes),
            })
        };
        parse(&mut bytes).map_err(malformed("error"))
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(self.typ)?;
        bytes.write_u16::<BigEndian>(self.code)?;
        bytes.write_all(&self.data)
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::{OfpHeader, OFP_VERSION};
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow 1.0 messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(SwitchError),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PortStatus(PortStatus),
        PacketOut(PacketOut),
        BarrierRequest,
        BarrierReply,
        /// A valid OpenFlow 1.0 type this controller does not model. Callers skip it.
        Unsupported(MsgCode),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        pub fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PortStatus(_) => MsgCode::PortStatus,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::Unsupported(code) => code,
            }
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: &Message, bytes: &mut Vec<u8>) -> io::Result<()> {
            match *msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply
                | Message::Unsupported(_) => Ok(()),
                Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => bytes.write_all(buf),
                Message::Error(ref err) => err.marshal(bytes),
                Message::FeaturesReply(ref features) => features.marshal(bytes),
                Message::FlowMod(ref flow_mod) => flow_mod.marshal(bytes),
                Message::PacketIn(ref packet_in) => packet_in.marshal(bytes),
                Message::PortStatus(ref sts) => sts.marshal(bytes),
                Message::PacketOut(ref packet_out) => packet_out.marshal(bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply
                | Message::Unsupported(_) => 0,
                Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                Message::Error(ref err) => err.size_of(),
                Message::FeaturesReply(ref features) => features.size_of(),
                Message::FlowMod(ref flow_mod) => flow_mod.size_of(),
                Message::PacketIn(ref packet_in) => packet_in.size_of(),
                Message::PortStatus(ref ps) => ps.size_of(),
                Message::PacketOut(ref po) => po.size_of(),
            };
            OfpHeader::size() + body
        }

        fn header_of(xid: u32, msg: &Message) -> OfpHeader {
            let sizeof_buf = Self::size_of(msg);
            OfpHeader::new(
                OFP_VERSION,
                Self::msg_code_of_message(msg) as u8,
                sizeof_buf as u16,
                xid,
            )
        }

        fn marshal(xid: u32, msg: &Message) -> Vec<u8> {
            let hdr = Self::header_of(xid, msg);
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr);
            // Writes into a Vec cannot fail.
            let _ = Message::marshal_body(msg, &mut bytes);
            debug_assert_eq!(bytes.len(), hdr.length());
            bytes
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message), ProtocolError> {
            let typ = header.type_code()?;
            // Hello carries the sender's highest version; anything else must be 1.0.
            if typ != MsgCode::Hello && header.version() != OFP_VERSION {
                return Err(ProtocolError::BadVersion(header.version()));
            }
            let msg = match typ {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(SwitchError::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PortStatus => Message::PortStatus(PortStatus::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                t => Message::Unsupported(t),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }
}
