//! Just enough packet parsing to route translation decisions, plus in-place
//! rewriting of IPv4 transport endpoints.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::bits::test_bit;

pub fn bytes_of_mac(addr: u64) -> [u8; 6] {
    let mut arr = [0; 6];
    for (i, byte) in arr.iter_mut().enumerate() {
        *byte = ((addr >> (8 * (5 - i))) & 0xff) as u8;
    }
    arr
}

pub fn mac_of_bytes(addr: [u8; 6]) -> u64 {
    addr.iter().fold(0, |acc, &b| (acc << 8) | b as u64)
}

type Bytes<'a> = Cursor<&'a [u8]>;

fn remaining(bytes: &Bytes) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn rest(bytes: &mut Bytes) -> Vec<u8> {
    let mut out = vec![];
    // Reading a slice cursor to its end cannot fail.
    let _ = bytes.read_to_end(&mut out);
    out
}

/// TCP Header flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TcpFlags {
    /// ECN-nonce concealment protection.
    pub ns: bool,
    /// Congestion window reduced.
    pub cwr: bool,
    /// ECN-Echo.
    pub ece: bool,
    /// Indicates the Urgent pointer field is significant.
    pub urg: bool,
    /// Indicates that the Acknowledgment field is significant.
    pub ack: bool,
    /// Asks to push the buffered data to the receiving application.
    pub psh: bool,
    /// Reset the connection.
    pub rst: bool,
    /// Synchronize sequence numbers.
    pub syn: bool,
    /// No more data from sender.
    pub fin: bool,
}

impl TcpFlags {
    fn of_int(d: u16) -> TcpFlags {
        let d = d as u32;
        TcpFlags {
            fin: test_bit(0, d),
            syn: test_bit(1, d),
            rst: test_bit(2, d),
            psh: test_bit(3, d),
            ack: test_bit(4, d),
            urg: test_bit(5, d),
            ece: test_bit(6, d),
            cwr: test_bit(7, d),
            ns: test_bit(8, d),
        }
    }
}

/// TCP frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tcp {
    pub src: u16,
    pub dst: u16,
    pub seq: u32,
    pub ack: u32,
    pub offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub chksum: u16,
    pub urgent: u16,
    pub payload: Vec<u8>,
}

impl Tcp {
    const SIZE: usize = 20;

    fn parse(bytes: &mut Bytes) -> io::Result<Tcp> {
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        let seq = bytes.read_u32::<BigEndian>()?;
        let ack = bytes.read_u32::<BigEndian>()?;
        let offset = bytes.read_u16::<BigEndian>()?;
        let flags = TcpFlags::of_int(offset & 0x1ff);
        let offset = (offset >> 12) as u8 & 0x0f;
        let window = bytes.read_u16::<BigEndian>()?;
        let chksum = bytes.read_u16::<BigEndian>()?;
        let urgent = bytes.read_u16::<BigEndian>()?;
        Ok(Tcp {
            src,
            dst,
            seq,
            ack,
            offset,
            flags,
            window,
            chksum,
            urgent,
            payload: rest(bytes),
        })
    }
}

/// UDP frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Udp {
    pub src: u16,
    pub dst: u16,
    pub chksum: u16,
    pub payload: Vec<u8>,
}

impl Udp {
    const SIZE: usize = 8;

    fn parse(bytes: &mut Bytes) -> io::Result<Udp> {
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        let _len = bytes.read_u16::<BigEndian>()?;
        let chksum = bytes.read_u16::<BigEndian>()?;
        Ok(Udp {
            src,
            dst,
            chksum,
            payload: rest(bytes),
        })
    }
}

/// Represents packets at the transport protocol level, which are encapsulated
/// within the IPv4 payload. At present, we only support TCP and UDP
/// explicitly; otherwise, the raw bytes and IPv4 protocol number are provided.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tp {
    Tcp(Tcp),
    Udp(Udp),
    Unparsable(u8, Vec<u8>),
}

/// IPv4 frame of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub ident: u16,
    /// Fragment offset in 8-byte units. Only the first fragment carries ports.
    pub frag_offset: u16,
    pub ttl: u8,
    pub proto: u8,
    pub chksum: u16,
    pub src: u32,
    pub dst: u32,
    pub tp: Tp,
}

pub const IP_PROTO_TCP: u8 = 0x06;
pub const IP_PROTO_UDP: u8 = 0x11;

impl Ip {
    const SIZE: usize = 20;

    fn parse(bytes: &mut Bytes) -> Option<Ip> {
        if remaining(bytes) < Self::SIZE {
            return None;
        }
        let parse = |bytes: &mut Bytes| -> io::Result<Option<Ip>> {
            let vhl = bytes.read_u8()?;
            let ihl = (vhl & 0x0f) as usize * 4;
            if (vhl >> 4) != 4 || ihl < Self::SIZE {
                return Ok(None);
            }
            let tos = bytes.read_u8()?;
            let _total_len = bytes.read_u16::<BigEndian>()?;
            let ident = bytes.read_u16::<BigEndian>()?;
            let frag_offset = bytes.read_u16::<BigEndian>()? & 0x1fff;
            let ttl = bytes.read_u8()?;
            let proto = bytes.read_u8()?;
            let chksum = bytes.read_u16::<BigEndian>()?;
            let src = bytes.read_u32::<BigEndian>()?;
            let dst = bytes.read_u32::<BigEndian>()?;
            let mut options = vec![0; ihl - Self::SIZE];
            bytes.read_exact(&mut options)?;
            let tp = match proto {
                _ if frag_offset != 0 => Tp::Unparsable(proto, rest(bytes)),
                IP_PROTO_TCP if remaining(bytes) >= Tcp::SIZE => Tp::Tcp(Tcp::parse(bytes)?),
                IP_PROTO_UDP if remaining(bytes) >= Udp::SIZE => Tp::Udp(Udp::parse(bytes)?),
                _ => Tp::Unparsable(proto, rest(bytes)),
            };
            Ok(Some(Ip {
                tos,
                ident,
                frag_offset,
                ttl,
                proto,
                chksum,
                src,
                dst,
                tp,
            }))
        };
        parse(bytes).ok().flatten()
    }

    /// `(src_port, dst_port)` of a TCP or UDP payload.
    pub fn ports(&self) -> Option<(u16, u16)> {
        match self.tp {
            Tp::Tcp(ref tcp) => Some((tcp.src, tcp.dst)),
            Tp::Udp(ref udp) => Some((udp.src, udp.dst)),
            Tp::Unparsable(_, _) => None,
        }
    }
}

/// Represents a packet at the network protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Unparsable(u16, Vec<u8>),
}

/// Represents a packet at the ethernet protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: u64,
    pub dl_dst: u64,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_dei: bool,
    pub dl_vlan_pcp: u8,
    pub dl_typ: u16,
    pub nw: Nw,
}

pub const ETH_TYP_IP: u16 = 0x0800;
pub const ETH_TYP_ARP: u16 = 0x0806;
const ETH_TYP_VLAN: u16 = 0x8100;

impl Packet {
    /// Parse an ethernet frame. `None` if the frame is shorter than an ethernet header.
    pub fn parse(buf: &[u8]) -> Option<Packet> {
        let mut bytes = Cursor::new(buf);
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        bytes.read_exact(&mut dst).ok()?;
        bytes.read_exact(&mut src).ok()?;
        let typ = bytes.read_u16::<BigEndian>().ok()?;
        let (tag, dei, pcp, typ) = match typ {
            ETH_TYP_VLAN => {
                let tag_and_pcp = bytes.read_u16::<BigEndian>().ok()?;
                let tag = tag_and_pcp & 0xfff;
                let dei = (tag_and_pcp & 0x1000) > 0;
                let pcp = tag_and_pcp >> 13;
                let typ = bytes.read_u16::<BigEndian>().ok()?;
                (Some(tag), dei, pcp as u8, typ)
            }
            _ => (None, false, 0x0, typ),
        };
        let nw_start = bytes.position();
        let nw = match typ {
            ETH_TYP_IP => match Ip::parse(&mut bytes) {
                Some(ip) => Nw::Ip(ip),
                None => {
                    bytes.set_position(nw_start);
                    Nw::Unparsable(typ, rest(&mut bytes))
                }
            },
            _ => Nw::Unparsable(typ, rest(&mut bytes)),
        };
        Some(Packet {
            dl_src: mac_of_bytes(src),
            dl_dst: mac_of_bytes(dst),
            dl_vlan: tag,
            dl_vlan_dei: dei,
            dl_vlan_pcp: pcp,
            dl_typ: typ,
            nw,
        })
    }

    pub fn ip(&self) -> Option<&Ip> {
        match self.nw {
            Nw::Ip(ref ip) => Some(ip),
            Nw::Unparsable(_, _) => None,
        }
    }
}

/// Which side of an IPv4 TCP/UDP packet to rewrite.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Src,
    Dst,
}

/// One's-complement checksum update for a 16-bit field changing from `old` to `new`.
fn csum_replace(csum: u16, old: u16, new: u16) -> u16 {
    let mut sum = (!csum) as u32 + (!old) as u32 + new as u32;
    sum = (sum & 0xffff) + (sum >> 16);
    sum = (sum & 0xffff) + (sum >> 16);
    !(sum as u16)
}

fn csum_replace32(csum: u16, old: u32, new: u32) -> u16 {
    let csum = csum_replace(csum, (old >> 16) as u16, (new >> 16) as u16);
    csum_replace(csum, old as u16, new as u16)
}

/// Return a copy of the ethernet frame `buf` with the IPv4 address and TCP/UDP
/// port of `endpoint` replaced, updating the IPv4 and transport checksums
/// incrementally. `None` if `buf` is not an IPv4 TCP/UDP frame.
pub fn rewrite_endpoint(buf: &[u8], endpoint: Endpoint, addr: u32, port: u16) -> Option<Vec<u8>> {
    let pkt = Packet::parse(buf)?;
    let ip = pkt.ip()?;
    let nw_off = if pkt.dl_vlan.is_some() { 18 } else { 14 };
    let ihl = (buf[nw_off] & 0x0f) as usize * 4;
    let tp_off = nw_off + ihl;
    let (csum_off, is_udp) = match ip.tp {
        Tp::Tcp(_) => (tp_off + 16, false),
        Tp::Udp(_) => (tp_off + 6, true),
        Tp::Unparsable(_, _) => return None,
    };
    let (addr_off, port_off) = match endpoint {
        Endpoint::Src => (nw_off + 12, tp_off),
        Endpoint::Dst => (nw_off + 16, tp_off + 2),
    };

    let mut out = buf.to_vec();
    let old_addr = BigEndian::read_u32(&out[addr_off..]);
    let old_port = BigEndian::read_u16(&out[port_off..]);

    let ip_csum = BigEndian::read_u16(&out[nw_off + 10..]);
    BigEndian::write_u16(&mut out[nw_off + 10..], csum_replace32(ip_csum, old_addr, addr));
    BigEndian::write_u32(&mut out[addr_off..], addr);
    BigEndian::write_u16(&mut out[port_off..], port);

    let tp_csum = BigEndian::read_u16(&out[csum_off..]);
    // A zero UDP checksum means none was computed.
    if !(is_udp && tp_csum == 0) {
        let tp_csum = csum_replace(csum_replace32(tp_csum, old_addr, addr), old_port, port);
        let tp_csum = if is_udp && tp_csum == 0 { 0xffff } else { tp_csum };
        BigEndian::write_u16(&mut out[csum_off..], tp_csum);
    }
    Some(out)
}
