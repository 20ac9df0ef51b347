use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;
use crate::openflow0x01::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

/// Protocol version spoken by this controller.
pub const OFP_VERSION: u8 = 0x01;

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub const fn size() -> usize {
        8
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        // Writes into a Vec cannot fail.
        let _ = bytes.write_u8(header.version);
        let _ = bytes.write_u8(header.typ);
        let _ = bytes.write_u16::<BigEndian>(header.length);
        let _ = bytes.write_u32::<BigEndian>(header.xid);
    }

    /// Takes the first `OfpHeader::size()` bytes of `buf` and returns an `OfpHeader`.
    ///
    /// Fails with `TruncatedHeader` when `buf` is shorter than a header. The type
    /// code and version are not checked here; see `type_code`.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < Self::size() {
            return Err(ProtocolError::TruncatedHeader);
        }
        let mut bytes = Cursor::new(&buf[..Self::size()]);
        let truncated = |_| ProtocolError::TruncatedHeader;
        Ok(OfpHeader {
            version: bytes.read_u8().map_err(truncated)?,
            typ: bytes.read_u8().map_err(truncated)?,
            length: bytes.read_u16::<BigEndian>().map_err(truncated)?,
            xid: bytes.read_u32::<BigEndian>().map_err(truncated)?,
        })
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the OpenFlow message type code of a header.
    ///
    /// Codes outside of the OpenFlow 1.0 range yield `UnsupportedMessageType`.
    pub fn type_code(&self) -> Result<MsgCode, ProtocolError> {
        MsgCode::try_from(self.typ)
    }

    /// Return the raw type byte of a header.
    pub fn raw_type(&self) -> u8 {
        self.typ
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Length of the body that follows the header, or `None` if the declared
    /// length cannot even hold the header.
    pub fn body_length(&self) -> Option<usize> {
        self.length().checked_sub(Self::size())
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_big_endian_fields() {
        let hdr = OfpHeader::parse(&[0x01, 0x0a, 0x00, 0x20, 0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(hdr.version(), 1);
        assert_eq!(hdr.type_code().unwrap(), MsgCode::PacketIn);
        assert_eq!(hdr.length(), 32);
        assert_eq!(hdr.body_length(), Some(24));
        assert_eq!(hdr.xid(), 0xdeadbeef);
    }

    #[test]
    fn truncated_header_is_rejected() {
        for n in 0..OfpHeader::size() {
            let buf = vec![0u8; n];
            assert_eq!(OfpHeader::parse(&buf), Err(ProtocolError::TruncatedHeader));
        }
    }

    #[test]
    fn unknown_type_code_is_reported() {
        let hdr = OfpHeader::new(OFP_VERSION, 0x42, 8, 0);
        assert_eq!(hdr.type_code(), Err(ProtocolError::UnsupportedMessageType(0x42)));
    }

    #[test]
    fn length_below_header_has_no_body() {
        let hdr = OfpHeader::new(OFP_VERSION, 0, 4, 0);
        assert_eq!(hdr.body_length(), None);
    }

    #[test]
    fn marshal_then_parse() {
        let mut bytes = vec![];
        OfpHeader::marshal(&mut bytes, OfpHeader::new(OFP_VERSION, 2, 12, 7));
        assert_eq!(bytes.len(), OfpHeader::size());
        assert_eq!(OfpHeader::parse(&bytes).unwrap(), OfpHeader::new(1, 2, 12, 7));
    }
}
