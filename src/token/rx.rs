//! Rx wire codec for the single call this crate makes.
//!
//! Rx multiplexes calls over UDP with a fixed 28-byte header. We only ever
//! issue one request packet and read one reply on a fresh connection, so
//! the codec covers exactly that: a DATA packet carrying a GetTicket
//! request, and DATA or ABORT coming back. Security index 0 (rxnull), no
//! checksums, no jumbograms.

use crate::constants::*;
use crate::error::KafsError;
use binrw::{binread, binwrite, BinRead, BinResult, BinWrite, Endian};
use binrw::io::{Read, Seek, Write};
use tracing::error;

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RxHeader {
    pub epoch: u32,
    /// Connection id. The low two bits select the channel; we always use
    /// channel zero.
    pub cid: u32,
    pub call: u32,
    pub seq: u32,
    pub serial: u32,
    pub packet_type: u8,
    pub flags: u8,
    pub user_status: u8,
    pub security: u8,
    pub checksum: u16,
    pub service: u16,
}

/// XDR variable-length opaque: u32 length, bytes, zero padding to a
/// four-byte boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct XdrOpaque(pub Vec<u8>);

fn xdr_pad(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

impl BinRead for XdrOpaque {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let len = u32::read_options(reader, endian, ())? as usize;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad[..xdr_pad(len)])?;
        Ok(XdrOpaque(data))
    }
}

impl BinWrite for XdrOpaque {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let len = u32::try_from(self.0.len()).map_err(|_| binrw::Error::AssertFail {
            pos: 0,
            message: "xdr opaque too long".to_string(),
        })?;
        len.write_options(writer, endian, ())?;
        writer.write_all(&self.0)?;
        writer.write_all(&[0u8; 3][..xdr_pad(self.0.len())])?;
        Ok(())
    }
}

/// XDR string, same layout as an opaque but utf8-checked on read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct XdrString(pub String);

impl From<&str> for XdrString {
    fn from(value: &str) -> Self {
        XdrString(value.to_string())
    }
}

impl BinRead for XdrString {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let raw = XdrOpaque::read_options(reader, endian, ())?;
        let s = String::from_utf8(raw.0).map_err(|_| binrw::Error::AssertFail {
            pos,
            message: "xdr string is not utf8".to_string(),
        })?;
        Ok(XdrString(s))
    }
}

impl BinWrite for XdrString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        XdrOpaque(self.0.as_bytes().to_vec()).write_options(writer, endian, ())
    }
}

/// GetTicket call arguments as the ticket-granting service expects them.
#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GetTicketRequest {
    #[br(temp, assert(opcode == KA_GET_TICKET_OPCODE))]
    #[bw(calc = KA_GET_TICKET_OPCODE)]
    opcode: u32,
    pub kvno: u32,
    pub auth_domain: XdrString,
    pub ticket: XdrOpaque,
    pub name: XdrString,
    pub instance: XdrString,
    pub start: u32,
    pub end: u32,
}

#[binwrite]
#[brw(big)]
#[binread]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GetTicketReply {
    pub code: i32,
    pub kvno: u32,
    pub ticket: XdrOpaque,
    pub start: u32,
    pub end: u32,
}

fn data_header(epoch: u32, cid: u32, serial: u32) -> RxHeader {
    RxHeader {
        epoch,
        cid: cid & !0b11,
        call: 1,
        seq: 1,
        serial,
        packet_type: RX_TYPE_DATA,
        flags: RX_FLAG_CLIENT_INITIATED | RX_FLAG_LAST_PACKET,
        user_status: 0,
        security: RX_SECURITY_NONE,
        checksum: 0,
        service: KA_TGS_SERVICE,
    }
}

/// Serialize one client DATA packet carrying `body`.
pub(crate) fn request_packet(
    epoch: u32,
    cid: u32,
    serial: u32,
    body: &GetTicketRequest,
) -> Result<Vec<u8>, KafsError> {
    let mut c = std::io::Cursor::new(Vec::new());
    data_header(epoch, cid, serial).write(&mut c)?;
    body.write(&mut c)?;
    let packet = c.into_inner();
    if packet.len() > RX_MAX_PACKET {
        error!(len = packet.len(), "ticket request exceeds one rx packet");
        return Err(KafsError::RxBadPacket);
    }
    Ok(packet)
}

/// Parse a server packet for the connection identified by `cid`. ABORT
/// payloads carry one error code; anything that is not a well-formed DATA
/// reply for our call is rejected.
pub(crate) fn parse_reply(buf: &[u8], cid: u32) -> Result<GetTicketReply, KafsError> {
    let mut c = std::io::Cursor::new(buf);
    let header = RxHeader::read(&mut c).map_err(|_| KafsError::RxBadPacket)?;

    if header.cid & !0b11 != cid & !0b11 {
        return Err(KafsError::RxBadPacket);
    }
    match header.packet_type {
        t if t == RX_TYPE_ABORT => {
            let code = i32::read_be(&mut c).map_err(|_| KafsError::RxBadPacket)?;
            Err(KafsError::RxAbort(code))
        }
        t if t == RX_TYPE_DATA => {
            GetTicketReply::read(&mut c).map_err(|_| KafsError::RxBadPacket)
        }
        _ => Err(KafsError::RxBadPacket),
    }
}

/// Serialize a server-side DATA reply. Only tests speak this direction,
/// but keeping it next to the parser keeps the two in step.
#[cfg(test)]
pub(crate) fn reply_packet(request_header: &RxHeader, body: &GetTicketReply) -> Vec<u8> {
    let header = RxHeader {
        flags: RX_FLAG_LAST_PACKET,
        serial: request_header.serial + 1,
        ..request_header.clone()
    };
    let mut c = std::io::Cursor::new(Vec::new());
    header.write(&mut c).expect("write reply header");
    body.write(&mut c).expect("write reply body");
    c.into_inner()
}

#[cfg(test)]
pub(crate) fn abort_packet(request_header: &RxHeader, code: i32) -> Vec<u8> {
    let header = RxHeader {
        packet_type: RX_TYPE_ABORT,
        flags: 0,
        serial: request_header.serial + 1,
        ..request_header.clone()
    };
    let mut c = std::io::Cursor::new(Vec::new());
    header.write(&mut c).expect("write abort header");
    code.write_be(&mut c).expect("write abort code");
    c.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> GetTicketRequest {
        GetTicketRequest {
            kvno: 0,
            auth_domain: XdrString::from("EXAMPLE.ORG"),
            ticket: XdrOpaque(vec![0x6e; 93]),
            name: XdrString::from("afs"),
            instance: XdrString::from("example.org"),
            start: 1_700_000_000,
            end: 1_700_036_000,
        }
    }

    #[test]
    fn test_header_layout() {
        let header = data_header(0x01020304, 0xdeadbeef, 7);
        let mut c = std::io::Cursor::new(Vec::new());
        header.write(&mut c).expect("write header");
        let bytes = c.into_inner();

        assert_eq!(bytes.len(), RX_HEADER_LEN);
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        // Channel bits are masked off the connection id.
        assert_eq!(&bytes[4..8], &[0xde, 0xad, 0xbe, 0xec]);
        assert_eq!(bytes[20], RX_TYPE_DATA);
        assert_eq!(bytes[21], RX_FLAG_CLIENT_INITIATED | RX_FLAG_LAST_PACKET);
        assert_eq!(&bytes[26..28], &KA_TGS_SERVICE.to_be_bytes());
    }

    #[test]
    fn test_xdr_padding() {
        let mut c = std::io::Cursor::new(Vec::new());
        XdrOpaque(vec![1, 2, 3, 4, 5]).write_be(&mut c).expect("write");
        let bytes = c.into_inner();
        assert_eq!(bytes, vec![0, 0, 0, 5, 1, 2, 3, 4, 5, 0, 0, 0]);

        let mut c = std::io::Cursor::new(&bytes);
        let back = XdrOpaque::read_be(&mut c).expect("read");
        assert_eq!(back.0, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_request_round_trip() {
        let request = sample_request();
        let packet = request_packet(0x5eed, 0x0badcafc, 1, &request).expect("packet");

        let mut c = std::io::Cursor::new(&packet[RX_HEADER_LEN..]);
        let back = GetTicketRequest::read_be(&mut c).expect("parse request body");
        assert_eq!(back, request);
    }

    #[test]
    fn test_reply_round_trip() {
        let request = sample_request();
        let packet = request_packet(0x5eed, 0x0badcafc, 1, &request).expect("packet");
        let mut c = std::io::Cursor::new(&packet[..]);
        let header = RxHeader::read(&mut c).expect("parse header");

        let reply = GetTicketReply {
            code: 0,
            kvno: 3,
            ticket: XdrOpaque(vec![0x7f; 56]),
            start: 1_700_000_000,
            end: 1_700_036_000,
        };
        let wire = reply_packet(&header, &reply);
        let back = parse_reply(&wire, 0x0badcafc).expect("parse reply");
        assert_eq!(back, reply);
    }

    #[test]
    fn test_abort_maps_to_error() {
        let request = sample_request();
        let packet = request_packet(0x5eed, 0x0badcafc, 1, &request).expect("packet");
        let mut c = std::io::Cursor::new(&packet[..]);
        let header = RxHeader::read(&mut c).expect("parse header");

        let wire = abort_packet(&header, 180_501);
        assert!(matches!(
            parse_reply(&wire, 0x0badcafc),
            Err(KafsError::RxAbort(180_501))
        ));
    }

    #[test]
    fn test_foreign_connection_rejected() {
        let request = sample_request();
        let packet = request_packet(0x5eed, 0x0badcafc, 1, &request).expect("packet");
        let mut c = std::io::Cursor::new(&packet[..]);
        let header = RxHeader::read(&mut c).expect("parse header");

        let reply = GetTicketReply {
            code: 0,
            kvno: 3,
            ticket: XdrOpaque(Vec::new()),
            start: 0,
            end: 0,
        };
        let wire = reply_packet(&header, &reply);
        assert!(matches!(
            parse_reply(&wire, 0x12345678),
            Err(KafsError::RxBadPacket)
        ));
    }

    #[test]
    fn test_truncated_packet_rejected() {
        assert!(matches!(
            parse_reply(&[0x00, 0x01, 0x02], 0),
            Err(KafsError::RxBadPacket)
        ));
    }
}
