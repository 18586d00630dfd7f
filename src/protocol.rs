/* rigoltmc (c) by Nao Pross <np@0hm.ch>
 *
 *
 * rigoltmc is licensed under a
 * Creative Commons Attribution-ShareAlike 4.0 International License.
 *
 * You should have received a copy of the license along with this
 * work. If not, see <http://creativecommons.org/licenses/by-sa/4.0/>.
 */

//! USBTMC message framing, independent of the USB backend

use crate::Error;

pub const USBTMC_BINTERFACE_CLASS: u8 = 0xfe;
pub const USBTMC_BINTERFACE_SUBCLASS: u8 = 3;
pub const USBTMC_BINTERFACE_PROTOCOL: u8 = 0;
pub const USB488_BINTERFACE_PROTOCOL: u8 = 1;

/// Size of the bulk header that precedes every transfer
pub const HEADER_SIZE: usize = 12;
/// Largest payload sent or requested in a single transfer
pub const TRANSFER_SIZE: usize = 1024 * 1024;

/// bmTransferAttributes: last transfer of the message
const ATTR_EOM: u8 = 0x01;
/// bmTransferAttributes (IN request): stop on TermChar
const ATTR_TERM_CHAR: u8 = 0x02;

/* control values */

/// USBTMC bRequest Values
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestType {
    InitiateAbortBulkOut = 1,
    CheckAbortBulkOutStatus = 2,
    InitiateAbortBulkIn = 3,
    CheckAbortBulkInStatus = 4,
    InitiateClear = 5,
    CheckClearStatus = 6,
    GetCapabilities = 7,
    IndicatorPulse = 64,
}

/// USBTMC Status values
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success = 0x01,
    Pending = 0x02,
    Failed = 0x80,
    TransferNotInProgress = 0x81,
    SplitNotInProgress = 0x82,
    SplitInProgress = 0x83,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Status> {
        match byte {
            0x01 => Some(Status::Success),
            0x02 => Some(Status::Pending),
            0x80 => Some(Status::Failed),
            0x81 => Some(Status::TransferNotInProgress),
            0x82 => Some(Status::SplitNotInProgress),
            0x83 => Some(Status::SplitInProgress),
            _ => None,
        }
    }
}

/* bulk values */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgId {
    DeviceDependent,
    VendorSpecific,
}

impl MsgId {
    /// MsgID byte, table 2 of the USBTMC specification
    pub fn number(self, direction: Direction) -> u8 {
        match self {
            MsgId::DeviceDependent => match direction {
                Direction::Out => 1,
                Direction::In => 2,
            },
            MsgId::VendorSpecific => match direction {
                Direction::Out => 126,
                Direction::In => 127,
            },
        }
    }
}

/// Transfer attributes of a bulk header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    /// OUT: this transfer ends the message
    pub end_of_message: bool,
    /// IN request: the device may end the transfer on this byte
    pub term_char: Option<u8>,
}

/// helper function to create bulk headers
pub fn make_bulk_header(
    msgid: MsgId,
    direction: Direction,
    btag: u8,
    transfer_size: u32,
    attributes: Attributes,
) -> [u8; HEADER_SIZE] {
    let mut attr = 0;
    if attributes.end_of_message {
        attr |= ATTR_EOM;
    }
    if attributes.term_char.is_some() {
        attr |= ATTR_TERM_CHAR;
    }

    let ts_bytes = transfer_size.to_le_bytes();
    [
        // table 1 of the USBTMC specification
        msgid.number(direction),
        btag,
        !btag,
        0x00,
        // size of the transfer, without header
        ts_bytes[0],
        ts_bytes[1],
        ts_bytes[2],
        ts_bytes[3],
        attr,
        attributes.term_char.unwrap_or(0),
        // reserved, must be zeroes
        0x00,
        0x00,
    ]
}

/// Decoded header of a DEV_DEP_MSG_IN transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkInHeader {
    pub btag: u8,
    pub transfer_size: u32,
    pub end_of_message: bool,
}

pub fn parse_bulk_in_header(buf: &[u8], expected_btag: u8) -> Result<BulkInHeader, Error> {
    if buf.len() < HEADER_SIZE {
        return Err(Error::InvalidResponse(format!(
            "bulk-in header too short ({} bytes)",
            buf.len()
        )));
    }

    if buf[0] != MsgId::DeviceDependent.number(Direction::In) {
        return Err(Error::InvalidResponse(format!(
            "unexpected MsgID {}",
            buf[0]
        )));
    }

    if buf[1] != expected_btag || buf[2] != !expected_btag {
        return Err(Error::InvalidResponse(format!(
            "bTag mismatch: expected {}, got {} (inverse {})",
            expected_btag, buf[1], buf[2]
        )));
    }

    Ok(BulkInHeader {
        btag: buf[1],
        transfer_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        end_of_message: (buf[8] & ATTR_EOM) != 0,
    })
}

/// bTag of the next transfer, 0 is not a valid value
pub fn next_btag(btag: u8) -> u8 {
    match btag.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}

/// Bulk-OUT payloads are aligned to 4 bytes
pub fn padded_len(len: usize) -> usize {
    len + (4 - (len % 4)) % 4
}

/// One DEV_DEP_MSG_OUT transfer, header and padded payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkOutPacket {
    pub btag: u8,
    /// Message bytes carried, without padding
    pub payload_len: usize,
    pub bytes: Vec<u8>,
}

/// Split a message into bulk-out transfers of at most `TRANSFER_SIZE` bytes
///
/// The first transfer uses `first_btag`, the following ones count up with [`next_btag`].
/// Only the last transfer has EOM set. An empty message is still sent as one empty transfer.
pub fn bulk_out_packets(message: &[u8], first_btag: u8) -> Vec<BulkOutPacket> {
    let chunks: Vec<&[u8]> = if message.is_empty() {
        vec![message]
    } else {
        message.chunks(TRANSFER_SIZE).collect()
    };

    let last = chunks.len() - 1;
    let mut btag = first_btag;
    let mut packets = Vec::with_capacity(chunks.len());

    for (n, chunk) in chunks.into_iter().enumerate() {
        let header = make_bulk_header(
            MsgId::DeviceDependent,
            Direction::Out,
            btag,
            chunk.len() as u32,
            Attributes {
                end_of_message: n == last,
                term_char: None,
            },
        );

        let mut bytes = Vec::with_capacity(HEADER_SIZE + padded_len(chunk.len()));
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(chunk);
        bytes.resize(HEADER_SIZE + padded_len(chunk.len()), 0);

        packets.push(BulkOutPacket {
            btag,
            payload_len: chunk.len(),
            bytes,
        });
        btag = next_btag(btag);
    }

    packets
}

/// Payload of one DEV_DEP_MSG_IN transfer, collected over several bulk reads
#[derive(Clone, Debug)]
pub struct BulkInTransfer {
    header: BulkInHeader,
    payload: Vec<u8>,
}

impl BulkInTransfer {
    /// Start from the first read, which begins with the bulk-in header
    pub fn start(first: &[u8], expected_btag: u8) -> Result<BulkInTransfer, Error> {
        let header = parse_bulk_in_header(first, expected_btag)?;
        let mut transfer = BulkInTransfer {
            header,
            payload: Vec::with_capacity(header.transfer_size as usize),
        };
        transfer.extend(&first[HEADER_SIZE..]);
        Ok(transfer)
    }

    /// Append the bytes of a following read
    pub fn extend(&mut self, data: &[u8]) {
        self.payload.extend_from_slice(data);
    }

    pub fn is_complete(&self) -> bool {
        self.payload.len() >= self.expected()
    }

    pub fn received(&self) -> usize {
        self.payload.len()
    }

    /// TransferSize announced in the header
    pub fn expected(&self) -> usize {
        self.header.transfer_size as usize
    }

    pub fn end_of_message(&self) -> bool {
        self.header.end_of_message
    }

    /// The message bytes, alignment bytes dropped
    pub fn into_payload(mut self) -> Vec<u8> {
        let size = self.expected();
        self.payload.truncate(size);
        self.payload
    }
}

/// Capabilities of the USBTMC Devices
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// version number (in BCD)
    pub bcd_usbtmc: u16,
    /// The device has an indicator for identification purposes
    pub pulse: bool,
    /// The interface is talk-only if it is not capable of processing any Bulk-OUT USBTMC
    /// device dependent message data bytes.
    pub talk_only: bool,
    /// The interface is listen-only if it is not capable of sending Bulk-IN USBTMC device dependent
    /// message data bytes
    pub listen_only: bool,
    /// The device supports ending a Bulk-IN transfer from this USBTMC interface when a
    /// byte matches a specified TermChar.
    pub term_char: bool,
    /// USB488 interface capabilities, zero on plain USBTMC devices
    pub usb488_interface: u8,
    /// USB488 device capabilities (SCPI, SR1, RL1, DT1)
    pub usb488_device: u8,
}

impl Capabilities {
    /// Decode the 0x18 bytes returned by GET_CAPABILITIES
    pub fn from_response(buf: &[u8]) -> Result<Capabilities, Error> {
        if buf.len() < 0x18 {
            return Err(Error::InvalidResponse(format!(
                "capabilities response too short ({} bytes)",
                buf.len()
            )));
        }
        if buf[0] != Status::Success as u8 {
            return Err(Error::Request);
        }

        Ok(Capabilities {
            bcd_usbtmc: u16::from_le_bytes([buf[2], buf[3]]),
            pulse: (buf[4] & 4) != 0,
            talk_only: (buf[4] & 2) != 0,
            listen_only: (buf[4] & 1) != 0,
            term_char: (buf[5] & 1) != 0,
            usb488_interface: buf[14],
            usb488_device: buf[15],
        })
    }

    /// Whether the device claims to understand SCPI
    pub fn scpi(&self) -> bool {
        (self.usb488_device & 0x08) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_header_layout() {
        let header = make_bulk_header(
            MsgId::DeviceDependent,
            Direction::Out,
            7,
            0x0102_0304,
            Attributes {
                end_of_message: true,
                term_char: None,
            },
        );
        assert_eq!(
            header,
            [1, 7, 0xf8, 0, 0x04, 0x03, 0x02, 0x01, 0x01, 0, 0, 0]
        );
    }

    #[test]
    fn in_request_carries_term_char() {
        let header = make_bulk_header(
            MsgId::DeviceDependent,
            Direction::In,
            1,
            1024,
            Attributes {
                end_of_message: false,
                term_char: Some(b'\n'),
            },
        );
        assert_eq!(header[0], 2);
        assert_eq!(header[8], ATTR_TERM_CHAR);
        assert_eq!(header[9], b'\n');
    }

    #[test]
    fn vendor_specific_ids() {
        assert_eq!(MsgId::VendorSpecific.number(Direction::Out), 126);
        assert_eq!(MsgId::VendorSpecific.number(Direction::In), 127);
    }

    #[test]
    fn parses_in_header() {
        let buf = [2, 9, !9u8, 0, 5, 0, 0, 0, 1, 0, 0, 0, b'h', b'i'];
        let header = parse_bulk_in_header(&buf, 9).unwrap();
        assert_eq!(header.transfer_size, 5);
        assert!(header.end_of_message);
    }

    #[test]
    fn rejects_wrong_btag() {
        let buf = [2, 3, !3u8, 0, 5, 0, 0, 0, 1, 0, 0, 0];
        assert!(parse_bulk_in_header(&buf, 4).is_err());
    }

    #[test]
    fn rejects_short_header() {
        assert!(parse_bulk_in_header(&[2, 1, 0xfe], 1).is_err());
    }

    #[test]
    fn btag_skips_zero() {
        assert_eq!(next_btag(1), 2);
        assert_eq!(next_btag(254), 255);
        assert_eq!(next_btag(255), 1);
    }

    #[test]
    fn padding() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(5), 8);
        assert_eq!(padded_len(8), 8);
        assert_eq!(padded_len(6), 8);
    }

    #[test]
    fn empty_message_is_one_transfer() {
        let packets = bulk_out_packets(b"", 1);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload_len, 0);
        assert_eq!(packets[0].bytes, vec![1, 1, 0xfe, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn short_message_is_padded() {
        let packets = bulk_out_packets(b"*IDN?\n", 4);
        assert_eq!(packets.len(), 1);

        let p = &packets[0];
        assert_eq!(p.btag, 4);
        assert_eq!(p.payload_len, 6);
        assert_eq!(p.bytes.len(), HEADER_SIZE + 8);
        assert_eq!(&p.bytes[4..8], &[6, 0, 0, 0]);
        assert_eq!(p.bytes[8], ATTR_EOM);
        assert_eq!(&p.bytes[HEADER_SIZE..HEADER_SIZE + 6], b"*IDN?\n");
        assert_eq!(&p.bytes[HEADER_SIZE + 6..], &[0, 0]);
    }

    #[test]
    fn full_transfer_is_not_split() {
        let message = vec![0x55u8; TRANSFER_SIZE];
        let packets = bulk_out_packets(&message, 9);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload_len, TRANSFER_SIZE);
        assert_eq!(packets[0].bytes.len(), HEADER_SIZE + TRANSFER_SIZE);
        assert_eq!(packets[0].bytes[8], ATTR_EOM);
    }

    #[test]
    fn long_message_is_split() {
        let message = vec![0x55u8; TRANSFER_SIZE + 1];
        let packets = bulk_out_packets(&message, 255);
        assert_eq!(packets.len(), 2);

        assert_eq!(packets[0].btag, 255);
        assert_eq!(packets[0].payload_len, TRANSFER_SIZE);
        assert_eq!(packets[0].bytes[8], 0);

        assert_eq!(packets[1].btag, 1);
        assert_eq!(packets[1].payload_len, 1);
        assert_eq!(&packets[1].bytes[1..3], &[1, 0xfe]);
        assert_eq!(&packets[1].bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(packets[1].bytes[8], ATTR_EOM);
        assert_eq!(packets[1].bytes.len(), HEADER_SIZE + 4);
    }

    #[test]
    fn in_payload_over_several_reads() {
        let mut first = vec![2, 6, !6u8, 0, 5, 0, 0, 0, 1, 0, 0, 0];
        first.extend_from_slice(b"1.2");

        let mut transfer = BulkInTransfer::start(&first, 6).unwrap();
        assert!(!transfer.is_complete());
        assert_eq!(transfer.received(), 3);
        assert_eq!(transfer.expected(), 5);

        // rest of the payload and three alignment bytes
        transfer.extend(b"5\n\0\0\0");
        assert!(transfer.is_complete());
        assert!(transfer.end_of_message());
        assert_eq!(transfer.into_payload(), b"1.25\n".to_vec());
    }

    #[test]
    fn in_payload_without_eom() {
        let buf = [2, 3, !3u8, 0, 2, 0, 0, 0, 0, 0, 0, 0, b'o', b'k', 0, 0];
        let transfer = BulkInTransfer::start(&buf, 3).unwrap();
        assert!(transfer.is_complete());
        assert!(!transfer.end_of_message());
        assert_eq!(transfer.into_payload(), b"ok".to_vec());
    }

    #[test]
    fn capabilities() {
        let mut buf = [0u8; 0x18];
        buf[0] = Status::Success as u8;
        buf[2] = 0x00;
        buf[3] = 0x01;
        buf[4] = 0b100;
        buf[5] = 1;
        buf[15] = 0x08;
        let caps = Capabilities::from_response(&buf).unwrap();
        assert_eq!(caps.bcd_usbtmc, 0x0100);
        assert!(caps.pulse);
        assert!(!caps.talk_only);
        assert!(caps.term_char);
        assert!(caps.scpi());

        buf[0] = Status::Failed as u8;
        assert!(matches!(
            Capabilities::from_response(&buf),
            Err(Error::Request)
        ));
    }
}
