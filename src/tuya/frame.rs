use crate::error::{ChargeSyncError, Result};
use crc::{CRC_32_ISO_HDLC, Crc};

const FRAME_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const PREFIX: u32 = 0x0000_55AA;
pub const SUFFIX: u32 = 0x0000_AA55;

pub const CMD_CONTROL: u32 = 0x07;
pub const CMD_STATUS: u32 = 0x08;
pub const CMD_HEART_BEAT: u32 = 0x09;
pub const CMD_DP_QUERY: u32 = 0x0A;

/// Prefix, sequence, command, length
pub const HEADER_LEN: usize = 16;
/// CRC, suffix
const TRAILER_LEN: usize = 8;
const MAX_BODY_LEN: usize = 4096;

/// Version header placed before encrypted CONTROL payloads
pub const VERSION_33: &[u8; 3] = b"3.3";
pub const VERSION_HEADER_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuyaMessage {
    pub sequence: u32,
    pub command: u32,
    /// Present on device replies
    pub return_code: Option<u32>,
    pub payload: Vec<u8>,
}

/// Frame a request payload
pub fn encode(sequence: u32, command: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.extend_from_slice(&PREFIX.to_be_bytes());
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&command.to_be_bytes());
    frame.extend_from_slice(&((payload.len() + TRAILER_LEN) as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    let crc = FRAME_CRC.checksum(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&SUFFIX.to_be_bytes());
    frame
}

/// Number of bytes following the header, as announced by it
pub fn body_len(header: &[u8]) -> Result<usize> {
    if header.len() < HEADER_LEN {
        return Err(ChargeSyncError::frame("Tuya header too short"));
    }
    let prefix = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if prefix != PREFIX {
        return Err(ChargeSyncError::frame(format!(
            "Bad Tuya prefix {:#010x}",
            prefix
        )));
    }
    let len = u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as usize;
    if !(TRAILER_LEN..=MAX_BODY_LEN).contains(&len) {
        return Err(ChargeSyncError::frame(format!(
            "Tuya frame length {} out of range",
            len
        )));
    }
    Ok(len)
}

/// Decode one complete frame
pub fn decode(bytes: &[u8]) -> Result<TuyaMessage> {
    let len = body_len(bytes)?;
    let total = HEADER_LEN + len;
    if bytes.len() != total {
        return Err(ChargeSyncError::frame(format!(
            "Tuya frame has {} bytes, header announces {}",
            bytes.len(),
            total
        )));
    }

    let suffix = u32::from_be_bytes([
        bytes[total - 4],
        bytes[total - 3],
        bytes[total - 2],
        bytes[total - 1],
    ]);
    if suffix != SUFFIX {
        return Err(ChargeSyncError::frame(format!(
            "Bad Tuya suffix {:#010x}",
            suffix
        )));
    }

    let crc_at = total - TRAILER_LEN;
    let expected = u32::from_be_bytes([
        bytes[crc_at],
        bytes[crc_at + 1],
        bytes[crc_at + 2],
        bytes[crc_at + 3],
    ]);
    let actual = FRAME_CRC.checksum(&bytes[..crc_at]);
    if expected != actual {
        return Err(ChargeSyncError::frame(format!(
            "Tuya CRC mismatch: expected {:#010x}, computed {:#010x}",
            expected, actual
        )));
    }

    let sequence = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let command = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let mut body = &bytes[HEADER_LEN..crc_at];

    // Device replies lead with a small return code; payloads never start with three zero bytes
    let mut return_code = None;
    if body.len() >= 4 && body[..3] == [0, 0, 0] {
        return_code = Some(u32::from_be_bytes([body[0], body[1], body[2], body[3]]));
        body = &body[4..];
    }

    Ok(TuyaMessage {
        sequence,
        command,
        return_code,
        payload: body.to_vec(),
    })
}

/// `"3.3"` followed by twelve zero bytes
pub fn version_header() -> [u8; VERSION_HEADER_LEN] {
    let mut header = [0u8; VERSION_HEADER_LEN];
    header[..3].copy_from_slice(VERSION_33);
    header
}

/// Drop a leading version header, if any
pub fn strip_version_header(payload: &[u8]) -> &[u8] {
    if payload.starts_with(VERSION_33) && payload.len() >= VERSION_HEADER_LEN {
        &payload[VERSION_HEADER_LEN..]
    } else {
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(sequence: u32, command: u32, code: u32, payload: &[u8]) -> Vec<u8> {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(payload);
        encode(sequence, command, &body)
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode(1, CMD_DP_QUERY, &[0xAB; 16]);
        assert_eq!(&frame[..4], &[0x00, 0x00, 0x55, 0xAA]);
        assert_eq!(&frame[4..8], &[0, 0, 0, 1]);
        assert_eq!(&frame[8..12], &[0, 0, 0, 0x0A]);
        assert_eq!(&frame[12..16], &[0, 0, 0, 24]);
        assert_eq!(&frame[frame.len() - 4..], &[0x00, 0x00, 0xAA, 0x55]);
        assert_eq!(frame.len(), 16 + 16 + 8);
    }

    #[test]
    fn test_decode_reply_with_return_code() {
        let frame = reply(9, CMD_CONTROL, 0, b"3.3payload");
        let msg = decode(&frame).unwrap();
        assert_eq!(msg.sequence, 9);
        assert_eq!(msg.command, CMD_CONTROL);
        assert_eq!(msg.return_code, Some(0));
        assert_eq!(msg.payload, b"3.3payload".to_vec());
    }

    #[test]
    fn test_decode_nonzero_return_code() {
        let msg = decode(&reply(2, CMD_CONTROL, 1, &[])).unwrap();
        assert_eq!(msg.return_code, Some(1));
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let mut frame = reply(2, CMD_DP_QUERY, 0, b"abc");
        frame[HEADER_LEN + 4] ^= 0x01;
        let err = decode(&frame).unwrap_err();
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_decode_rejects_bad_prefix_and_length() {
        let mut frame = reply(2, CMD_DP_QUERY, 0, b"abc");
        frame[2] = 0x00;
        assert!(decode(&frame).is_err());

        let frame = reply(2, CMD_DP_QUERY, 0, b"abc");
        assert!(decode(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn test_version_header() {
        let header = version_header();
        assert_eq!(&header[..3], b"3.3");
        assert!(header[3..].iter().all(|b| *b == 0));

        let mut payload = header.to_vec();
        payload.extend_from_slice(b"cipher");
        assert_eq!(strip_version_header(&payload), b"cipher");
        assert_eq!(strip_version_header(b"cipher"), b"cipher");
    }
}
