//! Solarman V5 data logger transport
//!
//! The logger wraps Modbus RTU frames in its own V5 envelope and forwards
//! them to the inverter over its serial port. Frame layout (little-endian):
//!
//! ```text
//! A5 | len u16 | control u16 | seq u16 | serial u32 | payload | checksum | 15
//! ```

use crate::error::{ChargeSyncError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::{build_read_holding_request, parse_read_holding_response};
use crate::telemetry::TelemetryTransport;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const START_BYTE: u8 = 0xA5;
pub const END_BYTE: u8 = 0x15;
pub const CONTROL_REQUEST: u16 = 0x4510;
pub const CONTROL_RESPONSE: u16 = 0x1510;

/// Bytes before the payload: start, length, control, sequence, serial
pub const HEADER_LEN: usize = 11;
/// Bytes after the payload: checksum, end
pub const TRAILER_LEN: usize = 2;
/// Request payload prefix: frame type, sensor type, three time fields
const REQUEST_PREFIX_LEN: usize = 15;
/// Response payload prefix: frame type, status, three time fields
pub const RESPONSE_PREFIX_LEN: usize = 14;

const MAX_PAYLOAD_LEN: usize = 1024;
/// Unsolicited or stale frames tolerated while waiting for a reply
const MAX_SKIPPED_FRAMES: usize = 8;

/// A decoded V5 envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V5Frame {
    pub control: u16,
    pub sequence: u16,
    pub serial: u32,
    pub payload: Vec<u8>,
}

impl V5Frame {
    /// Modbus RTU frame carried by a response payload
    pub fn rtu_response(&self) -> Result<&[u8]> {
        if self.control != CONTROL_RESPONSE {
            return Err(ChargeSyncError::frame(format!(
                "Not a data response (control code {:#06x})",
                self.control
            )));
        }
        if self.payload.len() <= RESPONSE_PREFIX_LEN {
            return Err(ChargeSyncError::frame(
                "V5 response carries no Modbus frame",
            ));
        }
        Ok(&self.payload[RESPONSE_PREFIX_LEN..])
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Wrap an RTU request into a V5 request frame
pub fn encode_request(serial: u32, sequence: u16, rtu: &[u8]) -> Vec<u8> {
    let payload_len = REQUEST_PREFIX_LEN + rtu.len();
    let mut frame = Vec::with_capacity(HEADER_LEN + payload_len + TRAILER_LEN);
    frame.push(START_BYTE);
    frame.extend_from_slice(&(payload_len as u16).to_le_bytes());
    frame.extend_from_slice(&CONTROL_REQUEST.to_le_bytes());
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(&serial.to_le_bytes());

    // Frame type 0x02 (inverter), sensor type 0, zeroed time fields
    frame.push(0x02);
    frame.extend_from_slice(&[0u8; 2]);
    frame.extend_from_slice(&[0u8; 12]);
    frame.extend_from_slice(rtu);

    frame.push(checksum(&frame[1..]));
    frame.push(END_BYTE);
    frame
}

/// Payload length announced by a V5 header
pub fn announced_payload_len(header: &[u8]) -> Result<usize> {
    if header.len() < HEADER_LEN {
        return Err(ChargeSyncError::frame("V5 header too short"));
    }
    if header[0] != START_BYTE {
        return Err(ChargeSyncError::frame(format!(
            "Bad V5 start byte {:#04x}",
            header[0]
        )));
    }
    let len = u16::from_le_bytes([header[1], header[2]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(ChargeSyncError::frame(format!(
            "V5 payload length {} out of range",
            len
        )));
    }
    Ok(len)
}

/// Decode and validate one complete V5 frame
pub fn decode_frame(bytes: &[u8]) -> Result<V5Frame> {
    let payload_len = announced_payload_len(bytes)?;
    let total = HEADER_LEN + payload_len + TRAILER_LEN;
    if bytes.len() != total {
        return Err(ChargeSyncError::frame(format!(
            "V5 frame length {} does not match announced {}",
            bytes.len(),
            total
        )));
    }
    if bytes[total - 1] != END_BYTE {
        return Err(ChargeSyncError::frame(format!(
            "Bad V5 end byte {:#04x}",
            bytes[total - 1]
        )));
    }
    let expected = bytes[total - 2];
    let actual = checksum(&bytes[1..total - 2]);
    if expected != actual {
        return Err(ChargeSyncError::frame(format!(
            "V5 checksum mismatch: expected {:#04x}, computed {:#04x}",
            expected, actual
        )));
    }

    Ok(V5Frame {
        control: u16::from_le_bytes([bytes[3], bytes[4]]),
        sequence: u16::from_le_bytes([bytes[5], bytes[6]]),
        serial: u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]),
        payload: bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
    })
}

/// A broken envelope leaves the byte stream misaligned; only a new socket recovers
fn out_of_sync(err: ChargeSyncError) -> ChargeSyncError {
    ChargeSyncError::connection_lost(format!("V5 stream out of sync: {}", err))
}

/// Map a socket error onto the transport error kinds
fn classify_io(context: &str, err: std::io::Error) -> ChargeSyncError {
    match err.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::TimedOut => {
            ChargeSyncError::connection_lost(format!("{}: {}", context, err))
        }
        _ => ChargeSyncError::frame(format!("{}: {}", context, err)),
    }
}

/// Telemetry through a Solarman V5 data logger
pub struct SolarmanTransport {
    stream: Option<TcpStream>,
    ip: String,
    port: u16,
    serial: u32,
    slave_id: u8,
    timeout: Duration,
    sequence: u8,
    logger: StructuredLogger,
}

impl SolarmanTransport {
    pub fn new(ip: &str, port: u16, serial: u32, slave_id: u8, timeout: Duration) -> Self {
        Self {
            stream: None,
            ip: ip.to_string(),
            port,
            serial,
            slave_id,
            timeout,
            sequence: 0,
            logger: get_logger("solarman"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let op_timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ChargeSyncError::connection_lost("Not connected to data logger"))?;
        match timeout(op_timeout, stream.write_all(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(classify_io("V5 write failed", e)),
            Err(_) => Err(ChargeSyncError::connection_lost("V5 write timeout")),
        }
    }

    async fn receive(&mut self) -> Result<V5Frame> {
        let op_timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ChargeSyncError::connection_lost("Not connected to data logger"))?;

        let read = async {
            let mut header = [0u8; HEADER_LEN];
            stream
                .read_exact(&mut header)
                .await
                .map_err(|e| classify_io("V5 read failed", e))?;
            let payload_len = announced_payload_len(&header).map_err(out_of_sync)?;

            let mut frame = header.to_vec();
            frame.resize(HEADER_LEN + payload_len + TRAILER_LEN, 0);
            stream
                .read_exact(&mut frame[HEADER_LEN..])
                .await
                .map_err(|e| classify_io("V5 read failed", e))?;
            decode_frame(&frame).map_err(out_of_sync)
        };

        match timeout(op_timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(ChargeSyncError::connection_lost("V5 read timeout")),
        }
    }

    async fn exchange(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let sequence = self.next_sequence();
        let rtu = build_read_holding_request(self.slave_id, start, count);
        let request = encode_request(self.serial, sequence as u16, &rtu);
        self.logger
            .trace(&format!("V5 request seq={} bytes={:02X?}", sequence, request));
        self.send(&request).await?;

        for _ in 0..MAX_SKIPPED_FRAMES {
            let frame = self.receive().await?;
            if frame.control != CONTROL_RESPONSE {
                self.logger.debug(&format!(
                    "Skipping unsolicited V5 frame (control {:#06x})",
                    frame.control
                ));
                continue;
            }
            // The logger echoes our sequence in the low byte
            let echoed = (frame.sequence & 0x00FF) as u8;
            if echoed != sequence {
                self.logger.debug(&format!(
                    "Discarding stale V5 reply (sequence {}, expected {})",
                    echoed, sequence
                ));
                continue;
            }
            return parse_read_holding_response(frame.rtu_response()?, self.slave_id, count);
        }

        Err(ChargeSyncError::connection_lost(
            "No matching V5 reply among received frames",
        ))
    }
}

#[async_trait::async_trait]
impl TelemetryTransport for SolarmanTransport {
    async fn connect(&mut self) -> Result<()> {
        self.logger.info(&format!(
            "Connecting to data logger {} at {}:{}",
            self.serial, self.ip, self.port
        ));
        match timeout(
            self.timeout,
            TcpStream::connect((self.ip.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => {
                self.stream = Some(stream);
                self.logger.info("Connected to data logger");
                Ok(())
            }
            Ok(Err(e)) => Err(ChargeSyncError::connection_lost(format!(
                "Failed to connect to data logger: {}",
                e
            ))),
            Err(_) => Err(ChargeSyncError::connection_lost(
                "Data logger connection timeout",
            )),
        }
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let result = self.exchange(start, count).await;
        if let Err(e) = &result
            && e.is_connection_lost()
        {
            // A late reply may still arrive on this socket
            self.stream = None;
        }
        result
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            self.logger.info("Disconnecting from data logger");
            stream
                .shutdown()
                .await
                .map_err(|e| ChargeSyncError::io(format!("Data logger shutdown failed: {}", e)))?;
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("solarman://{}@{}:{}", self.serial, self.ip, self.port)
    }
}
