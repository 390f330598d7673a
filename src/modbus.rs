//! Modbus helpers and the Modbus TCP telemetry transport
//!
//! The RTU helpers build and check the frames that the Solarman logger
//! tunnels to the inverter. [`ModbusTcpTransport`] reaches inverters that sit
//! behind a plain Modbus TCP gateway instead.

use crate::error::{ChargeSyncError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::telemetry::TelemetryTransport;
use crc::{CRC_16_MODBUS, Crc};
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Function code for "read holding registers"
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

/// CRC-16/MODBUS of `data`
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Build an RTU "read holding registers" request with trailing CRC
pub fn build_read_holding_request(slave_id: u8, start: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(slave_id);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Decode an RTU "read holding registers" response into register words
pub fn parse_read_holding_response(frame: &[u8], slave_id: u8, count: u16) -> Result<Vec<u16>> {
    if frame.len() < 5 {
        return Err(ChargeSyncError::frame(format!(
            "RTU response too short ({} bytes)",
            frame.len()
        )));
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let expected = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let actual = crc16(body);
    if expected != actual {
        return Err(ChargeSyncError::frame(format!(
            "RTU CRC mismatch: expected {:#06x}, computed {:#06x}",
            expected, actual
        )));
    }

    if body[0] != slave_id {
        return Err(ChargeSyncError::frame(format!(
            "RTU response from slave {} (expected {})",
            body[0], slave_id
        )));
    }

    let function = body[1];
    if function == READ_HOLDING_REGISTERS | 0x80 {
        return Err(ChargeSyncError::frame(format!(
            "Modbus exception: {}",
            exception_name(body[2])
        )));
    }
    if function != READ_HOLDING_REGISTERS {
        return Err(ChargeSyncError::frame(format!(
            "Unexpected function code {:#04x}",
            function
        )));
    }

    let byte_count = body[2] as usize;
    let data = &body[3..];
    if byte_count != data.len() || byte_count != count as usize * 2 {
        return Err(ChargeSyncError::frame(format!(
            "RTU byte count {} does not match {} registers ({} data bytes)",
            byte_count,
            count,
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Human readable name of a Modbus exception code
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

/// Two's-complement view of a register word
pub fn as_signed16(word: u16) -> i16 {
    word as i16
}

/// Telemetry over a Modbus TCP gateway
pub struct ModbusTcpTransport {
    /// Modbus TCP client connection
    client: Option<tokio_modbus::client::Context>,

    ip: String,
    port: u16,
    slave_id: u8,

    /// Per-call timeout for connect and reads
    operation_timeout: Duration,

    logger: StructuredLogger,
}

impl ModbusTcpTransport {
    pub fn new(ip: &str, port: u16, slave_id: u8, operation_timeout: Duration) -> Self {
        Self {
            client: None,
            ip: ip.to_string(),
            port,
            slave_id,
            operation_timeout,
            logger: get_logger("modbus"),
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn get_client(&mut self) -> Result<&mut tokio_modbus::client::Context> {
        self.client
            .as_mut()
            .ok_or_else(|| ChargeSyncError::connection_lost("Not connected to Modbus gateway"))
    }
}

#[async_trait::async_trait]
impl TelemetryTransport for ModbusTcpTransport {
    async fn connect(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.ip, self.port);
        self.logger
            .info(&format!("Connecting to Modbus gateway at {}", address));

        let socket_addr: std::net::SocketAddr = address
            .parse()
            .map_err(|e| ChargeSyncError::config(format!("Invalid socket address: {}", e)))?;

        match timeout(
            self.operation_timeout,
            tcp::connect_slave(socket_addr, Slave(self.slave_id)),
        )
        .await
        {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Connected to Modbus gateway");
                Ok(())
            }
            Ok(Err(e)) => Err(ChargeSyncError::connection_lost(format!(
                "Failed to connect to Modbus gateway: {}",
                e
            ))),
            Err(_) => Err(ChargeSyncError::connection_lost(
                "Modbus gateway connection timeout",
            )),
        }
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let timeout_duration = self.operation_timeout;
        self.logger.debug(&format!(
            "Reading {} registers from address {} on slave {}",
            count, start, self.slave_id
        ));

        let client = self.get_client()?;
        let outcome = timeout(timeout_duration, client.read_holding_registers(start, count)).await;

        match outcome {
            Ok(Ok(Ok(words))) => {
                self.logger.trace(&format!("Read registers: {:?}", words));
                Ok(words)
            }
            Ok(Ok(Err(exception))) => Err(ChargeSyncError::frame(format!(
                "Modbus exception: {}",
                exception
            ))),
            Ok(Err(e)) => {
                self.client = None;
                Err(ChargeSyncError::connection_lost(format!(
                    "Modbus read failed: {}",
                    e
                )))
            }
            Err(_) => {
                self.client = None;
                Err(ChargeSyncError::connection_lost("Modbus read timeout"))
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.client.take().is_some() {
            // Dropping the context closes the socket
            self.logger.info("Disconnecting from Modbus gateway");
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("modbus-tcp://{}:{}/{}", self.ip, self.port, self.slave_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_vector() {
        // Read 2 registers at 0x0000 from slave 1
        let frame = build_read_holding_request(1, 0x0000, 2);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn test_build_request_layout() {
        let frame = build_read_holding_request(1, 169, 22);
        assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0xA9, 0x00, 0x16]);
        assert_eq!(frame.len(), 8);
    }

    fn response(slave: u8, words: &[u16]) -> Vec<u8> {
        let mut frame = vec![slave, READ_HOLDING_REGISTERS, (words.len() * 2) as u8];
        for w in words {
            frame.extend_from_slice(&w.to_be_bytes());
        }
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn test_parse_response() {
        let frame = response(1, &[0xFF38, 0x005F]);
        let words = parse_read_holding_response(&frame, 1, 2).unwrap();
        assert_eq!(words, vec![0xFF38, 0x005F]);
    }

    #[test]
    fn test_parse_rejects_bad_crc() {
        let mut frame = response(1, &[1, 2]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = parse_read_holding_response(&frame, 1, 2).unwrap_err();
        assert!(err.to_string().contains("CRC"));
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn test_parse_rejects_wrong_count() {
        let frame = response(1, &[1, 2, 3]);
        assert!(parse_read_holding_response(&frame, 1, 2).is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_slave() {
        let frame = response(2, &[1, 2]);
        assert!(parse_read_holding_response(&frame, 1, 2).is_err());
    }

    #[test]
    fn test_parse_exception() {
        let mut frame = vec![1, 0x83, 0x02];
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        let err = parse_read_holding_response(&frame, 1, 2).unwrap_err();
        assert!(err.to_string().contains("illegal data address"));
    }

    #[test]
    fn test_as_signed16() {
        assert_eq!(as_signed16(0x0000), 0);
        assert_eq!(as_signed16(0x7FFF), 32767);
        assert_eq!(as_signed16(0x8000), -32768);
        assert_eq!(as_signed16(0xFF38), -200);
    }

    #[test]
    fn test_modbus_transport_creation() {
        let transport = ModbusTcpTransport::new("127.0.0.1", 502, 1, Duration::from_secs(1));
        assert!(!transport.is_connected());
        assert_eq!(transport.endpoint(), "modbus-tcp://127.0.0.1:502/1");
    }

    #[tokio::test]
    async fn test_read_without_connection_is_connection_lost() {
        let mut transport = ModbusTcpTransport::new("127.0.0.1", 502, 1, Duration::from_secs(1));
        let err = transport.read_holding_registers(0, 1).await.unwrap_err();
        assert!(err.is_connection_lost());
    }
}
