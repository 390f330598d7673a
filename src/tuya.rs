//! Tuya local protocol 3.3 device transport
//!
//! Every operation opens a short-lived TCP connection to the charger, sends
//! one encrypted request and waits for the matching reply.

use crate::charger::DeviceTransport;
use crate::error::{ChargeSyncError, Result};
use crate::logging::{StructuredLogger, get_logger};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub mod cipher;
pub mod frame;

use cipher::TuyaCipher;
use frame::{CMD_CONTROL, CMD_DP_QUERY, TuyaMessage};

/// Unrelated frames (heartbeats, status pushes) tolerated before the reply
const MAX_SKIPPED_FRAMES: usize = 4;

/// Charger reached over the Tuya local protocol
pub struct TuyaTransport {
    ip: String,
    port: u16,
    device_id: String,
    cipher: TuyaCipher,
    timeout: Duration,
    sequence: u32,
    logger: StructuredLogger,
}

impl TuyaTransport {
    pub fn new(
        ip: &str,
        port: u16,
        device_id: &str,
        local_key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            ip: ip.to_string(),
            port,
            device_id: device_id.to_string(),
            cipher: TuyaCipher::new(local_key.as_bytes())?,
            timeout,
            sequence: 0,
            logger: get_logger("tuya"),
        })
    }

    /// Current per-operation timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request_body(&self) -> serde_json::Map<String, Value> {
        let mut body = serde_json::Map::new();
        body.insert("gwId".into(), json!(self.device_id));
        body.insert("devId".into(), json!(self.device_id));
        body.insert("uid".into(), json!(self.device_id));
        body.insert("t".into(), json!(chrono::Utc::now().timestamp().to_string()));
        body
    }

    /// Encrypted payload for `command`
    pub fn encode_payload(&self, command: u32, body: &Value) -> Result<Vec<u8>> {
        let plain = serde_json::to_vec(body)?;
        let encrypted = self.cipher.encrypt(&plain);
        if command == CMD_DP_QUERY {
            return Ok(encrypted);
        }
        let mut payload = frame::version_header().to_vec();
        payload.extend_from_slice(&encrypted);
        Ok(payload)
    }

    /// Plain JSON carried by a reply, `None` when the reply is empty
    pub fn decode_payload(&self, message: &TuyaMessage) -> Result<Option<Value>> {
        let data = frame::strip_version_header(&message.payload);
        if data.is_empty() {
            return Ok(None);
        }
        let plain = self.cipher.decrypt(data)?;
        let value = serde_json::from_slice(&plain)?;
        Ok(Some(value))
    }

    async fn exchange(&mut self, command: u32, payload: Vec<u8>) -> Result<TuyaMessage> {
        self.sequence = self.sequence.wrapping_add(1);
        let request = frame::encode(self.sequence, command, &payload);
        let address = (self.ip.as_str(), self.port);
        let op_timeout = self.timeout;

        let round_trip = async {
            let mut stream = TcpStream::connect(address).await.map_err(|e| {
                ChargeSyncError::connection_lost(format!("Failed to connect to charger: {}", e))
            })?;
            stream.write_all(&request).await.map_err(|e| {
                ChargeSyncError::connection_lost(format!("Charger write failed: {}", e))
            })?;

            for _ in 0..MAX_SKIPPED_FRAMES {
                let message = read_message(&mut stream).await?;
                if message.command == command {
                    return Ok(message);
                }
                self.logger.debug(&format!(
                    "Skipping Tuya frame with command {:#04x}",
                    message.command
                ));
            }
            Err::<TuyaMessage, _>(ChargeSyncError::frame(format!(
                "No reply to Tuya command {:#04x}",
                command
            )))
        };

        match timeout(op_timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(ChargeSyncError::connection_lost(format!(
                "Charger did not answer within {:?}",
                op_timeout
            ))),
        }
    }
}

async fn read_message(stream: &mut TcpStream) -> Result<TuyaMessage> {
    let mut header = [0u8; frame::HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| ChargeSyncError::connection_lost(format!("Charger read failed: {}", e)))?;
    let len = frame::body_len(&header)?;

    let mut bytes = header.to_vec();
    bytes.resize(frame::HEADER_LEN + len, 0);
    stream
        .read_exact(&mut bytes[frame::HEADER_LEN..])
        .await
        .map_err(|e| ChargeSyncError::connection_lost(format!("Charger read failed: {}", e)))?;
    frame::decode(&bytes)
}

#[async_trait::async_trait]
impl DeviceTransport for TuyaTransport {
    async fn status(&mut self) -> Result<Value> {
        let body = Value::Object(self.request_body());
        let payload = self.encode_payload(CMD_DP_QUERY, &body)?;
        let reply = self.exchange(CMD_DP_QUERY, payload).await?;

        let decoded = self
            .decode_payload(&reply)
            .map_err(|e| ChargeSyncError::device_status(format!("Undecodable status: {}", e)))?;
        match decoded {
            Some(value) if value.get("dps").is_some_and(Value::is_object) => Ok(value),
            Some(value) => Err(ChargeSyncError::device_status(format!(
                "Status reply without dps: {}",
                value
            ))),
            None => Err(ChargeSyncError::device_status("Empty status reply")),
        }
    }

    async fn set_value(&mut self, point: u32, value: Value) -> Result<bool> {
        let mut dps = serde_json::Map::new();
        dps.insert(point.to_string(), value);
        let dps = Value::Object(dps);
        self.logger
            .debug(&format!("Setting point {} with dps {}", point, dps));

        let mut body = self.request_body();
        body.remove("gwId");
        body.insert("dps".into(), dps);
        let payload = self.encode_payload(CMD_CONTROL, &Value::Object(body))?;
        let reply = self.exchange(CMD_CONTROL, payload).await?;

        let code = reply.return_code.unwrap_or(0);
        if code != 0 {
            self.logger.warn(&format!(
                "Charger rejected write to point {} (return code {})",
                point, code
            ));
        }
        Ok(code == 0)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
