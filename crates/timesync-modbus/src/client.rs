//! Blocking Modbus TCP client.
//!
//! One request is in flight at a time. The connection is opened lazily on
//! the first request and dropped on any I/O or framing failure, so the next
//! request reconnects. Reconnection policy beyond that belongs to the caller.

use crate::frame::{self, FunctionCode, MbapHeader, MAX_FRAME_SIZE};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use timesync_common::{DeviceConfig, SyncError, SyncResult};
use timesync_core::RegisterAccess;
use tracing::{debug, info, trace, warn};

/// Configuration for the Modbus TCP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusTcpConfig {
    /// Server address (IP:port).
    pub server_addr: SocketAddr,
    /// Unit ID, typically 1.
    pub unit_id: u8,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read/write timeout.
    pub io_timeout: Duration,
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 502)),
            unit_id: 1,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(1),
        }
    }
}

impl ModbusTcpConfig {
    /// Build a client configuration from the `[device]` config section,
    /// resolving the address.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the section is invalid or the address
    /// does not resolve.
    pub fn from_device_config(device: &DeviceConfig) -> SyncResult<Self> {
        device.validate()?;
        let server_addr = device
            .address
            .to_socket_addrs()
            .map_err(|e| SyncError::Config(format!("Cannot resolve {}: {e}", device.address)))?
            .next()
            .ok_or_else(|| {
                SyncError::Config(format!("{} resolved to no addresses", device.address))
            })?;

        Ok(Self {
            server_addr,
            unit_id: device.unit_id,
            connect_timeout: device.connect_timeout,
            io_timeout: device.io_timeout,
        })
    }
}

/// Modbus TCP client exposing the register operations of the time protocol.
#[derive(Debug)]
pub struct ModbusTcpClient {
    /// Configuration.
    config: ModbusTcpConfig,
    /// TCP connection (None if disconnected).
    connection: Option<TcpStream>,
    /// Transaction ID counter.
    transaction_id: u16,
    /// Receive buffer.
    rx_buffer: Vec<u8>,
}

impl Default for ModbusTcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusTcpClient {
    /// Create a client with default configuration.
    pub fn new() -> Self {
        Self::with_config(ModbusTcpConfig::default())
    }

    /// Create a client with custom configuration. No connection is made yet.
    pub fn with_config(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            connection: None,
            transaction_id: 0,
            rx_buffer: vec![0u8; MAX_FRAME_SIZE],
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    /// Whether a TCP connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }

    /// Connect to the Modbus server, replacing any open connection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DeviceCommunication`] if the connection cannot be
    /// established or configured.
    pub fn connect(&mut self) -> SyncResult<()> {
        info!(addr = %self.config.server_addr, "Connecting to Modbus TCP server");
        self.connection = None;

        let stream =
            TcpStream::connect_timeout(&self.config.server_addr, self.config.connect_timeout)
                .map_err(|e| SyncError::DeviceCommunication(format!("Connection failed: {e}")))?;

        stream
            .set_read_timeout(Some(self.config.io_timeout))
            .map_err(|e| {
                SyncError::DeviceCommunication(format!("Failed to set read timeout: {e}"))
            })?;

        stream
            .set_write_timeout(Some(self.config.io_timeout))
            .map_err(|e| {
                SyncError::DeviceCommunication(format!("Failed to set write timeout: {e}"))
            })?;

        stream.set_nodelay(true).map_err(|e| {
            SyncError::DeviceCommunication(format!("Failed to set TCP_NODELAY: {e}"))
        })?;

        self.connection = Some(stream);
        info!("Connected to Modbus TCP server");
        Ok(())
    }

    /// Close the connection, if open.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            debug!(addr = %self.config.server_addr, "Disconnected from Modbus TCP server");
        }
    }

    /// Drop the connection and build the error to return.
    fn fail(&mut self, message: String) -> SyncError {
        warn!(error = %message, "Modbus transaction failed, dropping connection");
        self.connection = None;
        SyncError::DeviceCommunication(message)
    }

    /// Send a Modbus request and receive the response PDU.
    fn send_request(&mut self, pdu: &[u8]) -> SyncResult<Vec<u8>> {
        if self.connection.is_none() {
            self.connect()?;
        }

        let pdu_len = u16::try_from(pdu.len())
            .ok()
            .filter(|&n| usize::from(n) <= MAX_FRAME_SIZE - MbapHeader::SIZE)
            .ok_or_else(|| {
                SyncError::DeviceCommunication(format!("Request too large: {} bytes", pdu.len()))
            })?;

        let transaction_id = self.next_transaction_id();
        let header = MbapHeader::new(transaction_id, pdu_len, self.config.unit_id);

        let mut request = Vec::with_capacity(MbapHeader::SIZE + pdu.len());
        request.extend_from_slice(&header.to_bytes());
        request.extend_from_slice(pdu);

        trace!(transaction_id, pdu_len, "Sending Modbus request");

        let sent = match self.connection.as_mut() {
            Some(stream) => stream.write_all(&request),
            None => return Err(self.fail("Connection lost before send".into())),
        };
        if let Err(e) = sent {
            return Err(self.fail(format!("Send failed: {e}")));
        }

        let received = match self.connection.as_mut() {
            Some(stream) => stream.read_exact(&mut self.rx_buffer[..MbapHeader::SIZE]),
            None => return Err(self.fail("Connection lost during send".into())),
        };
        if let Err(e) = received {
            return Err(self.fail(format!("Receive header failed: {e}")));
        }

        let response_header = MbapHeader::from_bytes(&self.rx_buffer[..MbapHeader::SIZE])?;

        if response_header.transaction_id != transaction_id {
            return Err(self.fail(format!(
                "Transaction ID mismatch: expected {transaction_id}, got {}",
                response_header.transaction_id
            )));
        }

        if response_header.protocol_id != 0 {
            return Err(self.fail(format!(
                "Invalid protocol ID: {}",
                response_header.protocol_id
            )));
        }

        if response_header.unit_id != self.config.unit_id {
            return Err(self.fail(format!(
                "Unit ID mismatch: expected {}, got {}",
                self.config.unit_id, response_header.unit_id
            )));
        }

        let pdu_length = match response_header.pdu_length() {
            Ok(n) if (1..=MAX_FRAME_SIZE - MbapHeader::SIZE).contains(&n) => n,
            _ => {
                return Err(self.fail(format!(
                    "Invalid response length: {}",
                    response_header.length
                )))
            }
        };

        let received = match self.connection.as_mut() {
            Some(stream) => stream
                .read_exact(&mut self.rx_buffer[MbapHeader::SIZE..MbapHeader::SIZE + pdu_length]),
            None => return Err(self.fail("Connection lost during receive".into())),
        };
        if let Err(e) = received {
            return Err(self.fail(format!("Receive PDU failed: {e}")));
        }

        let response = &self.rx_buffer[MbapHeader::SIZE..MbapHeader::SIZE + pdu_length];
        if let Some(message) = frame::exception_message(response) {
            debug!(transaction_id, %message, "Modbus exception response");
            return Err(SyncError::DeviceCommunication(message));
        }

        trace!(transaction_id, pdu_len = pdu_length, "Received Modbus response");
        Ok(response.to_vec())
    }

    /// Read holding registers (function 0x03).
    ///
    /// # Errors
    ///
    /// Transport failure, exception response, or malformed response.
    pub fn read_holding_registers(&mut self, address: u16, count: u16) -> SyncResult<Vec<u16>> {
        let pdu = frame::read_holding_registers_request(address, count)?;
        let response = self.send_request(&pdu)?;
        frame::decode_registers(FunctionCode::ReadHoldingRegisters, count, &response)
    }

    /// Write a single register (function 0x06).
    ///
    /// # Errors
    ///
    /// Transport failure, exception response, or a response that does not
    /// echo the request.
    pub fn write_single_register(&mut self, address: u16, value: u16) -> SyncResult<()> {
        let pdu = frame::write_single_register_request(address, value);
        let response = self.send_request(&pdu)?;
        frame::check_write_echo(FunctionCode::WriteSingleRegister, address, value, &response)
    }

    /// Write multiple registers (function 0x10).
    ///
    /// # Errors
    ///
    /// Transport failure, exception response, or a response that does not
    /// echo the request.
    pub fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> SyncResult<()> {
        let pdu = frame::write_multiple_registers_request(address, values)?;
        let response = self.send_request(&pdu)?;
        let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
        frame::check_write_echo(FunctionCode::WriteMultipleRegisters, address, count, &response)
    }

    /// Write then read registers in one transaction (function 0x17).
    ///
    /// # Errors
    ///
    /// Transport failure, exception response, or malformed response.
    pub fn read_write_multiple_registers(
        &mut self,
        read_address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> SyncResult<Vec<u16>> {
        let pdu = frame::read_write_multiple_registers_request(
            read_address,
            read_count,
            write_address,
            values,
        )?;
        let response = self.send_request(&pdu)?;
        frame::decode_registers(
            FunctionCode::ReadWriteMultipleRegisters,
            read_count,
            &response,
        )
    }

    /// Read the exception status byte (function 0x07).
    ///
    /// # Errors
    ///
    /// Transport failure, exception response, or malformed response.
    pub fn read_exception_status(&mut self) -> SyncResult<u8> {
        let response = self.send_request(&frame::read_exception_status_request())?;
        frame::decode_exception_status(&response)
    }
}

impl RegisterAccess for ModbusTcpClient {
    fn read_holding_registers(&mut self, address: u16, count: u16) -> SyncResult<Vec<u16>> {
        ModbusTcpClient::read_holding_registers(self, address, count)
    }

    /// Uses function 0x06 for a single value and 0x10 otherwise.
    fn write_registers(&mut self, address: u16, values: &[u16]) -> SyncResult<()> {
        match values {
            [value] => self.write_single_register(address, *value),
            _ => self.write_multiple_registers(address, values),
        }
    }

    fn readwrite_registers(
        &mut self,
        address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> SyncResult<Vec<u16>> {
        self.read_write_multiple_registers(address, read_count, write_address, values)
    }

    fn read_exception_status(&mut self) -> SyncResult<u16> {
        ModbusTcpClient::read_exception_status(self).map(u16::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModbusTcpConfig::default();
        assert_eq!(config.unit_id, 1);
        assert_eq!(config.server_addr.port(), 502);
        assert_eq!(config.io_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_config_from_device_section() {
        let device = DeviceConfig {
            address: "127.0.0.1:1502".into(),
            unit_id: 7,
            ..DeviceConfig::default()
        };
        let config = ModbusTcpConfig::from_device_config(&device).unwrap();
        assert_eq!(config.server_addr, SocketAddr::from(([127, 0, 0, 1], 1502)));
        assert_eq!(config.unit_id, 7);
        assert_eq!(config.connect_timeout, device.connect_timeout);
    }

    #[test]
    fn test_config_rejects_unresolvable_address() {
        let device = DeviceConfig {
            address: "not an address".into(),
            ..DeviceConfig::default()
        };
        assert!(matches!(
            ModbusTcpConfig::from_device_config(&device),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_client_starts_disconnected() {
        let client = ModbusTcpClient::new();
        assert!(!client.is_connected());
    }

    #[test]
    fn test_transaction_id_wrapping() {
        let mut client = ModbusTcpClient::new();
        client.transaction_id = u16::MAX;
        assert_eq!(client.next_transaction_id(), 0);
    }

    #[test]
    fn test_connect_refused_is_communication_error() {
        // Bind then drop to get a port with nothing listening
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut client = ModbusTcpClient::with_config(ModbusTcpConfig {
            server_addr: SocketAddr::from(([127, 0, 0, 1], port)),
            connect_timeout: Duration::from_millis(200),
            ..ModbusTcpConfig::default()
        });

        let err = client.read_exception_status().unwrap_err();
        assert!(err.is_communication());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_invalid_quantity_fails_before_connecting() {
        let mut client = ModbusTcpClient::new();
        assert!(client.read_holding_registers(0, 0).is_err());
        assert!(client.write_multiple_registers(0, &[]).is_err());
        assert!(!client.is_connected());
    }
}
