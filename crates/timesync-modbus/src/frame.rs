//! Modbus TCP framing.
//!
//! Request PDUs are built here and response PDUs are validated here; the
//! client only moves bytes. All values on the wire are big-endian.

use std::fmt;
use timesync_common::{SyncError, SyncResult};

/// Maximum Modbus TCP frame size (MBAP header plus 253-byte PDU).
pub const MAX_FRAME_SIZE: usize = 260;

/// Maximum registers per read request.
pub const MAX_READ_QUANTITY: u16 = 125;

/// Maximum registers per Write Multiple Registers request.
pub const MAX_WRITE_QUANTITY: u16 = 123;

/// Maximum registers written by one Read/Write Multiple Registers request.
pub const MAX_READWRITE_WRITE_QUANTITY: u16 = 121;

/// Modbus function codes used by the time protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Holding Registers (0x03).
    ReadHoldingRegisters = 0x03,
    /// Write Single Register (0x06).
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07).
    ReadExceptionStatus = 0x07,
    /// Write Multiple Registers (0x10).
    WriteMultipleRegisters = 0x10,
    /// Read/Write Multiple Registers (0x17).
    ReadWriteMultipleRegisters = 0x17,
}

impl FunctionCode {
    /// Parse a function code from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x06 => Some(Self::WriteSingleRegister),
            0x07 => Some(Self::ReadExceptionStatus),
            0x10 => Some(Self::WriteMultipleRegisters),
            0x17 => Some(Self::ReadWriteMultipleRegisters),
            _ => None,
        }
    }
}

/// Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Illegal function code.
    IllegalFunction = 0x01,
    /// Illegal data address.
    IllegalDataAddress = 0x02,
    /// Illegal data value.
    IllegalDataValue = 0x03,
    /// Server device failure.
    ServerDeviceFailure = 0x04,
    /// Acknowledge (request accepted, processing).
    Acknowledge = 0x05,
    /// Server device busy.
    ServerDeviceBusy = 0x06,
    /// Gateway path unavailable.
    GatewayPathUnavailable = 0x0A,
    /// Gateway target device failed to respond.
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    /// Parse an exception code from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::ServerDeviceBusy),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "Illegal Function"),
            Self::IllegalDataAddress => write!(f, "Illegal Data Address"),
            Self::IllegalDataValue => write!(f, "Illegal Data Value"),
            Self::ServerDeviceFailure => write!(f, "Server Device Failure"),
            Self::Acknowledge => write!(f, "Acknowledge"),
            Self::ServerDeviceBusy => write!(f, "Server Device Busy"),
            Self::GatewayPathUnavailable => write!(f, "Gateway Path Unavailable"),
            Self::GatewayTargetFailed => write!(f, "Gateway Target Failed"),
        }
    }
}

/// Modbus TCP Application Protocol (MBAP) header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MbapHeader {
    /// Transaction identifier (echoed by server).
    pub transaction_id: u16,
    /// Protocol identifier (0 for Modbus).
    pub protocol_id: u16,
    /// Length of remaining data (unit ID + PDU).
    pub length: u16,
    /// Unit identifier.
    pub unit_id: u8,
}

impl MbapHeader {
    /// MBAP header size in bytes.
    pub const SIZE: usize = 7;

    /// Create a request header for a PDU of `pdu_length` bytes.
    pub fn new(transaction_id: u16, pdu_length: u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_length + 1,
            unit_id,
        }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.transaction_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.protocol_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6] = self.unit_id;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(SyncError::DeviceCommunication(format!(
                "MBAP header too short: {} bytes",
                bytes.len()
            )));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        })
    }

    /// Length of the PDU following the header.
    pub fn pdu_length(&self) -> SyncResult<usize> {
        self.length
            .checked_sub(1)
            .map(usize::from)
            .ok_or_else(|| SyncError::DeviceCommunication("MBAP length field is zero".into()))
    }
}

fn quantity(values: &[u16], max: u16) -> SyncResult<u16> {
    match u16::try_from(values.len()) {
        Ok(0) => Err(SyncError::DeviceCommunication(
            "Cannot write zero registers".into(),
        )),
        Ok(n) if n <= max => Ok(n),
        _ => Err(SyncError::DeviceCommunication(format!(
            "Cannot write {} registers in one request (max {max})",
            values.len()
        ))),
    }
}

fn check_read_quantity(count: u16) -> SyncResult<()> {
    if count == 0 || count > MAX_READ_QUANTITY {
        return Err(SyncError::DeviceCommunication(format!(
            "Read quantity {count} out of range 1..={MAX_READ_QUANTITY}"
        )));
    }
    Ok(())
}

/// Build a Read Holding Registers (0x03) request.
///
/// # Errors
///
/// Fails if `count` is outside `1..=125`.
pub fn read_holding_registers_request(address: u16, count: u16) -> SyncResult<Vec<u8>> {
    check_read_quantity(count)?;
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FunctionCode::ReadHoldingRegisters as u8);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    Ok(pdu)
}

/// Build a Write Single Register (0x06) request.
pub fn write_single_register_request(address: u16, value: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FunctionCode::WriteSingleRegister as u8);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&value.to_be_bytes());
    pdu
}

/// Build a Read Exception Status (0x07) request.
pub fn read_exception_status_request() -> Vec<u8> {
    vec![FunctionCode::ReadExceptionStatus as u8]
}

/// Build a Write Multiple Registers (0x10) request.
///
/// # Errors
///
/// Fails if `values` is empty or longer than 123 registers.
pub fn write_multiple_registers_request(address: u16, values: &[u16]) -> SyncResult<Vec<u8>> {
    let count = quantity(values, MAX_WRITE_QUANTITY)?;
    let mut pdu = Vec::with_capacity(6 + values.len() * 2);
    pdu.push(FunctionCode::WriteMultipleRegisters as u8);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&count.to_be_bytes());
    push_register_data(&mut pdu, count, values);
    Ok(pdu)
}

/// Build a Read/Write Multiple Registers (0x17) request.
///
/// # Errors
///
/// Fails if `read_count` is outside `1..=125` or `values` is empty or
/// longer than 121 registers.
pub fn read_write_multiple_registers_request(
    read_address: u16,
    read_count: u16,
    write_address: u16,
    values: &[u16],
) -> SyncResult<Vec<u8>> {
    check_read_quantity(read_count)?;
    let write_count = quantity(values, MAX_READWRITE_WRITE_QUANTITY)?;
    let mut pdu = Vec::with_capacity(10 + values.len() * 2);
    pdu.push(FunctionCode::ReadWriteMultipleRegisters as u8);
    pdu.extend_from_slice(&read_address.to_be_bytes());
    pdu.extend_from_slice(&read_count.to_be_bytes());
    pdu.extend_from_slice(&write_address.to_be_bytes());
    pdu.extend_from_slice(&write_count.to_be_bytes());
    push_register_data(&mut pdu, write_count, values);
    Ok(pdu)
}

// count is at most 123, so the byte count fits
#[allow(clippy::cast_possible_truncation)]
fn push_register_data(pdu: &mut Vec<u8>, count: u16, values: &[u16]) {
    pdu.push((count * 2) as u8);
    for value in values {
        pdu.extend_from_slice(&value.to_be_bytes());
    }
}

/// Describe an exception response, or `None` for a normal response.
pub fn exception_message(pdu: &[u8]) -> Option<String> {
    let (&function, rest) = pdu.split_first()?;
    if function & 0x80 == 0 {
        return None;
    }
    let code = match rest.first() {
        Some(&byte) => ExceptionCode::from_byte(byte)
            .map_or_else(|| format!("Unknown (0x{byte:02X})"), |e| e.to_string()),
        None => "Unknown".into(),
    };
    Some(format!(
        "Modbus exception on function 0x{:02X}: {code}",
        function & 0x7F
    ))
}

fn check_function(expected: FunctionCode, response: &[u8]) -> SyncResult<()> {
    match response.first() {
        None => Err(SyncError::DeviceCommunication("Response too short".into())),
        Some(&got) if got != expected as u8 => Err(SyncError::DeviceCommunication(format!(
            "Function code mismatch: expected 0x{:02X}, got 0x{got:02X}",
            expected as u8
        ))),
        Some(_) => Ok(()),
    }
}

/// Decode a register read response (0x03 or 0x17).
///
/// # Errors
///
/// Fails on a function code mismatch or a byte count that does not match
/// `count` registers.
pub fn decode_registers(
    expected: FunctionCode,
    count: u16,
    response: &[u8],
) -> SyncResult<Vec<u16>> {
    check_function(expected, response)?;
    if response.len() < 2 {
        return Err(SyncError::DeviceCommunication("Response too short".into()));
    }

    let byte_count = usize::from(response[1]);
    let expected_bytes = usize::from(count) * 2;
    if byte_count != expected_bytes {
        return Err(SyncError::DeviceCommunication(format!(
            "Expected {expected_bytes} bytes, got {byte_count}"
        )));
    }
    if response.len() < 2 + byte_count {
        return Err(SyncError::DeviceCommunication(format!(
            "Response too short: expected {} bytes",
            2 + byte_count
        )));
    }

    Ok(response[2..2 + byte_count]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Check a write response echoing `address` and `second` (the value for
/// 0x06, the quantity for 0x10).
///
/// # Errors
///
/// Fails if the response does not echo the request.
pub fn check_write_echo(
    expected: FunctionCode,
    address: u16,
    second: u16,
    response: &[u8],
) -> SyncResult<()> {
    check_function(expected, response)?;
    if response.len() < 5 {
        return Err(SyncError::DeviceCommunication("Response too short".into()));
    }

    let resp_address = u16::from_be_bytes([response[1], response[2]]);
    let resp_second = u16::from_be_bytes([response[3], response[4]]);
    if resp_address != address || resp_second != second {
        return Err(SyncError::DeviceCommunication(format!(
            "Write response mismatch: addr={resp_address}/{address}, value={resp_second}/{second}"
        )));
    }
    Ok(())
}

/// Decode a Read Exception Status (0x07) response.
///
/// # Errors
///
/// Fails on a function code mismatch or a short response.
pub fn decode_exception_status(response: &[u8]) -> SyncResult<u8> {
    check_function(FunctionCode::ReadExceptionStatus, response)?;
    response
        .get(1)
        .copied()
        .ok_or_else(|| SyncError::DeviceCommunication("Response too short".into()))
}
