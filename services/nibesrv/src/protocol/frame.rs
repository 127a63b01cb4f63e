//! Frame codec
//!
//! Inbound (heat pump → accessory):
//! `5C 00 <addr> <cmd> <len> <data…> <chk>`, checksum = XOR of `addr` through the last data byte.
//!
//! Outbound (accessory → heat pump):
//! `C0 <cmd> <len> <data…> <chk>`, checksum = XOR of every preceding byte.
//!
//! A checksum of `0x5C` is sent as `0xC5`, and a `0x5C` inside inbound data is sent doubled.

use thiserror::Error;
use tracing::trace;

use super::constants::*;
use crate::registers::RawValue;

/// Frame command kind (wire code in the doc of each variant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// 0x69, the heat pump invites us to send a read request
    ReadPoll,
    /// 0x6B, the heat pump invites us to send a write request
    WritePoll,
    /// 0x6A, answer to our read request
    ReadResponse,
    /// 0x6C, answer to our write request
    WriteResponse,
    /// 0x68, register values pushed by the heat pump
    DataMessage,
    /// 0x60
    RmuWriteRequest,
    /// 0x62
    RmuDataMessage,
    /// 0x63
    RmuDataRequest,
    /// 0x6D
    ProductInfo,
    /// 0x55 or 0xA0
    EcsDataMessage(u8),
    /// 0xEE
    AccessoryVersionRequest,
    Other(u8),
}

impl Command {
    pub const fn code(self) -> u8 {
        match self {
            Command::ReadPoll => 0x69,
            Command::WritePoll => 0x6B,
            Command::ReadResponse => 0x6A,
            Command::WriteResponse => 0x6C,
            Command::DataMessage => 0x68,
            Command::RmuWriteRequest => 0x60,
            Command::RmuDataMessage => 0x62,
            Command::RmuDataRequest => 0x63,
            Command::ProductInfo => 0x6D,
            Command::EcsDataMessage(code) => code,
            Command::AccessoryVersionRequest => 0xEE,
            Command::Other(code) => code,
        }
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            0x69 => Command::ReadPoll,
            0x6B => Command::WritePoll,
            0x6A => Command::ReadResponse,
            0x6C => Command::WriteResponse,
            0x68 => Command::DataMessage,
            0x60 => Command::RmuWriteRequest,
            0x62 => Command::RmuDataMessage,
            0x63 => Command::RmuDataRequest,
            0x6D => Command::ProductInfo,
            0x55 | 0xA0 => Command::EcsDataMessage(code),
            0xEE => Command::AccessoryVersionRequest,
            other => Command::Other(other),
        }
    }
}

/// Raw bytes of one register as carried on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSlice {
    pub address: u16,
    pub raw: Vec<u8>,
}

impl RegisterSlice {
    pub fn new(address: u16, raw: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            raw: raw.into(),
        }
    }

    pub fn is_unused(&self) -> bool {
        self.address == UNUSED_SLOT_ADDRESS
    }
}

/// Command-specific frame content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Read response: one register value
    Register(RegisterSlice),
    /// Write response: success flag
    WriteResult(bool),
    /// Data message: entries in wire order, unused slots included
    Registers(Vec<RegisterSlice>),
    /// Any other command, data block as received
    Raw(Vec<u8>),
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Destination bus address
    pub address: u8,
    pub command: Command,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("unexpected start bytes {0:02X} {1:02X}")]
    BadStart(u8, u8),

    #[error("declared data length {declared} does not fit frame of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: computed {computed:02X}, received {received:02X}")]
    Checksum { computed: u8, received: u8 },

    #[error("{command:?} payload of {len} bytes is malformed")]
    Payload { command: Command, len: usize },
}

/// XOR checksum with the start-byte escape applied
pub fn checksum(bytes: &[u8]) -> u8 {
    let xor = bytes.iter().fold(0u8, |acc, b| acc ^ b);
    if xor == RESPONSE_START {
        CHECKSUM_ESCAPE
    } else {
        xor
    }
}

/// Parse an inbound frame (control-byte preamble already stripped)
pub fn parse(frame: &[u8]) -> Result<Envelope, FrameError> {
    if frame.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::TooShort(frame.len()));
    }
    if frame[0] != RESPONSE_START || frame[1] != RESPONSE_FILLER {
        return Err(FrameError::BadStart(frame[0], frame[1]));
    }

    let declared = usize::from(frame[4]);
    if frame.len() != RESPONSE_HEADER_LEN + declared + 1 {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }

    let body = &frame[2..RESPONSE_HEADER_LEN + declared];
    let received = frame[frame.len() - 1];
    let xor = body.iter().fold(0u8, |acc, b| acc ^ b);
    let computed = checksum(body);
    // Some relays forward the unescaped value, accept both
    if received != computed && received != xor {
        return Err(FrameError::Checksum { computed, received });
    }

    let address = frame[2];
    let command = Command::from(frame[3]);
    let data = collapse_doubled_start(&frame[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + declared]);
    trace!(
        "Parsed frame addr={:02X} cmd={:?} data={}",
        address,
        command,
        hex::encode(&data)
    );

    let payload = match command {
        Command::ReadResponse => {
            if data.len() < READ_RESPONSE_LEN {
                return Err(FrameError::Payload {
                    command,
                    len: data.len(),
                });
            }
            Payload::Register(RegisterSlice::new(
                u16::from_le_bytes([data[0], data[1]]),
                &data[2..READ_RESPONSE_LEN],
            ))
        },
        Command::WriteResponse => match data.first() {
            Some(result) => Payload::WriteResult(*result != 0),
            None => return Err(FrameError::Payload { command, len: 0 }),
        },
        Command::DataMessage => {
            if data.len() % DATA_MESSAGE_ENTRY_LEN != 0 {
                return Err(FrameError::Payload {
                    command,
                    len: data.len(),
                });
            }
            Payload::Registers(
                data.chunks_exact(DATA_MESSAGE_ENTRY_LEN)
                    .map(|entry| {
                        RegisterSlice::new(u16::from_le_bytes([entry[0], entry[1]]), &entry[2..])
                    })
                    .collect(),
            )
        },
        _ => Payload::Raw(data),
    };

    Ok(Envelope {
        address,
        command,
        payload,
    })
}

fn collapse_doubled_start(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied().peekable();
    while let Some(byte) = iter.next() {
        out.push(byte);
        if byte == RESPONSE_START && iter.peek() == Some(&RESPONSE_START) {
            iter.next();
        }
    }
    out
}

fn build_request(command: Command, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(data.len() + 4);
    frame.push(REQUEST_START);
    frame.push(command.code());
    frame.push(data.len() as u8);
    frame.extend_from_slice(data);
    frame.push(checksum(&frame));
    frame
}

/// `C0 69 02 <addr LE> <chk>`
pub fn build_read_request(address: u16) -> Vec<u8> {
    build_request(Command::ReadPoll, &address.to_le_bytes())
}

/// `C0 6B 06 <addr LE> <value: 4 bytes> <chk>`
pub fn build_write_request(address: u16, raw: &RawValue) -> Vec<u8> {
    let mut data = Vec::with_capacity(6);
    data.extend_from_slice(&address.to_le_bytes());
    data.extend_from_slice(raw);
    build_request(Command::WritePoll, &data)
}

/// Build a heat-pump-side frame, doubling any `0x5C` in the data
///
/// This is what the heat pump sends; the service itself never emits it.
/// Useful for simulators and tests.
pub fn encode_response(address: u8, command: Command, data: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(data.len() + 2);
    for &byte in data {
        wire.push(byte);
        if byte == RESPONSE_START {
            wire.push(byte);
        }
    }

    let mut frame = Vec::with_capacity(wire.len() + MIN_RESPONSE_LEN);
    frame.extend_from_slice(&[
        RESPONSE_START,
        RESPONSE_FILLER,
        address,
        command.code(),
        wire.len() as u8,
    ]);
    frame.extend_from_slice(&wire);
    let chk = checksum(&frame[2..]);
    frame.push(chk);
    frame
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_parse_polls() {
        let read_poll = parse(&unhex("5c0020690049")).unwrap();
        assert_eq!(read_poll.address, ADDRESS_MODBUS40);
        assert_eq!(read_poll.command, Command::ReadPoll);
        assert_eq!(read_poll.payload, Payload::Raw(Vec::new()));

        let write_poll = parse(&unhex("5c00206b004b")).unwrap();
        assert_eq!(write_poll.command, Command::WritePoll);
    }

    #[test]
    fn test_parse_read_response() {
        let envelope = parse(&unhex("5c00206a06c1b7000044027c")).unwrap();
        assert_eq!(envelope.command, Command::ReadResponse);
        assert_eq!(
            envelope.payload,
            Payload::Register(RegisterSlice::new(47041, vec![0x00, 0x00, 0x44, 0x02]))
        );
    }

    #[test]
    fn test_parse_write_response() {
        let frame = encode_response(ADDRESS_MODBUS40, Command::WriteResponse, &[0x01]);
        assert_eq!(parse(&frame).unwrap().payload, Payload::WriteResult(true));

        let frame = encode_response(ADDRESS_MODBUS40, Command::WriteResponse, &[0x00]);
        assert_eq!(parse(&frame).unwrap().payload, Payload::WriteResult(false));
    }

    #[test]
    fn test_parse_data_message_keeps_unused_slots() {
        let data = unhex("449c6400ffff0000");
        let frame = encode_response(ADDRESS_MODBUS40, Command::DataMessage, &data);
        let envelope = parse(&frame).unwrap();
        match envelope.payload {
            Payload::Registers(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0], RegisterSlice::new(40004, vec![0x64, 0x00]));
                assert!(entries[1].is_unused());
            },
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_corruption() {
        assert_eq!(parse(&unhex("5c0020")), Err(FrameError::TooShort(3)));
        assert_eq!(parse(&unhex("c00020690049")), Err(FrameError::BadStart(0xC0, 0x00)));
        assert!(matches!(
            parse(&unhex("5c002069004a")),
            Err(FrameError::Checksum { received: 0x4A, .. })
        ));
        assert!(matches!(
            parse(&unhex("5c002069020049")),
            Err(FrameError::LengthMismatch { declared: 2, .. })
        ));

        // data message length not a multiple of four
        let frame = encode_response(ADDRESS_MODBUS40, Command::DataMessage, &[1, 2, 3]);
        assert!(matches!(
            parse(&frame),
            Err(FrameError::Payload {
                command: Command::DataMessage,
                len: 3
            })
        ));
    }

    #[test]
    fn test_doubled_start_byte_collapsed() {
        // value byte 0x5C travels doubled
        let frame = encode_response(
            ADDRESS_MODBUS40,
            Command::DataMessage,
            &[0x44, 0x9c, 0x5c, 0x00],
        );
        assert_eq!(frame[4], 5);
        match parse(&frame).unwrap().payload {
            Payload::Registers(entries) => {
                assert_eq!(entries, vec![RegisterSlice::new(40004, vec![0x5c, 0x00])]);
            },
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_checksum_escape() {
        // 0x20 ^ 0x7C = 0x5C, escaped to 0xC5
        assert_eq!(checksum(&[0x20, 0x7C]), CHECKSUM_ESCAPE);
        let frame = encode_response(ADDRESS_MODBUS40, Command::Other(0x7C), &[]);
        assert_eq!(*frame.last().unwrap(), CHECKSUM_ESCAPE);
        assert_eq!(parse(&frame).unwrap().command, Command::Other(0x7C));

        // unescaped checksum is accepted as well
        let mut raw = frame.clone();
        *raw.last_mut().unwrap() = 0x5C;
        assert!(parse(&raw).is_ok());
    }

    #[test]
    fn test_build_requests() {
        assert_eq!(build_read_request(47041), unhex("c06902c1b7dd"));
        assert_eq!(
            build_write_request(47041, &[0, 0, 0, 0]),
            unhex("c06b06c1b700000000db")
        );
        assert_eq!(
            build_write_request(45171, &[1, 0, 0, 0]),
            unhex("c06b0673b0010000006f")
        );
    }

    #[test]
    fn test_command_codes_round_trip_through_u8() {
        for code in [0x68u8, 0x69, 0x6A, 0x6B, 0x6C, 0x55, 0xA0, 0xEE, 0x01] {
            assert_eq!(Command::from(code).code(), code);
        }
    }
}
