//! NIBE accessory bus constants
//!
//! Inbound frames are sent by the heat pump (bus master) and start with
//! [`RESPONSE_START`]; frames we send start with [`REQUEST_START`].

// ============================================================================
// Control bytes
// ============================================================================

/// Positive acknowledgment of the previous frame
pub const ACK: u8 = 0x06;

/// Negative acknowledgment, the previous frame must be resent
pub const NAK: u8 = 0x15;

// ============================================================================
// Frame layout
// ============================================================================

/// First byte of every frame coming from the heat pump
pub const RESPONSE_START: u8 = 0x5C;

/// Second byte of every frame coming from the heat pump
pub const RESPONSE_FILLER: u8 = 0x00;

/// First byte of every frame sent to the heat pump
pub const REQUEST_START: u8 = 0xC0;

/// `5C 00 addr cmd len` in front of the data block
pub const RESPONSE_HEADER_LEN: usize = 5;

/// Smallest possible inbound frame: header plus checksum, no data
pub const MIN_RESPONSE_LEN: usize = RESPONSE_HEADER_LEN + 1;

/// A checksum equal to the start byte is transmitted as this value instead
pub const CHECKSUM_ESCAPE: u8 = 0xC5;

/// Largest datagram the UDP relay forwards
pub const MAX_DATAGRAM_SIZE: usize = 512;

// ============================================================================
// Payload layout
// ============================================================================

/// One data-message entry: address (u16 LE) + 2 value bytes
pub const DATA_MESSAGE_ENTRY_LEN: usize = 4;

/// Address marking an unused data-message slot
pub const UNUSED_SLOT_ADDRESS: u16 = 0xFFFF;

/// Read response: address (u16 LE) + 4 value bytes
pub const READ_RESPONSE_LEN: usize = 6;

// ============================================================================
// Bus addresses
// ============================================================================

/// MODBUS40 accessory, the role this service plays
pub const ADDRESS_MODBUS40: u8 = 0x20;
pub const ADDRESS_SMS40: u8 = 0x16;
pub const ADDRESS_RMU40_S1: u8 = 0x19;
pub const ADDRESS_RMU40_S2: u8 = 0x1A;
pub const ADDRESS_RMU40_S3: u8 = 0x1B;
pub const ADDRESS_RMU40_S4: u8 = 0x1C;
