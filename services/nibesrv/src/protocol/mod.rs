//! NIBE accessory bus protocol
//!
//! Framing, checksums and the payload layout of the commands the MODBUS40
//! accessory exchanges with the heat pump.

pub mod constants;
pub mod frame;

pub use frame::{
    build_read_request, build_write_request, checksum, encode_response, parse, Command,
    Envelope, FrameError, Payload, RegisterSlice,
};
