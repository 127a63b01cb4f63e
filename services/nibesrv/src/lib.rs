//! NIBE Gateway Service (nibesrv)
//!
//! Emulates the MODBUS40 accessory on a NIBE heat pump's RS485 bus, reached
//! through a serial-to-UDP relay, and exposes register reads and writes over MQTT.
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  MQTT intake    │───►│  RequestQueue   │───►│ Transaction     │
//! │  <topic>/req/#  │    │  (FIFO)         │    │ Machine         │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                                   ▲         │
//!                                          UDP frame│         │events
//!                                                   │         ▼
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  Heat pump      │◄──►│  UdpTransport   │    │ MQTT publisher  │
//! │  (via relay)    │    │  (Gateway loop) │    │ <topic>/res/... │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! - **`protocol`**: frame codec for the accessory bus
//! - **`registers`**: register descriptors and catalogues
//! - **`core`**: request queue, transaction state machine, register decoder
//! - **`transport`**: UDP relay socket and MQTT bridge
//! - **`gateway`**: the receive/answer/publish loop

pub mod alarm;
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod registers;
pub mod runtime;
pub mod transport;

pub use error::{NibeSrvError, Result};
