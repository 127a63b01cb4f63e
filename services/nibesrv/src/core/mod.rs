//! Poll-response core
//!
//! - [`queue`]: backlog of named reads and writes from the message bus
//! - [`transaction`]: the single in-flight operation and how each poll is answered
//! - [`decoder`]: raw register slices to named values

pub mod decoder;
pub mod queue;
pub mod transaction;

pub use decoder::{DataPoint, DecoderError, RegisterDecoder};
pub use queue::{Request, RequestQueue};
pub use transaction::{
    FrameOutcome, GatewayEvent, OperationState, TransactionError, TransactionMachine,
};
