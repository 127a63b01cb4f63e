//! Raw register slices to named values
//!
//! Data messages carry two value bytes per address. Registers wider than that
//! occupy two consecutive slots, which are joined before decoding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::protocol::RegisterSlice;
use crate::registers::{DecodeError, DirectoryError, RegisterDirectory, Value};

/// Named value published to the message bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub name: String,
    pub value: Value,
}

impl DataPoint {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("register {address} needs a continuation slot at {expected}, found {found:?}")]
    MissingContinuation {
        address: u16,
        expected: u16,
        found: Option<u16>,
    },
}

/// Looks up descriptors by address and decodes their raw bytes
#[derive(Debug, Clone)]
pub struct RegisterDecoder {
    directory: Arc<RegisterDirectory>,
}

impl RegisterDecoder {
    pub fn new(directory: Arc<RegisterDirectory>) -> Self {
        Self { directory }
    }

    /// Decode a single register, e.g. the answer to our own read request
    pub fn decode(&self, slice: &RegisterSlice) -> Result<DataPoint, DecoderError> {
        let register = self.directory.by_address(slice.address)?;
        let value = register.decode(&slice.raw)?;
        Ok(DataPoint {
            name: register.name.clone(),
            value,
        })
    }

    /// Decode a data message, skipping unused slots and joining wide registers
    ///
    /// Fails as a whole: either every entry decodes or nothing is returned.
    pub fn decode_batch(&self, slices: &[RegisterSlice]) -> Result<Vec<DataPoint>, DecoderError> {
        let mut points = Vec::with_capacity(slices.len());
        let mut index = 0;

        while index < slices.len() {
            let slice = &slices[index];
            index += 1;
            if slice.is_unused() {
                continue;
            }

            let register = self.directory.by_address(slice.address)?;
            let value = match register.decode(&slice.raw) {
                Ok(value) => value,
                Err(DecodeError::TooShort { .. }) => {
                    let expected = slice.address.wrapping_add(1);
                    let next = slices.get(index);
                    match next {
                        Some(next) if next.address == expected => {
                            index += 1;
                            let mut joined = slice.raw.clone();
                            joined.extend_from_slice(&next.raw);
                            trace!(
                                "Joined {} and {} for {}",
                                slice.address,
                                next.address,
                                register.name
                            );
                            register.decode(&joined)?
                        },
                        _ => {
                            return Err(DecoderError::MissingContinuation {
                                address: slice.address,
                                expected,
                                found: next.map(|n| n.address),
                            })
                        },
                    }
                },
                Err(e) => return Err(e.into()),
            };

            points.push(DataPoint {
                name: register.name.clone(),
                value,
            });
        }

        Ok(points)
    }
}
