//! Poll-response transaction state machine
//!
//! The heat pump polls the accessory continuously. Each poll must be answered
//! either with a plain ACK or with the request frame of the single operation
//! currently in flight. The operation is opened from the [`RequestQueue`] and
//! closed only when the heat pump acknowledges our request frame.

use std::mem;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::decoder::{DataPoint, DecoderError, RegisterDecoder};
use super::queue::{Request, RequestQueue};
use crate::protocol::constants::{ACK, NAK};
use crate::protocol::{self, Command, Envelope, FrameError, Payload};
use crate::registers::{DirectoryError, EncodeError, RawValue, Register, RegisterDirectory, Value};

/// The operation in flight, if any
///
/// `*Pending` means our request frame went out and neither ACK nor NAK has been seen since.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OperationState {
    #[default]
    Idle,
    Read {
        register: Arc<Register>,
    },
    ReadPending {
        register: Arc<Register>,
    },
    Write {
        register: Arc<Register>,
        value: Value,
        raw: RawValue,
    },
    WritePending {
        register: Arc<Register>,
        value: Value,
        raw: RawValue,
    },
}

impl OperationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, OperationState::Idle)
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            OperationState::ReadPending { .. } | OperationState::WritePending { .. }
        )
    }

    pub fn register(&self) -> Option<&Arc<Register>> {
        match self {
            OperationState::Idle => None,
            OperationState::Read { register }
            | OperationState::ReadPending { register }
            | OperationState::Write { register, .. }
            | OperationState::WritePending { register, .. } => Some(register),
        }
    }
}

/// Values surfaced by an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Answer to our own read request
    ReadValue(DataPoint),
    /// Values pushed by the heat pump in a data message, never empty
    DataBatch(Vec<DataPoint>),
}

impl GatewayEvent {
    pub fn points(&self) -> &[DataPoint] {
        match self {
            GatewayEvent::ReadValue(point) => std::slice::from_ref(point),
            GatewayEvent::DataBatch(points) => points,
        }
    }
}

/// Result of handling one inbound frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// Bytes to send back to the heat pump
    pub response: Option<Vec<u8>>,
    pub events: Vec<GatewayEvent>,
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Decode(#[from] DecoderError),

    #[error("request '{name}' discarded: {source}")]
    UnknownRegister {
        name: String,
        source: DirectoryError,
    },

    #[error("request '{name}' discarded: {source}")]
    Unencodable { name: String, source: EncodeError },
}

/// Single-threaded owner of the in-flight operation
pub struct TransactionMachine {
    node_address: u8,
    queue: Arc<RequestQueue>,
    directory: Arc<RegisterDirectory>,
    decoder: RegisterDecoder,
    state: OperationState,
}

impl TransactionMachine {
    pub fn new(
        node_address: u8,
        queue: Arc<RequestQueue>,
        directory: Arc<RegisterDirectory>,
    ) -> Self {
        Self {
            node_address,
            decoder: RegisterDecoder::new(Arc::clone(&directory)),
            queue,
            directory,
            state: OperationState::Idle,
        }
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn node_address(&self) -> u8 {
        self.node_address
    }

    /// Handle one inbound frame and decide the response
    ///
    /// Never fails: a malformed frame is logged and yields no response, leaving the
    /// operation untouched so the next poll can proceed.
    pub fn handle_frame(&mut self, raw: &[u8]) -> FrameOutcome {
        let body = match raw.first() {
            Some(&byte) if byte == ACK || byte == NAK => {
                self.apply_control(byte);
                &raw[1..]
            },
            Some(_) => raw,
            None => return FrameOutcome::default(),
        };

        if body.is_empty() {
            return FrameOutcome::default();
        }

        match self.process(body) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Dropping frame {}: {}", hex::encode(raw), e);
                FrameOutcome::default()
            },
        }
    }

    fn apply_control(&mut self, byte: u8) {
        let state = mem::take(&mut self.state);
        self.state = match (byte, state) {
            (
                ACK,
                OperationState::ReadPending { register }
                | OperationState::WritePending { register, .. },
            ) => {
                debug!("Request for {} acknowledged", register.name);
                self.queue.task_done();
                OperationState::Idle
            },
            (NAK, OperationState::ReadPending { register }) => {
                debug!("Read of {} rejected, will resend", register.name);
                OperationState::Read { register }
            },
            (
                NAK,
                OperationState::WritePending {
                    register,
                    value,
                    raw,
                },
            ) => {
                debug!("Write of {} rejected, will resend", register.name);
                OperationState::Write {
                    register,
                    value,
                    raw,
                }
            },
            (_, state) => {
                trace!("Ignoring control byte {:02X} with nothing pending", byte);
                state
            },
        };
    }

    fn process(&mut self, body: &[u8]) -> Result<FrameOutcome, TransactionError> {
        let envelope = protocol::parse(body)?;
        if envelope.address != self.node_address {
            trace!(
                "Frame for {:02X} ignored ({:?})",
                envelope.address,
                envelope.command
            );
            return Ok(FrameOutcome::default());
        }

        // Decode first so a bad payload leaves the operation untouched
        let events = self.decode_content(&envelope)?;
        self.admit()?;
        let response = self.respond(envelope.command);

        Ok(FrameOutcome {
            response: Some(response),
            events,
        })
    }

    fn decode_content(&self, envelope: &Envelope) -> Result<Vec<GatewayEvent>, TransactionError> {
        let events = match (envelope.command, &envelope.payload) {
            (Command::ReadResponse, Payload::Register(slice)) => {
                let point = self.decoder.decode(slice)?;
                debug!("Read {} = {}", point.name, point.value);
                vec![GatewayEvent::ReadValue(point)]
            },
            (Command::WriteResponse, Payload::WriteResult(success)) => {
                if *success {
                    info!("Write succeeded");
                } else {
                    warn!("Write failed");
                }
                Vec::new()
            },
            (Command::DataMessage, Payload::Registers(slices)) => {
                let points = self.decoder.decode_batch(slices)?;
                if points.is_empty() {
                    Vec::new()
                } else {
                    debug!("Data message with {} values", points.len());
                    vec![GatewayEvent::DataBatch(points)]
                }
            },
            _ => Vec::new(),
        };
        Ok(events)
    }

    /// Open an operation from the queue when none is active
    fn admit(&mut self) -> Result<(), TransactionError> {
        if !self.state.is_idle() {
            return Ok(());
        }
        let Some(request) = self.queue.try_pop() else {
            return Ok(());
        };

        match self.open(request) {
            Ok(state) => {
                self.state = state;
                Ok(())
            },
            Err(e) => {
                // Never reaches the bus, so it is complete as far as the queue is concerned
                self.queue.task_done();
                Err(e)
            },
        }
    }

    fn open(&self, request: Request) -> Result<OperationState, TransactionError> {
        let register =
            self.directory
                .by_name(&request.name)
                .map_err(|source| TransactionError::UnknownRegister {
                    name: request.name.clone(),
                    source,
                })?;

        let state = match request.value {
            None => {
                debug!("Opening read of {}", register.name);
                OperationState::Read { register }
            },
            Some(value) => {
                let raw =
                    register
                        .encode(&value)
                        .map_err(|source| TransactionError::Unencodable {
                            name: request.name.clone(),
                            source,
                        })?;
                debug!("Opening write of {} = {}", register.name, value);
                OperationState::Write {
                    register,
                    value,
                    raw,
                }
            },
        };
        Ok(state)
    }

    fn respond(&mut self, command: Command) -> Vec<u8> {
        let state = mem::take(&mut self.state);
        let (state, frame) = match (command, state) {
            (Command::ReadPoll, OperationState::Read { register }) => {
                let frame = protocol::build_read_request(register.address);
                (OperationState::ReadPending { register }, frame)
            },
            (Command::ReadPoll, OperationState::ReadPending { register }) => {
                warn!("Resending unacknowledged read of {}", register.name);
                let frame = protocol::build_read_request(register.address);
                (OperationState::ReadPending { register }, frame)
            },
            (
                Command::WritePoll,
                OperationState::Write {
                    register,
                    value,
                    raw,
                },
            ) => {
                let frame = protocol::build_write_request(register.address, &raw);
                (
                    OperationState::WritePending {
                        register,
                        value,
                        raw,
                    },
                    frame,
                )
            },
            (
                Command::WritePoll,
                OperationState::WritePending {
                    register,
                    value,
                    raw,
                },
            ) => {
                warn!("Resending unacknowledged write of {}", register.name);
                let frame = protocol::build_write_request(register.address, &raw);
                (
                    OperationState::WritePending {
                        register,
                        value,
                        raw,
                    },
                    frame,
                )
            },
            (_, state) => (state, vec![ACK]),
        };
        self.state = state;
        frame
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocol::constants::ADDRESS_MODBUS40;
    use crate::protocol::encode_response;
    use tracing_test::traced_test;

    fn machine() -> (TransactionMachine, Arc<RequestQueue>) {
        let queue = Arc::new(RequestQueue::new());
        let directory = Arc::new(RegisterDirectory::builtin("f370_f470").unwrap());
        (
            TransactionMachine::new(ADDRESS_MODBUS40, Arc::clone(&queue), directory),
            queue,
        )
    }

    /// Feed a hex frame and return the hex response, if any
    fn feed(machine: &mut TransactionMachine, frame: &str) -> Option<String> {
        machine
            .handle_frame(&hex::decode(frame).unwrap())
            .response
            .map(hex::encode)
    }

    const READ_POLL: &str = "5c0020690049";
    const WRITE_POLL: &str = "5c00206b004b";

    #[test]
    fn test_idle_poll_is_acked() {
        let (mut m, _) = machine();
        assert_eq!(feed(&mut m, READ_POLL).as_deref(), Some("06"));
        assert_eq!(feed(&mut m, WRITE_POLL).as_deref(), Some("06"));
        assert!(m.state().is_idle());
    }

    #[test]
    fn test_queued_writes_then_read() {
        let (mut m, queue) = machine();
        queue.push(Request::write("hot-water-comfort-mode-47041", "ECONOMY"));
        queue.push(Request::write("alarm-reset-45171", Value::Integer(1)));

        assert_eq!(
            feed(&mut m, WRITE_POLL).as_deref(),
            Some("c06b06c1b700000000db")
        );
        assert_eq!(feed(&mut m, "06"), None);
        assert_eq!(
            feed(&mut m, WRITE_POLL).as_deref(),
            Some("c06b0673b0010000006f")
        );
        assert_eq!(feed(&mut m, "06"), None);
        assert_eq!(queue.unfinished(), 0);

        queue.push(Request::read("hot-water-comfort-mode-47041"));
        assert_eq!(feed(&mut m, READ_POLL).as_deref(), Some("c06902c1b7dd"));
        assert_eq!(feed(&mut m, "06"), None);

        let outcome = m.handle_frame(&hex::decode("5c00206a06c1b7000044027c").unwrap());
        assert_eq!(outcome.response, Some(vec![ACK]));
        assert_eq!(
            outcome.events,
            vec![GatewayEvent::ReadValue(DataPoint::new(
                "hot-water-comfort-mode-47041",
                "ECONOMY"
            ))]
        );
    }

    #[test]
    fn test_ack_completes_read() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));

        let response = feed(&mut m, READ_POLL).unwrap();
        assert_eq!(
            hex::decode(response).unwrap(),
            protocol::build_read_request(45001)
        );
        assert!(m.state().is_pending());
        assert_eq!(m.state().register().unwrap().name, "alarm-45001");
        assert_eq!(queue.unfinished(), 1);

        assert_eq!(feed(&mut m, "06"), None);
        assert!(m.state().is_idle());
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn test_nak_forces_identical_resend() {
        let (mut m, queue) = machine();
        queue.push(Request::write("hot-water-comfort-mode-47041", "LUXURY"));

        let first = feed(&mut m, WRITE_POLL).unwrap();
        assert!(m.state().is_pending());

        assert_eq!(feed(&mut m, "15"), None);
        assert!(matches!(m.state(), OperationState::Write { .. }));
        assert_eq!(queue.unfinished(), 1);

        let second = feed(&mut m, WRITE_POLL).unwrap();
        assert_eq!(first, second);
        assert!(m.state().is_pending());
    }

    #[test]
    #[traced_test]
    fn test_repeated_poll_resends_with_warning() {
        let (mut m, queue) = machine();
        queue.push(Request::read("bt1-outdoor-temperature-40004"));

        let first = feed(&mut m, READ_POLL);
        let second = feed(&mut m, READ_POLL);
        assert!(first.is_some());
        assert_eq!(first, second);
        assert!(logs_contain("Resending unacknowledged read"));
    }

    #[test]
    fn test_direction_gating() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));

        // a read never answers a write poll
        assert_eq!(feed(&mut m, WRITE_POLL).as_deref(), Some("06"));
        assert!(matches!(m.state(), OperationState::Read { .. }));

        assert_eq!(feed(&mut m, "06"), None);
        let response = feed(&mut m, READ_POLL).unwrap();
        assert_eq!(
            hex::decode(response).unwrap(),
            protocol::build_read_request(45001)
        );
    }

    #[test]
    fn test_write_waits_for_write_poll() {
        let (mut m, queue) = machine();
        queue.push(Request::write("alarm-reset-45171", Value::Integer(1)));

        assert_eq!(feed(&mut m, READ_POLL).as_deref(), Some("06"));
        assert_eq!(feed(&mut m, READ_POLL).as_deref(), Some("06"));
        assert!(matches!(m.state(), OperationState::Write { .. }));
        assert_eq!(
            feed(&mut m, WRITE_POLL).as_deref(),
            Some("c06b0673b0010000006f")
        );
    }

    #[test]
    fn test_one_operation_at_a_time() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));
        queue.push(Request::read("bt1-outdoor-temperature-40004"));

        let first = feed(&mut m, READ_POLL);
        // still pending, the second request stays queued
        assert_eq!(feed(&mut m, READ_POLL), first);
        assert_eq!(queue.len(), 1);

        assert_eq!(feed(&mut m, "06"), None);
        let next = feed(&mut m, READ_POLL).unwrap();
        assert_eq!(
            hex::decode(next).unwrap(),
            protocol::build_read_request(40004)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stray_control_bytes_ignored() {
        let (mut m, queue) = machine();
        assert_eq!(feed(&mut m, "06"), None);
        assert_eq!(feed(&mut m, "15"), None);

        queue.push(Request::read("alarm-45001"));
        // not yet sent, so an ACK must not complete it
        assert_eq!(feed(&mut m, WRITE_POLL).as_deref(), Some("06"));
        assert_eq!(feed(&mut m, "06"), None);
        assert!(matches!(m.state(), OperationState::Read { .. }));
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn test_control_byte_prefixing_a_frame() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));
        queue.push(Request::read("alarm-45001"));
        feed(&mut m, READ_POLL).unwrap();

        // ACK of the first read followed by the next poll in one datagram
        let response = feed(&mut m, &format!("06{}", READ_POLL)).unwrap();
        assert_eq!(
            hex::decode(response).unwrap(),
            protocol::build_read_request(45001)
        );
        assert!(m.state().is_pending());
        assert_eq!(queue.unfinished(), 1);
    }

    #[test]
    fn test_foreign_address_ignored() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));

        // RMU40 S1 read poll
        let frame = encode_response(0x19, Command::ReadPoll, &[]);
        let outcome = m.handle_frame(&frame);
        assert_eq!(outcome, FrameOutcome::default());
        assert!(m.state().is_idle());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_other_commands_are_acked() {
        let (mut m, _) = machine();
        let frame = encode_response(ADDRESS_MODBUS40, Command::ProductInfo, &[0x01, 0x02]);
        assert_eq!(m.handle_frame(&frame).response, Some(vec![ACK]));
    }

    #[test]
    #[traced_test]
    fn test_malformed_frame_dropped_without_state_change() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));

        // bad checksum
        assert_eq!(feed(&mut m, "5c002069004a"), None);
        assert!(m.state().is_idle());
        assert_eq!(queue.len(), 1);
        assert!(logs_contain("Dropping frame 5c002069004a"));
    }

    #[test]
    fn test_unsolicited_batch() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));

        let data = hex::decode("449cddffffff000098a9102799a901004ca82c01").unwrap();
        let frame = encode_response(ADDRESS_MODBUS40, Command::DataMessage, &data);
        let outcome = m.handle_frame(&frame);

        assert_eq!(outcome.response, Some(vec![ACK]));
        assert_eq!(
            outcome.events,
            vec![GatewayEvent::DataBatch(vec![
                DataPoint::new("bt1-outdoor-temperature-40004", Value::Float(-3.5)),
                DataPoint::new("compressor-starts-eb100-ep14-43416", Value::Integer(75_536)),
                DataPoint::new("int-el-add-power-43084", Value::Float(3.0)),
            ])]
        );
        // data message is not a read poll, the admitted read waits
        assert!(matches!(m.state(), OperationState::Read { .. }));
    }

    #[test]
    fn test_batch_with_broken_pair_is_dropped() {
        let (mut m, queue) = machine();
        queue.push(Request::read("alarm-45001"));

        // 43416 followed by 40004 instead of 43417
        let data = hex::decode("98a91027449cddff").unwrap();
        let frame = encode_response(ADDRESS_MODBUS40, Command::DataMessage, &data);
        let outcome = m.handle_frame(&frame);

        assert_eq!(outcome, FrameOutcome::default());
        assert!(m.state().is_idle());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_only_unused_slots_emit_nothing() {
        let (mut m, _) = machine();
        let frame = encode_response(ADDRESS_MODBUS40, Command::DataMessage, &[0xFF, 0xFF, 0, 0]);
        let outcome = m.handle_frame(&frame);
        assert_eq!(outcome.response, Some(vec![ACK]));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_unresolvable_requests_are_discarded() {
        let (mut m, queue) = machine();
        queue.push(Request::read("no-such-register"));
        queue.push(Request::write("alarm-45001", Value::Integer(1)));
        queue.push(Request::read("alarm-45001"));

        assert_eq!(feed(&mut m, READ_POLL), None);
        assert_eq!(feed(&mut m, READ_POLL), None);
        assert_eq!(queue.unfinished(), 1);

        assert_eq!(
            hex::decode(feed(&mut m, READ_POLL).unwrap()).unwrap(),
            protocol::build_read_request(45001)
        );
    }

    #[test]
    fn test_invalid_write_values_never_reach_the_bus() {
        let (mut m, queue) = machine();
        queue.push(Request::write("heat-offset-s1-47011", "NaN"));
        queue.push(Request::write("hot-water-comfort-mode-47041", Value::Integer(7)));
        queue.push(Request::write("hot-water-comfort-mode-47041", Value::Integer(2)));

        assert_eq!(feed(&mut m, WRITE_POLL), None);
        assert_eq!(feed(&mut m, WRITE_POLL), None);
        assert!(m.state().is_idle());
        assert_eq!(queue.unfinished(), 1);

        assert_eq!(
            feed(&mut m, WRITE_POLL).as_deref(),
            Some("c06b06c1b702000000d9")
        );
    }

    #[test]
    fn test_write_response_is_acked_without_events() {
        let (mut m, _) = machine();
        let frame = encode_response(ADDRESS_MODBUS40, Command::WriteResponse, &[0x01]);
        let outcome = m.handle_frame(&frame);
        assert_eq!(outcome.response, Some(vec![ACK]));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn test_empty_datagram() {
        let (mut m, _) = machine();
        assert_eq!(m.handle_frame(&[]), FrameOutcome::default());
    }
}
