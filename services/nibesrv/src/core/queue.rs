//! Request backlog shared between the message-bus intake and the poll path

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::registers::Value;

/// Named register operation: no value means read, a value means write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Request {
    pub fn read(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn write(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn is_write(&self) -> bool {
        self.value.is_some()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Request>,
    /// Pushed but not yet marked done, including the one currently popped
    unfinished: usize,
}

/// FIFO of pending requests
///
/// Popping hands the request to the caller but keeps it counted as unfinished
/// until [`RequestQueue::task_done`] is called.
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: Request) {
        let mut state = self.state.lock();
        state.items.push_back(request);
        state.unfinished += 1;
    }

    /// Pop the oldest request without waiting
    pub fn try_pop(&self) -> Option<Request> {
        self.state.lock().items.pop_front()
    }

    /// Mark one previously popped request as fully consumed
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        state.unfinished = state.unfinished.saturating_sub(1);
    }

    /// Requests still waiting to be popped
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Requests not yet marked done
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }
}
