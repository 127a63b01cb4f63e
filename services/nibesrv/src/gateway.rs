//! Gateway loop
//!
//! Receives one frame at a time, lets the [`TransactionMachine`] decide the
//! answer, sends it back, and hands decoded values to the publisher.
//! Frame handling never waits on the message bus.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alarm::AlarmWatcher;
use crate::core::{GatewayEvent, TransactionMachine};
use crate::transport::FrameTransport;

pub struct Gateway<T: FrameTransport> {
    transport: T,
    machine: TransactionMachine,
    alarm: AlarmWatcher,
    events: mpsc::Sender<GatewayEvent>,
}

impl<T: FrameTransport> Gateway<T> {
    pub fn new(
        transport: T,
        machine: TransactionMachine,
        alarm: AlarmWatcher,
        events: mpsc::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            transport,
            machine,
            alarm,
            events,
        }
    }

    /// Serve frames until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Gateway serving bus address 0x{:02X}",
            self.machine.node_address()
        );
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.transport.recv() => received,
            };

            match received {
                Ok(frame) => self.process(&frame).await,
                Err(e) => warn!("Receive error: {}", e),
            }
        }
        info!("Gateway stopped");
    }

    /// Handle one frame: reply first, then fan out what it carried
    pub async fn process(&mut self, frame: &[u8]) {
        let outcome = self.machine.handle_frame(frame);

        if let Some(response) = outcome.response {
            if let Err(e) = self.transport.send(&response).await {
                warn!("Send error: {}", e);
            }
        }

        for event in outcome.events {
            self.alarm.observe(event.points());
            self.forward(event);
        }
    }

    fn forward(&self, event: GatewayEvent) {
        match self.events.try_send(event) {
            Ok(()) => {},
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Publisher lagging, dropping {} value(s)",
                    event.points().len()
                );
            },
            Err(TrySendError::Closed(_)) => debug!("Publisher gone, value dropped"),
        }
    }

    pub fn machine(&self) -> &TransactionMachine {
        &self.machine
    }
}
