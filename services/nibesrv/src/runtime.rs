//! Service runtime
//!
//! Wires the register catalogue, request queue, UDP gateway and MQTT tasks
//! together and runs them until the shutdown token fires.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::alarm::AlarmWatcher;
use crate::config::NibeSrvConfig;
use crate::core::{RequestQueue, TransactionMachine};
use crate::error::{NibeSrvError, Result};
use crate::gateway::Gateway;
use crate::transport::{MqttBridge, UdpTransport};

/// Start every service task and wait for them to finish
pub async fn start_gateway_service(
    config: NibeSrvConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let directory = Arc::new(config.load_directory()?);
    info!(
        "Register catalogue '{}' with {} registers",
        directory.model(),
        directory.len()
    );

    let queue = Arc::new(RequestQueue::new());
    let alarm = AlarmWatcher::new(&config.alarm, Arc::clone(&queue));
    alarm.seed();

    let transport = UdpTransport::bind(&config.nibe.host, config.nibe.port)
        .await
        .map_err(|e| NibeSrvError::io(e.to_string()))?;
    let machine = TransactionMachine::new(
        config.nibe.bus_address,
        Arc::clone(&queue),
        Arc::clone(&directory),
    );

    let (event_tx, event_rx) = mpsc::channel(config.mqtt.event_buffer);
    let (bridge, eventloop) = MqttBridge::new(&config.mqtt, config.topic_root());

    let intake = tokio::spawn({
        let bridge = bridge.clone();
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        async move { bridge.run_intake(eventloop, queue, cancel).await }
    });
    let publisher = tokio::spawn({
        let cancel = cancel.clone();
        async move { bridge.run_publisher(event_rx, cancel).await }
    });
    let gateway = tokio::spawn({
        let cancel = cancel.clone();
        let gateway = Gateway::new(transport, machine, alarm, event_tx);
        async move { gateway.run(cancel).await }
    });

    info!("Service started");

    let (intake, publisher, gateway) = tokio::join!(intake, publisher, gateway);
    for (task, result) in [
        ("MQTT intake", intake),
        ("MQTT publisher", publisher),
        ("gateway", gateway),
    ] {
        if let Err(e) = result {
            error!("{} task failed: {}", task, e);
            return Err(NibeSrvError::internal(format!("{} task failed: {}", task, e)));
        }
    }

    if queue.unfinished() > 0 {
        info!("{} queued request(s) dropped at shutdown", queue.unfinished());
    }
    Ok(())
}
