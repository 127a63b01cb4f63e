//! MQTT side of the gateway
//!
//! Requests arrive on `<topic>/req/<name>`: an empty payload asks for a read,
//! a JSON payload (`1`, `21.5`, `"ECONOMY"`) asks for a write.
//! Decoded values leave on `<topic>/res/<name>` as JSON.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::core::{DataPoint, GatewayEvent, Request, RequestQueue};
use crate::error::{NibeSrvError, Result};
use crate::registers::Value;

/// Capacity of the rumqttc request channel
const CLIENT_CAPACITY: usize = 64;

/// Pause before polling again after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on flushing DISCONNECT at shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Subscription filter for incoming requests
pub fn request_filter(root: &str) -> String {
    format!("{}/req/#", root)
}

pub fn result_topic(root: &str, name: &str) -> String {
    format!("{}/res/{}", root, name)
}

/// Turn an incoming message into a queued request
///
/// The register name is the last topic segment.
pub fn parse_request(topic: &str, payload: &[u8]) -> Result<Request> {
    let name = topic
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| NibeSrvError::data(format!("no register name in topic '{}'", topic)))?;

    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Request::read(name));
    }
    let value: Value = serde_json::from_slice(payload)?;
    Ok(Request {
        name: name.to_string(),
        value: Some(value),
    })
}

/// MQTT client shared by the request intake and the result publisher
#[derive(Clone)]
pub struct MqttBridge {
    client: AsyncClient,
    root: String,
    qos: QoS,
}

impl MqttBridge {
    /// Create the client; nothing connects until the returned event loop is polled
    pub fn new(config: &MqttConfig, root: &str) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        (
            Self {
                client,
                root: root.to_string(),
                qos: qos_from_level(config.qos),
            },
            eventloop,
        )
    }

    /// Drive the connection, (re)subscribe on every connect and queue incoming requests
    pub async fn run_intake(
        &self,
        mut eventloop: EventLoop,
        queue: Arc<RequestQueue>,
        cancel: CancellationToken,
    ) {
        let filter = request_filter(&self.root);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected, subscribing to {}", filter);
                    // this task drains the client channel, so the subscribe must not await
                    if let Err(e) = self.client.try_subscribe(filter.as_str(), self.qos) {
                        error!("MQTT subscribe to {} failed: {}", filter, e);
                    }
                },
                Ok(Event::Incoming(Packet::Publish(publish))) => self.accept(&publish, &queue),
                Ok(notification) => debug!("MQTT event: {:?}", notification),
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {},
                    }
                },
            }
        }

        self.disconnect(&mut eventloop).await;
        debug!("MQTT intake stopped");
    }

    /// Queue DISCONNECT and poll until it has gone out
    async fn disconnect(&self, eventloop: &mut EventLoop) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect: {}", e);
            return;
        }
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {},
                    Err(e) => {
                        debug!("MQTT disconnect: {}", e);
                        break;
                    },
                }
            }
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
            debug!("MQTT disconnect timed out");
        }
    }

    fn accept(&self, publish: &Publish, queue: &RequestQueue) {
        match parse_request(&publish.topic, &publish.payload) {
            Ok(request) => {
                info!("Request {:?}", request);
                queue.push(request);
            },
            Err(e) => warn!("Ignoring message on {}: {}", publish.topic, e),
        }
    }

    /// Publish every decoded value until the channel closes or shutdown
    pub async fn run_publisher(
        &self,
        mut events: mpsc::Receiver<GatewayEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            for point in event.points() {
                if let Err(e) = self.publish(point).await {
                    warn!("Failed to publish {}: {}", point.name, e);
                }
            }
        }
        debug!("MQTT publisher stopped");
    }

    pub async fn publish(&self, point: &DataPoint) -> Result<()> {
        info!("{}: {}", point.name, point.value);
        let payload = serde_json::to_vec(&point.value)?;
        self.client
            .publish(result_topic(&self.root, &point.name), self.qos, false, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_read() {
        assert_eq!(
            parse_request("nibe/req/alarm-45001", b"").unwrap(),
            Request::read("alarm-45001")
        );
        assert_eq!(
            parse_request("nibe/req/alarm-45001", b" \n").unwrap(),
            Request::read("alarm-45001")
        );
    }

    #[test]
    fn test_json_payload_is_write() {
        assert_eq!(
            parse_request("nibe/req/hot-water-comfort-mode-47041", br#""ECONOMY""#).unwrap(),
            Request::write("hot-water-comfort-mode-47041", "ECONOMY")
        );
        assert_eq!(
            parse_request("nibe/req/alarm-reset-45171", b"1").unwrap(),
            Request::write("alarm-reset-45171", Value::Integer(1))
        );
        assert_eq!(
            parse_request("home/nibe/req/heat-offset-s1-47011", b"-1.5").unwrap(),
            Request::write("heat-offset-s1-47011", Value::Float(-1.5))
        );
    }

    #[test]
    fn test_bad_messages_rejected() {
        assert!(matches!(
            parse_request("nibe/req/", b""),
            Err(NibeSrvError::DataError(_))
        ));
        assert!(matches!(
            parse_request("nibe/req/x", b"{not json"),
            Err(NibeSrvError::DataError(_))
        ));
    }

    #[test]
    fn test_topics() {
        assert_eq!(request_filter("nibe"), "nibe/req/#");
        assert_eq!(
            result_topic("nibe", "alarm-45001"),
            "nibe/res/alarm-45001"
        );
    }

    /// Minimal broker: CONNACK the client, report its SUBSCRIBE, then
    /// return whether DISCONNECT arrives before the socket closes
    async fn fake_broker(
        listener: tokio::net::TcpListener,
        subscribed: tokio::sync::oneshot::Sender<()>,
    ) -> bool {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let connect = socket.read(&mut buf).await.unwrap();
        assert_eq!(buf[0] >> 4, 1, "expected CONNECT, got {:02x?}", &buf[..connect]);
        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let mut subscribed = Some(subscribed);
        let mut seen = Vec::new();
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => n,
            };
            seen.extend_from_slice(&buf[..n]);
            if seen.first() == Some(&0x82) {
                if let Some(tx) = subscribed.take() {
                    let _ = tx.send(());
                }
            }
            if seen.windows(2).any(|w| w == [0xE0, 0x00]) {
                return true;
            }
        }
    }

    #[tokio::test]
    async fn test_intake_sends_disconnect_on_shutdown() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (subscribed_tx, subscribed_rx) = tokio::sync::oneshot::channel();
        let broker = tokio::spawn(fake_broker(listener, subscribed_tx));

        let config = MqttConfig {
            port,
            ..Default::default()
        };
        let (bridge, eventloop) = MqttBridge::new(&config, "nibe");
        let cancel = CancellationToken::new();
        let intake = tokio::spawn({
            let cancel = cancel.clone();
            let queue = Arc::new(RequestQueue::new());
            async move { bridge.run_intake(eventloop, queue, cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), subscribed_rx)
            .await
            .unwrap()
            .unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), intake)
            .await
            .unwrap()
            .unwrap();
        let disconnected = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();
        assert!(disconnected);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
    }
}
