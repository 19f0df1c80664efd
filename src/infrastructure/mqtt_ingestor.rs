// MQTT ingestor - Broker session, subscription and reconnect loop feeding the telemetry buffer
use crate::application::ingest_service::IngestService;
use crate::domain::connection::{
    ConnectionState, ConnectionStateMachine, Reconnect, RetryPolicy, StatusEvent,
};
use crate::infrastructure::config::BrokerSettings;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

const REQUEST_CHANNEL_CAPACITY: usize = 16;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),

    #[error("broker handshake failed: {0}")]
    Handshake(#[source] rumqttc::ConnectionError),

    #[error("broker handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("gave up after {attempts} consecutive connection failures")]
    RetriesExhausted { attempts: u32 },

    #[error("client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
}

impl From<rumqttc::ConnectionError> for ConnectionError {
    fn from(error: rumqttc::ConnectionError) -> Self {
        match error {
            rumqttc::ConnectionError::ConnectionRefused(code) => ConnectionError::Refused(code),
            other => ConnectionError::Handshake(other),
        }
    }
}

pub struct MqttIngestor {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    machine: ConnectionStateMachine,
    ingest: IngestService,
}

impl MqttIngestor {
    /// Connect, subscribe and drive the session until shutdown.
    ///
    /// Only a configured retry ceiling ends ingestion early; a failed
    /// subscribe is logged and re-issued on the next session.
    pub async fn serve(
        settings: BrokerSettings,
        policy: RetryPolicy,
        ingest: IngestService,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        let Some(mut ingestor) = Self::connect(&settings, policy, ingest, &mut shutdown).await?
        else {
            return Ok(());
        };
        if let Err(e) = ingestor.subscribe(&settings.topic) {
            tracing::warn!("Subscribe to {} failed, retrying on reconnect: {}", settings.topic, e);
        }
        ingestor.run(shutdown).await
    }

    /// Open an authenticated session and wait for the broker's CONNACK.
    ///
    /// Failed handshakes are retried with backoff under `policy`. Returns
    /// `Ok(None)` when shutdown arrives before a session is established.
    pub async fn connect(
        settings: &BrokerSettings,
        policy: RetryPolicy,
        ingest: IngestService,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Self>, ConnectionError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        options.set_credentials(&settings.username, &settings.password);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let mut ingestor = Self::from_parts(client, eventloop, policy, ingest);

        tracing::info!(
            "Connecting to MQTT broker {}:{}",
            settings.host,
            settings.port
        );
        if ingestor.establish_session(shutdown).await? {
            Ok(Some(ingestor))
        } else {
            Ok(None)
        }
    }

    fn from_parts(
        client: AsyncClient,
        eventloop: EventLoop,
        policy: RetryPolicy,
        ingest: IngestService,
    ) -> Self {
        Self {
            client,
            eventloop,
            topics: Vec::new(),
            machine: ConnectionStateMachine::new(policy),
            ingest,
        }
    }

    async fn establish_session(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, ConnectionError> {
        let event = self.machine.begin_connect();
        self.emit(event);

        loop {
            let handshake = tokio::select! {
                result = self.await_connack() => Some(result),
                _ = shutdown.wait_for(|stop| *stop) => None,
            };

            let error = match handshake {
                None => {
                    self.machine.on_disconnected();
                    return Ok(false);
                }
                Some(Ok(())) => {
                    self.on_session_established();
                    return Ok(true);
                }
                Some(Err(e)) => e,
            };

            tracing::warn!("MQTT connect failed: {}", error);
            match self.on_transport_error() {
                Reconnect::After { attempt, delay } => {
                    tracing::info!("Connect attempt {} in {:?}", attempt + 1, delay);
                    let cancelled = tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = shutdown.wait_for(|stop| *stop) => true,
                    };
                    if cancelled {
                        self.machine.on_disconnected();
                        return Ok(false);
                    }
                }
                Reconnect::GiveUp { attempts } => {
                    tracing::error!("Giving up on MQTT broker after {} attempts", attempts);
                    return Err(ConnectionError::RetriesExhausted { attempts });
                }
            }
        }
    }

    async fn await_connack(&mut self) -> Result<(), ConnectionError> {
        let eventloop = &mut self.eventloop;
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(ConnectionError::from(e)),
                }
            }
        })
        .await;

        match handshake {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(HANDSHAKE_TIMEOUT)),
        }
    }

    /// Register interest in `topic`; re-issued after every reconnect.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), ConnectionError> {
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_string());
        }
        self.client.try_subscribe(topic, QoS::AtMostOnce)?;
        tracing::info!("Subscribed to {}", topic);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Drive the session until shutdown or until the retry ceiling is hit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.disconnect().await;
                        return Ok(());
                    }
                }
                event = self.eventloop.poll() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        tracing::warn!("MQTT transport error: {}", e);
                        match self.on_transport_error() {
                            Reconnect::After { attempt, delay } => {
                                tracing::info!("Reconnect attempt {} in {:?}", attempt, delay);
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => {}
                                    _ = shutdown.changed() => {
                                        self.machine.on_disconnected();
                                        return Ok(());
                                    }
                                }
                            }
                            Reconnect::GiveUp { attempts } => {
                                tracing::error!("Giving up on MQTT broker after {} attempts", attempts);
                                return Err(ConnectionError::RetriesExhausted { attempts });
                            }
                        }
                    }
                },
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => self.on_session_established(),
            Event::Incoming(Packet::Publish(publish)) => {
                // Decode failures are reported by the ingest service; keep going
                let _ = self.ingest.handle_payload(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                tracing::debug!("Subscription acknowledged (pkid {})", ack.pkid);
            }
            _ => {}
        }
    }

    fn on_session_established(&mut self) {
        let event = self.machine.on_connected();
        self.emit(event);
        tracing::info!("MQTT session established");
        for topic in &self.topics {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                tracing::warn!("Failed to resubscribe to {}: {}", topic, e);
            }
        }
    }

    fn on_transport_error(&mut self) -> Reconnect {
        let (next, event) = self.machine.on_transport_error();
        self.emit(event);
        next
    }

    async fn disconnect(&mut self) {
        if self.machine.state() == ConnectionState::Connected {
            for topic in &self.topics {
                let _ = self.client.try_unsubscribe(topic.as_str());
            }
            if let Err(e) = self.client.try_disconnect() {
                tracing::debug!("Disconnect request failed: {}", e);
            }

            // Flush the DISCONNECT packet
            let eventloop = &mut self.eventloop;
            let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            })
            .await;
        }
        self.machine.on_disconnected();
        tracing::info!("MQTT ingestor disconnected");
    }

    fn emit(&self, event: Option<StatusEvent>) {
        if let Some(event) = event {
            self.ingest.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::sinks::testing::RecordingSink;
    use crate::application::telemetry_buffer::TelemetryBuffer;
    use rumqttc::{ConnAck, Publish};
    use std::num::NonZeroUsize;
    use std::sync::Arc;

    fn ingestor(max_retries: Option<u32>) -> (MqttIngestor, Arc<TelemetryBuffer>, Arc<RecordingSink>) {
        let buffer = Arc::new(TelemetryBuffer::new(NonZeroUsize::new(5).unwrap()));
        let sink = Arc::new(RecordingSink::default());
        let ingest = IngestService::new(buffer.clone(), sink.clone());
        let (client, eventloop) =
            AsyncClient::new(MqttOptions::new("test", "localhost", 1883), REQUEST_CHANNEL_CAPACITY);
        (
            MqttIngestor::from_parts(client, eventloop, policy(max_retries), ingest),
            buffer,
            sink,
        )
    }

    fn policy(max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_retries,
        }
    }

    // Nothing listens on port 1, so every handshake is refused
    fn unreachable_broker() -> BrokerSettings {
        BrokerSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "collector-test".to_string(),
            username: "user".to_string(),
            password: "secret".to_string(),
            topic: "lab/temp".to_string(),
            keep_alive_secs: 60,
        }
    }

    fn recording_ingest() -> (IngestService, Arc<RecordingSink>) {
        let buffer = Arc::new(TelemetryBuffer::new(NonZeroUsize::new(5).unwrap()));
        let sink = Arc::new(RecordingSink::default());
        (IngestService::new(buffer, sink.clone()), sink)
    }

    fn publish(payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            "lab/temp",
            QoS::AtMostOnce,
            payload.as_bytes().to_vec(),
        )))
    }

    fn connack() -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }))
    }

    #[tokio::test]
    async fn test_publish_is_buffered() {
        let (mut ingestor, buffer, _sink) = ingestor(None);
        ingestor.handle_event(publish("21.5"));
        ingestor.handle_event(publish("22"));

        let values: Vec<f64> = buffer.snapshot().iter().map(|s| s.value).collect();
        assert_eq!(values, vec![21.5, 22.0]);
    }

    #[tokio::test]
    async fn test_malformed_publish_is_dropped() {
        let (mut ingestor, buffer, sink) = ingestor(None);
        ingestor.handle_event(publish("20"));
        let before = buffer.snapshot();

        ingestor.handle_event(publish("abc"));

        assert_eq!(buffer.snapshot(), before);
        assert!(matches!(
            sink.events.lock().unwrap().last(),
            Some(StatusEvent::MessageDecodeError { .. })
        ));
    }

    #[tokio::test]
    async fn test_reconnect_cycle_reports_status() {
        let (mut ingestor, _buffer, sink) = ingestor(None);
        ingestor.handle_event(connack());
        assert_eq!(ingestor.state(), ConnectionState::Connected);

        let next = ingestor.on_transport_error();
        assert_eq!(
            next,
            Reconnect::After {
                attempt: 1,
                delay: Duration::from_millis(10)
            }
        );
        assert_eq!(ingestor.state(), ConnectionState::Connecting);

        ingestor.handle_event(connack());
        assert_eq!(ingestor.state(), ConnectionState::Connected);
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec![
                StatusEvent::Connected,
                StatusEvent::Connecting,
                StatusEvent::Connected
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_ceiling_surfaces_failed() {
        let (mut ingestor, _buffer, sink) = ingestor(Some(1));
        ingestor.handle_event(connack());

        assert!(matches!(ingestor.on_transport_error(), Reconnect::After { .. }));
        assert_eq!(
            ingestor.on_transport_error(),
            Reconnect::GiveUp { attempts: 2 }
        );
        assert_eq!(ingestor.state(), ConnectionState::Failed);
        assert_eq!(sink.events.lock().unwrap().last(), Some(&StatusEvent::Failed));
    }

    #[tokio::test]
    async fn test_subscribe_records_topic_once() {
        let (mut ingestor, _buffer, _sink) = ingestor(None);
        ingestor.subscribe("lab/temp").unwrap();
        ingestor.subscribe("lab/temp").unwrap();
        assert_eq!(ingestor.topics, vec!["lab/temp".to_string()]);
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let (ingestor, _buffer, _sink) = ingestor(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(ingestor.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("ingestor did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_topic_for_resubscribe() {
        let (ingest, _sink) = recording_ingest();
        let options = MqttOptions::new("test", "localhost", 1883);
        let (client, orphaned) = AsyncClient::new(options.clone(), REQUEST_CHANNEL_CAPACITY);
        let (_, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        drop(orphaned);
        let mut ingestor = MqttIngestor::from_parts(client, eventloop, policy(None), ingest);

        assert!(matches!(
            ingestor.subscribe("lab/temp"),
            Err(ConnectionError::Client(_))
        ));
        assert_eq!(ingestor.topics, vec!["lab/temp".to_string()]);
    }

    #[tokio::test]
    async fn test_refused_initial_connect_keeps_retrying_when_unbounded() {
        let (ingest, sink) = recording_ingest();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(MqttIngestor::serve(
            unreachable_broker(),
            policy(None),
            ingest,
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("ingestor did not stop")
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(*sink.events.lock().unwrap(), vec![StatusEvent::Connecting]);
    }

    #[tokio::test]
    async fn test_refused_initial_connect_fails_at_retry_ceiling() {
        let (ingest, sink) = recording_ingest();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            MqttIngestor::serve(unreachable_broker(), policy(Some(1)), ingest, shutdown_rx),
        )
        .await
        .expect("ingestor did not give up");

        assert!(matches!(
            result,
            Err(ConnectionError::RetriesExhausted { attempts: 2 })
        ));
        assert_eq!(
            *sink.events.lock().unwrap(),
            vec![StatusEvent::Connecting, StatusEvent::Failed]
        );
    }
}
