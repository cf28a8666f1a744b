use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::GatewayConfig;
use super::message_manager::{Message, MessageHandler, Payload};
use crate::lock_or_recover;

/// Capacity of the request queue between client handle and event loop.
const REQUEST_CAPACITY: usize = 64;

/// Time the network task gets to flush a DISCONNECT before it is aborted.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Counters kept per gateway instance.
#[derive(Clone, Debug, Default)]
pub struct GatewayStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport could not reach the broker or dropped mid-session
    #[error("Broker unreachable: {0}")]
    Link(String),

    /// Broker refused the handshake, e.g. bad credentials
    #[error("Broker rejected connection: {0}")]
    Rejected(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("No answer from broker within {0:?}")]
    Timeout(Duration),

    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Connection to a publish/subscribe broker as seen by an endpoint controller.
///
/// Implemented by [`MqttGateway`] for real brokers. Controllers are generic over
/// this trait so they can run against an in-process broker as well.
pub trait Broker: Send + Sync + 'static {
    /// Connects and subscribes to every configured topic. Failure is non-fatal;
    /// the caller owns the retry policy.
    fn connect(&self) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Tears the connection down. Calling it while disconnected is a no-op.
    fn disconnect(&self) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Fire-and-forget publish; fails immediately when not connected.
    fn publish(&self, topic: &str, payload: Payload) -> Result<(), GatewayError>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    status: Mutex<GatewayStatus>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        lock_or_recover(&self.status).connection_state = state;
    }

    fn record_connected(&self) {
        lock_or_recover(&self.status).last_error = None;
        self.set_state(ConnectionState::Connected);
    }

    fn record_received(&self) {
        let mut status = lock_or_recover(&self.status);
        status.messages_received += 1;
        status.last_activity = Some(Local::now());
    }

    fn record_sent(&self) {
        let mut status = lock_or_recover(&self.status);
        status.messages_sent += 1;
        status.last_activity = Some(Local::now());
    }

    fn record_error(&self, error: &GatewayError) {
        lock_or_recover(&self.status).last_error = Some(error.to_string());
    }
}

/// Falls back to `Disconnected` unless the attempt it guards completes,
/// so a connect future dropped mid-handshake cannot leave `Connecting` behind.
struct ConnectAttempt<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(shared: &'a Shared) -> Self {
        shared.set_state(ConnectionState::Connecting);
        ConnectAttempt {
            shared,
            finished: false,
        }
    }

    fn succeed(mut self) {
        self.finished = true;
        self.shared.record_connected();
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.set_state(ConnectionState::Disconnected);
        }
    }
}

struct Session {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// MQTT implementation of [`Broker`].
///
/// Owns at most one live session. The session's event loop runs on its own
/// tokio task and calls the handler for every inbound PUBLISH, so the handler
/// must be cheap and thread-safe. Reconnection is never automatic: when the
/// link drops the task ends, the state falls back to `Disconnected`, and the
/// owner decides when to call `connect` again. Every successful connect
/// re-issues the subscriptions before any message can be dispatched.
pub struct MqttGateway {
    config: GatewayConfig,
    handler: MessageHandler,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl MqttGateway {
    pub fn new(config: GatewayConfig, handler: MessageHandler) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        MqttGateway {
            config,
            handler,
            shared: Arc::new(Shared {
                state,
                status: Mutex::new(GatewayStatus::default()),
            }),
            session: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Receiver that observes every connection state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn status(&self) -> GatewayStatus {
        lock_or_recover(&self.shared.status).clone()
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options
            .set_keep_alive(self.config.keepalive)
            .set_clean_session(true);
        if let Some((user, pw)) = &self.config.credentials {
            options.set_credentials(user.clone(), pw.clone());
        }
        options
    }

    fn fail(&self, error: GatewayError) -> GatewayError {
        error!("Connection to {}:{} failed: {}", self.config.host, self.config.port, error);
        self.shared.record_error(&error);
        self.shared.set_state(ConnectionState::Disconnected);
        error
    }
}

impl Broker for MqttGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == ConnectionState::Connected {
            debug!("Already connected, skipping connect");
            return Ok(());
        }

        // A previous session whose link dropped is finished but still stored.
        if let Some(stale) = lock_or_recover(&self.session).take() {
            stale.task.abort();
        }

        let attempt = ConnectAttempt::begin(&self.shared);
        info!(
            "Connecting to broker {}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);

        match tokio::time::timeout(self.config.connect_timeout, await_connack(&mut eventloop)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(GatewayError::Timeout(self.config.connect_timeout))),
        }

        // Queued ahead of the dispatch loop so no publish is delivered before
        // the subscriptions are on the wire.
        for topic in &self.config.subscriptions {
            if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                return Err(self.fail(e.into()));
            }
            debug!("Subscribed to {}", topic);
        }

        attempt.succeed();
        let task = tokio::spawn(network_loop(
            eventloop,
            self.handler.clone(),
            self.shared.clone(),
        ));
        *lock_or_recover(&self.session) = Some(Session { client, task });

        info!(
            "Connected to {}:{}, subscribed to {} topics",
            self.config.host,
            self.config.port,
            self.config.subscriptions.len()
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        let session = lock_or_recover(&self.session).take();
        let Some(Session { client, mut task }) = session else {
            debug!("Disconnect requested while already disconnected");
            self.shared.set_state(ConnectionState::Disconnected);
            return Ok(());
        };

        let loop_alive = !task.is_finished();
        let request = client.try_disconnect();

        let result = match request {
            Ok(()) => {
                if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                    warn!("Network task did not stop in time, aborting it");
                    task.abort();
                }
                Ok(())
            }
            Err(e) => {
                task.abort();
                if loop_alive {
                    warn!("Could not send DISCONNECT: {}", e);
                    Err(GatewayError::from(e))
                } else {
                    Ok(())
                }
            }
        };

        self.shared.set_state(ConnectionState::Disconnected);
        info!("Disconnected from broker");
        result
    }

    fn publish(&self, topic: &str, payload: Payload) -> Result<(), GatewayError> {
        if self.state() != ConnectionState::Connected {
            debug!("Dropping publish to {}: not connected", topic);
            return Err(GatewayError::NotConnected);
        }

        let session = lock_or_recover(&self.session);
        let Some(session) = session.as_ref() else {
            return Err(GatewayError::NotConnected);
        };

        session
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.encode())?;
        self.shared.record_sent();
        debug!("Published to {}", topic);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }
}

impl Drop for MqttGateway {
    fn drop(&mut self) {
        if let Some(session) = lock_or_recover(&self.session).take() {
            session.task.abort();
        }
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), GatewayError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(GatewayError::Rejected(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => debug!("Ignoring {:?} while waiting for CONNACK", event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(GatewayError::Rejected(format!("{:?}", code)))
            }
            Err(e) => return Err(GatewayError::Link(e.to_string())),
        }
    }
}

/// Drives the event loop until the session ends. Polling again after an
/// error would make the library reconnect on its own, so the loop stops instead.
async fn network_loop(mut eventloop: EventLoop, handler: MessageHandler, shared: Arc<Shared>) {
    debug!("Network loop started");
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = Message::from_publish(publish.topic.as_str(), &publish.payload);
                shared.record_received();
                debug!("Received {}", message);
                handler(message);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!("Subscription {} acknowledged", ack.pkid);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker closed the session");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let error = GatewayError::Link(e.to_string());
                warn!("Lost connection to broker: {}", error);
                shared.record_error(&error);
                break;
            }
        }
    }
    shared.set_state(ConnectionState::Disconnected);
    debug!("Network loop stopped");
}
