//! In-process broker and collaborator fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::console::{Dashboard, TemperaturePoint};
use crate::device::{Actuator, Lamp, LinkMonitor, Reading, Sensor, SensorError};
use crate::lock_or_recover;
use crate::mqtt::{Broker, ConnectionState, GatewayError, Message, MessageHandler, Payload};
use crate::telemetry::IndicatorState;

struct Client {
    subscriptions: Vec<String>,
    handler: MessageHandler,
    connected: AtomicBool,
}

/// Routes publishes between the [`LoopbackBroker`]s created from it.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    clients: Arc<Mutex<Vec<Arc<Client>>>>,
}

impl LoopbackHub {
    pub fn client(&self, subscriptions: Vec<String>, handler: MessageHandler) -> LoopbackBroker {
        let client = Arc::new(Client {
            subscriptions,
            handler,
            connected: AtomicBool::new(false),
        });
        lock_or_recover(&self.clients).push(client.clone());
        LoopbackBroker {
            hub: self.clone(),
            client,
            published: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            drop_after: Mutex::new(None),
        }
    }

    fn route(&self, topic: &str, bytes: &[u8]) {
        let targets: Vec<Arc<Client>> = lock_or_recover(&self.clients)
            .iter()
            .filter(|c| c.connected.load(Ordering::SeqCst))
            .filter(|c| c.subscriptions.iter().any(|s| s == topic))
            .cloned()
            .collect();
        for target in targets {
            (target.handler)(Message::from_publish(topic, bytes));
        }
    }
}

/// [`Broker`] that delivers synchronously through a [`LoopbackHub`] and
/// records everything it publishes.
pub struct LoopbackBroker {
    hub: LoopbackHub,
    client: Arc<Client>,
    published: Mutex<Vec<(String, Payload)>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    fail_disconnect: AtomicBool,
    drop_after: Mutex<Option<usize>>,
}

impl LoopbackBroker {
    pub fn standalone(subscriptions: Vec<String>, handler: MessageHandler) -> Self {
        LoopbackHub::default().client(subscriptions, handler)
    }

    pub fn published(&self) -> Vec<(String, Payload)> {
        lock_or_recover(&self.published).clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Payload> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p)
            .collect()
    }

    /// Hands a message straight to this client's handler, as if the broker
    /// had delivered it.
    pub fn inject(&self, topic: &str, bytes: &[u8]) {
        (self.client.handler)(Message::from_publish(topic, bytes));
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn drop_link(&self) {
        self.client.connected.store(false, Ordering::SeqCst);
    }

    /// Loses the link right after the next `n` successful publishes.
    pub fn drop_link_after(&self, n: usize) {
        *lock_or_recover(&self.drop_after) = Some(n);
    }
}

impl Broker for LoopbackBroker {
    async fn connect(&self) -> Result<(), GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("NotAuthorized".into()));
        }
        self.client.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        self.client.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(GatewayError::Link("socket already closed".into()));
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Payload) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::NotConnected);
        }
        lock_or_recover(&self.published).push((topic.to_string(), payload.clone()));
        self.hub.route(topic, &payload.encode());

        let mut drop_after = lock_or_recover(&self.drop_after);
        if let Some(remaining) = drop_after.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                *drop_after = None;
                self.drop_link();
            }
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        if self.client.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

/// Sensor returning a fixed script, then failing once it runs out.
pub struct ScriptedSensor {
    script: VecDeque<Result<Reading, SensorError>>,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Result<Reading, SensorError>>) -> Self {
        ScriptedSensor {
            script: script.into(),
        }
    }
}

impl Sensor for ScriptedSensor {
    fn measure(&mut self) -> Result<Reading, SensorError> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(SensorError::NoResponse("script exhausted".into())))
    }
}

/// Actuator whose lamp states stay observable after it is boxed.
#[derive(Clone, Default)]
pub struct SharedLamps {
    lamps: Arc<Mutex<HashMap<Lamp, bool>>>,
}

impl SharedLamps {
    pub fn is_on(&self, lamp: Lamp) -> bool {
        lock_or_recover(&self.lamps)
            .get(&lamp)
            .copied()
            .unwrap_or(false)
    }
}

impl Actuator for SharedLamps {
    fn set(&mut self, lamp: Lamp, on: bool) {
        lock_or_recover(&self.lamps).insert(lamp, on);
    }
}

#[derive(Clone)]
pub struct SwitchableLink(Arc<AtomicBool>);

impl SwitchableLink {
    pub fn up() -> Self {
        SwitchableLink(Arc::new(AtomicBool::new(true)))
    }

    pub fn set(&self, up: bool) {
        self.0.store(up, Ordering::SeqCst);
    }
}

impl LinkMonitor for SwitchableLink {
    fn is_up(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct DashboardState {
    temperature_renders: usize,
    humidity_renders: usize,
    last_temperature_len: usize,
    last_indicator: Option<IndicatorState>,
    closed: bool,
}

/// Read side of a [`RecordingDashboard`].
#[derive(Clone, Default)]
pub struct DashboardLog(Arc<Mutex<DashboardState>>);

impl DashboardLog {
    pub fn temperature_renders(&self) -> usize {
        lock_or_recover(&self.0).temperature_renders
    }

    pub fn humidity_renders(&self) -> usize {
        lock_or_recover(&self.0).humidity_renders
    }

    pub fn last_temperature_len(&self) -> usize {
        lock_or_recover(&self.0).last_temperature_len
    }

    pub fn last_indicator(&self) -> Option<IndicatorState> {
        lock_or_recover(&self.0).last_indicator
    }

    pub fn closed(&self) -> bool {
        lock_or_recover(&self.0).closed
    }
}

pub struct RecordingDashboard(DashboardLog);

impl RecordingDashboard {
    pub fn new() -> (Self, DashboardLog) {
        let log = DashboardLog::default();
        (RecordingDashboard(log.clone()), log)
    }
}

impl Dashboard for RecordingDashboard {
    fn render_temperature(&mut self, points: &[TemperaturePoint]) {
        let mut state = lock_or_recover(&self.0 .0);
        state.temperature_renders += 1;
        state.last_temperature_len = points.len();
    }

    fn render_humidity(&mut self, _values: &[f64]) {
        lock_or_recover(&self.0 .0).humidity_renders += 1;
    }

    fn show_indicator(&mut self, state: IndicatorState, _hue: &'static str) {
        lock_or_recover(&self.0 .0).last_indicator = Some(state);
    }

    fn close(&mut self) {
        lock_or_recover(&self.0 .0).closed = true;
    }
}
