//! Console Controller - telemetry history, periodic redraw and operator commands
//!
//! Inbound messages are routed by [`ConsoleInbox`] on the gateway's network
//! task into a shared [`ConsoleView`]. A refresh task redraws the view on a
//! fixed period and a supervisor task reconnects after link loss. Both are
//! stopped through one cancellation token on shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dashboard::Dashboard;
use super::telemetry_buffer::{TelemetrySeries, TemperaturePoint};
use crate::config::{DashboardSettings, Settings, TopicMap};
use crate::lock_or_recover;
use crate::mqtt::{
    handler, Broker, ConnectionState, GatewayConfig, GatewayError, Message, MessageHandler,
    MqttGateway, Payload,
};
use crate::telemetry::{ControlCommand, IndicatorState};

const TIME_FORMAT: &str = "%H:%M:%S";

/// Everything the console displays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleView {
    pub temperature: TelemetrySeries<TemperaturePoint>,
    pub humidity: TelemetrySeries<f64>,
    pub indicator: IndicatorState,
}

impl ConsoleView {
    pub fn hue(&self) -> &'static str {
        self.indicator.hue()
    }
}

/// Routes inbound messages into the view by topic.
///
/// Runs on the gateway's network task. Parsing problems never escape: a
/// missing or malformed numeric field is recorded as `0.0`, an unknown
/// indicator label as `Off`.
#[derive(Clone)]
pub struct ConsoleInbox {
    topics: TopicMap,
    view: Arc<Mutex<ConsoleView>>,
}

impl ConsoleInbox {
    pub fn new(topics: TopicMap) -> Self {
        ConsoleInbox {
            topics,
            view: Arc::new(Mutex::new(ConsoleView::default())),
        }
    }

    pub fn handler(&self) -> MessageHandler {
        let inbox = self.clone();
        handler(move |message| inbox.deliver(message))
    }

    pub fn deliver(&self, message: Message) {
        if message.is_fallback() {
            warn!(
                "Payload on {} is not JSON, reading it as defaults: {:?}",
                message.topic,
                message.text()
            );
        }
        let topics = &self.topics;
        let mut view = lock_or_recover(&self.view);

        if message.topic == topics.sensor_temp {
            let value = message.number_field("temperature");
            let time = message.received_at.format(TIME_FORMAT).to_string();
            debug!("Temperature updated: {} at {}", value, time);
            view.temperature.push(TemperaturePoint { value, time });
        } else if message.topic == topics.sensor_humidity {
            let value = message.number_field("humidity");
            debug!("Humidity updated: {}", value);
            view.humidity.push(value);
        } else if message.topic == topics.led_status {
            let state = IndicatorState::from_label(message.text_field("led").unwrap_or("OFF"));
            info!("Indicator status: {} ({})", state, state.hue());
            view.indicator = state;
        } else {
            debug!("Ignoring message on unknown topic {}", message.topic);
        }
    }
}

pub struct ConsoleController<B: Broker> {
    topics: TopicMap,
    settings: DashboardSettings,
    broker: Arc<B>,
    view: Arc<Mutex<ConsoleView>>,
    dashboard: Arc<Mutex<Box<dyn Dashboard>>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsoleController<MqttGateway> {
    /// Builds a console wired to a real MQTT gateway.
    pub fn with_mqtt(settings: &Settings, dashboard: Box<dyn Dashboard>) -> Self {
        let inbox = ConsoleInbox::new(settings.topics.clone());
        let config = GatewayConfig::new(
            &settings.broker,
            settings.dashboard.client_id.clone(),
            settings.topics.console_subscriptions(),
        );
        let gateway = Arc::new(MqttGateway::new(config, inbox.handler()));
        Self::new(settings, gateway, &inbox, dashboard)
    }
}

impl<B: Broker> ConsoleController<B> {
    /// `inbox` must be the one whose handler was given to `broker`.
    pub fn new(
        settings: &Settings,
        broker: Arc<B>,
        inbox: &ConsoleInbox,
        dashboard: Box<dyn Dashboard>,
    ) -> Self {
        ConsoleController {
            topics: settings.topics.clone(),
            settings: settings.dashboard.clone(),
            broker,
            view: inbox.view.clone(),
            dashboard: Arc::new(Mutex::new(dashboard)),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Connects (a failure is logged, the supervisor keeps retrying) and
    /// starts the refresh and reconnect tasks.
    pub async fn start(&mut self) {
        info!("Starting console \"{}\"", self.settings.title);
        if let Err(e) = self.broker.connect().await {
            warn!("Initial connect failed, will retry: {}", e);
        }
        self.start_refresh();
        self.start_supervisor();
    }

    pub fn start_refresh(&mut self) {
        let task = tokio::spawn(refresh_loop(
            self.view.clone(),
            self.dashboard.clone(),
            self.settings.refresh_period(),
            self.shutdown.clone(),
        ));
        self.tasks.push(task);
    }

    pub fn start_supervisor(&mut self) {
        let task = tokio::spawn(supervise_connection(
            self.broker.clone(),
            self.settings.reconnect_period(),
            self.shutdown.clone(),
        ));
        self.tasks.push(task);
    }

    /// Sends `ON`/`OFF` to the device.
    ///
    /// Whatever the command, the displayed indicator is reset to `Off` until
    /// the device reports its next status.
    pub fn send_indicator_command(&self, on: bool) -> Result<(), GatewayError> {
        let command = ControlCommand::from(on);
        let result = self
            .broker
            .publish(&self.topics.led_control, Payload::text(command.token()));
        match &result {
            Ok(()) => info!("Indicator command {} sent", command.token()),
            Err(e) => warn!("Indicator command {} not sent: {}", command.token(), e),
        }

        lock_or_recover(&self.view).indicator = IndicatorState::Off;
        lock_or_recover(&self.dashboard)
            .show_indicator(IndicatorState::Off, IndicatorState::Off.hue());
        result
    }

    pub fn displayed_indicator(&self) -> IndicatorState {
        lock_or_recover(&self.view).indicator
    }

    /// Copy of the current view.
    pub fn view(&self) -> ConsoleView {
        lock_or_recover(&self.view).clone()
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Stops the recurring tasks, disconnects and closes the dashboard.
    ///
    /// All three steps run even when the disconnect fails; its error is
    /// returned after the dashboard has been closed.
    pub async fn shutdown(mut self) -> Result<(), GatewayError> {
        info!("Shutting down console");
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Console task ended abnormally: {}", e);
            }
        }

        let disconnected = self.broker.disconnect().await;
        if let Err(e) = &disconnected {
            warn!("Disconnect failed during shutdown: {}", e);
        }

        lock_or_recover(&self.dashboard).close();
        disconnected
    }
}

impl<B: Broker> Drop for ConsoleController<B> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Draws the current view once. Empty series are skipped.
fn render(view: &Mutex<ConsoleView>, dashboard: &Mutex<Box<dyn Dashboard>>) {
    let (temperature, humidity, indicator) = {
        let view = lock_or_recover(view);
        (
            view.temperature.snapshot(),
            view.humidity.snapshot(),
            view.indicator,
        )
    };

    let mut dashboard = lock_or_recover(dashboard);
    if !temperature.is_empty() {
        dashboard.render_temperature(&temperature);
    }
    if !humidity.is_empty() {
        dashboard.render_humidity(&humidity);
    }
    dashboard.show_indicator(indicator, indicator.hue());
}

async fn refresh_loop(
    view: Arc<Mutex<ConsoleView>>,
    dashboard: Arc<Mutex<Box<dyn Dashboard>>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!("Refresh every {:?}", period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => render(&view, &dashboard),
        }
    }
    debug!("Refresh stopped");
}

async fn supervise_connection<B: Broker>(
    broker: Arc<B>,
    period: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = time::sleep(period) => {}
        }

        if broker.state() != ConnectionState::Disconnected {
            continue;
        }

        info!("Broker connection down, reconnecting");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = broker.connect() => {
                if let Err(e) = result {
                    warn!("Reconnect failed: {}", e);
                }
            }
        }
    }
}
