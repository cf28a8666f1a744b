//! Device Controller - periodic measure/decide/publish cycle plus override handling
//!
//! Each cycle probes the link and the broker connection, reads the sensor,
//! derives the indicator state and publishes three independent reports.
//! Control messages arrive from the gateway's network task through an
//! unbounded inbox and are applied by the controller task itself, so the
//! override flag and the lamps have a single writer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::hardware::{Actuator, Lamp, LinkMonitor, Reading, Sensor, SensorError};
use crate::config::{DeviceSettings, Settings, TopicMap};
use crate::mqtt::{
    handler, Broker, GatewayConfig, GatewayError, Message, MessageHandler, MqttGateway, Payload,
};
use crate::telemetry::{
    unix_now, ControlCommand, HumidityReport, IndicatorReport, IndicatorState, TemperatureReport,
};

/// Reasons a cycle is abandoned before it publishes anything.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Network link is down")]
    LinkDown,

    #[error("Broker connection failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Result of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published {
        reading: Reading,
        indicator: IndicatorState,
        /// Number of the three reports that could not be sent
        failed: usize,
    },
    /// Sensor read failed; nothing was published
    SensorUnavailable,
}

/// The device's external collaborators.
pub struct DeviceHardware {
    pub sensor: Box<dyn Sensor>,
    pub actuator: Box<dyn Actuator>,
    pub link: Box<dyn LinkMonitor>,
}

/// Creates the handler/inbox pair connecting a gateway to a device controller.
pub fn control_inbox() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler(move |message| {
        if tx.send(message).is_err() {
            debug!("Device controller stopped, dropping inbound message");
        }
    });
    (handler, rx)
}

pub struct DeviceController<B: Broker> {
    settings: DeviceSettings,
    topics: TopicMap,
    broker: Arc<B>,
    hardware: DeviceHardware,
    inbox: mpsc::UnboundedReceiver<Message>,
    override_active: bool,
    indicator: IndicatorState,
}

impl DeviceController<MqttGateway> {
    /// Builds a controller wired to a real MQTT gateway.
    pub fn with_mqtt(settings: &Settings, hardware: DeviceHardware) -> Self {
        let (handler, inbox) = control_inbox();
        let config = GatewayConfig::new(
            &settings.broker,
            settings.device.client_id.clone(),
            settings.topics.device_subscriptions(),
        )
        .with_connect_timeout(settings.device.connect_timeout());
        let gateway = Arc::new(MqttGateway::new(config, handler));
        Self::new(settings, gateway, inbox, hardware)
    }
}

impl<B: Broker> DeviceController<B> {
    pub fn new(
        settings: &Settings,
        broker: Arc<B>,
        inbox: mpsc::UnboundedReceiver<Message>,
        hardware: DeviceHardware,
    ) -> Self {
        info!(
            "Device controller {} publishing every {}s",
            settings.device.client_id, settings.device.publish_interval
        );
        DeviceController {
            settings: settings.device.clone(),
            topics: settings.topics.clone(),
            broker,
            hardware,
            inbox,
            override_active: false,
            indicator: IndicatorState::Off,
        }
    }

    pub fn override_active(&self) -> bool {
        self.override_active
    }

    pub fn indicator(&self) -> IndicatorState {
        self.indicator
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Runs one control cycle.
    ///
    /// Link and connection problems are returned as errors so the caller can
    /// back off. A failed sensor read is not an error: the cycle is skipped and
    /// nothing is published. Individual publish failures are counted but do
    /// not stop the remaining reports.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, DeviceError> {
        if !self.hardware.link.is_up() {
            return Err(DeviceError::LinkDown);
        }

        if !self.broker.is_connected() {
            warn!("Broker connection lost, reconnecting");
            self.broker.connect().await?;
        }

        let reading = match self.read_sensor() {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Skipping cycle, sensor read failed: {}", e);
                return Ok(CycleOutcome::SensorUnavailable);
            }
        };

        if !self.override_active {
            self.show_indicator(IndicatorState::from_temperature(reading.temperature));
        }

        let failed = self.publish_reports(reading, unix_now());
        info!(
            "Published temp={:.2}°C hum={:.2}% led={}{}",
            reading.temperature,
            reading.humidity,
            self.indicator,
            if failed > 0 {
                format!(" ({} of 3 failed)", failed)
            } else {
                String::new()
            }
        );

        Ok(CycleOutcome::Published {
            reading,
            indicator: self.indicator,
            failed,
        })
    }

    /// Applies one inbound message. Only the control topic is acted on.
    pub fn handle_message(&mut self, message: &Message) {
        if message.topic != self.topics.led_control {
            debug!("Ignoring message on unrelated topic {}", message.topic);
            return;
        }

        match ControlCommand::parse(message.text()) {
            Some(command) => self.apply_command(command),
            None => debug!("Ignoring unrecognised control payload {:?}", message.text()),
        }
    }

    /// Sets or clears the override. `Off` takes effect on the lamps at once;
    /// `On` hands the lamps back to the next cycle.
    pub fn apply_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::On => {
                self.override_active = false;
                self.hardware.actuator.set(Lamp::Mode, true);
                info!("Automatic mode active, thresholds apply from the next cycle");
            }
            ControlCommand::Off => {
                self.override_active = true;
                self.hardware.actuator.set(Lamp::Mode, false);
                self.show_indicator(IndicatorState::Off);
                info!("Manual override active, indicator forced off");
            }
        }
    }

    /// Applies every queued control message without waiting. Returns the count.
    pub fn drain_inbox(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(message) = self.inbox.try_recv() {
            self.handle_message(&message);
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} control messages", drained);
        }
        drained
    }

    /// Control loop. Runs until `shutdown` is cancelled, then disconnects.
    ///
    /// Control messages are applied as soon as they arrive, also while the
    /// loop is waiting for the next tick. A failed cycle is followed by the
    /// configured backoff and an immediate retry.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Starting device control loop, period {:?}",
            self.settings.cycle_period()
        );
        let mut ticker = time::interval(self.settings.cycle_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(message) = self.inbox.recv() => self.handle_message(&message),
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(outcome) => debug!("Cycle finished: {:?}", outcome),
                        Err(e) => {
                            error!("Cycle failed: {}", e);
                            self.drain_inbox();
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = time::sleep(self.settings.backoff()) => {}
                            }
                            ticker.reset_immediately();
                            continue;
                        }
                    }
                    self.drain_inbox();
                }
            }
        }

        info!("Device control loop stopping");
        if let Err(e) = self.broker.disconnect().await {
            warn!("Disconnect during shutdown failed: {}", e);
        }
    }

    fn read_sensor(&mut self) -> Result<Reading, SensorError> {
        let reading = self.hardware.sensor.measure()?;
        if !reading.temperature.is_finite() || !reading.humidity.is_finite() {
            return Err(SensorError::InvalidData(format!("{:?}", reading)));
        }
        debug!(
            "Sensor: temperature {:.2}°C, humidity {:.2}%",
            reading.temperature, reading.humidity
        );
        Ok(reading)
    }

    /// Lights exactly the lamp for `state` (none for `Off`).
    fn show_indicator(&mut self, state: IndicatorState) {
        let lit = Lamp::for_state(state);
        for lamp in Lamp::INDICATORS {
            self.hardware.actuator.set(lamp, Some(lamp) == lit);
        }
        self.indicator = state;
    }

    fn publish_reports(&self, reading: Reading, timestamp: i64) -> usize {
        let reports = [
            (
                &self.topics.sensor_temp,
                Payload::structured(&TemperatureReport {
                    temperature: reading.temperature,
                    timestamp,
                }),
            ),
            (
                &self.topics.sensor_humidity,
                Payload::structured(&HumidityReport {
                    humidity: reading.humidity,
                    timestamp,
                }),
            ),
            (
                &self.topics.led_status,
                Payload::structured(&IndicatorReport {
                    led: self.indicator,
                    timestamp,
                }),
            ),
        ];

        let mut failed = 0;
        for (topic, payload) in reports {
            let result = payload
                .map_err(GatewayError::from)
                .and_then(|payload| self.broker.publish(topic, payload));
            if let Err(e) = result {
                warn!("Publish to {} failed: {}", topic, e);
                failed += 1;
            }
        }
        failed
    }
}
