//! Device and console wired together through one in-process broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::console::{ConsoleController, ConsoleInbox};
use crate::device::{control_inbox, DeviceController, DeviceHardware, Lamp, Reading, SensorError};
use crate::mqtt::{handler, Broker, Message};
use crate::telemetry::IndicatorState;
use crate::testing::{
    LoopbackBroker, LoopbackHub, RecordingDashboard, ScriptedSensor, SharedLamps, SwitchableLink,
};

struct Stage {
    settings: Settings,
    device: DeviceController<LoopbackBroker>,
    console: ConsoleController<LoopbackBroker>,
    lamps: SharedLamps,
    control_spy: Arc<Mutex<Vec<Message>>>,
}

async fn stage(readings: Vec<f64>) -> Stage {
    let settings = Settings::default();
    let hub = LoopbackHub::default();

    let inbox = ConsoleInbox::new(settings.topics.clone());
    let console_broker = Arc::new(hub.client(settings.topics.console_subscriptions(), inbox.handler()));
    let (dashboard, _) = RecordingDashboard::new();
    let console = ConsoleController::new(&settings, console_broker.clone(), &inbox, Box::new(dashboard));

    let (device_handler, device_inbox) = control_inbox();
    let device_broker = Arc::new(hub.client(settings.topics.device_subscriptions(), device_handler));
    let lamps = SharedLamps::default();
    let script: Vec<Result<Reading, SensorError>> = readings
        .into_iter()
        .map(|temperature| {
            Ok(Reading {
                temperature,
                humidity: 48.0,
            })
        })
        .collect();
    let hardware = DeviceHardware {
        sensor: Box::new(ScriptedSensor::new(script)),
        actuator: Box::new(lamps.clone()),
        link: Box::new(SwitchableLink::up()),
    };
    let device = DeviceController::new(&settings, device_broker.clone(), device_inbox, hardware);

    let control_spy = Arc::new(Mutex::new(Vec::new()));
    let spy = control_spy.clone();
    let spy_broker = hub.client(
        vec![settings.topics.led_control.clone()],
        handler(move |message| spy.lock().unwrap().push(message)),
    );

    console_broker.connect().await.unwrap();
    device_broker.connect().await.unwrap();
    spy_broker.connect().await.unwrap();
    // The hub keeps the spy's routing entry alive.
    drop(spy_broker);

    Stage {
        settings,
        device,
        console,
        lamps,
        control_spy,
    }
}

#[tokio::test]
async fn device_reading_reaches_console() {
    let mut stage = stage(vec![32.0]).await;

    stage.device.run_cycle().await.unwrap();

    let view = stage.console.view();
    assert_eq!(view.temperature.len(), 1);
    assert_eq!(view.temperature.latest().map(|p| p.value), Some(32.0));
    assert_eq!(view.humidity.latest(), Some(&48.0));
    assert_eq!(view.indicator, IndicatorState::Red);
    assert_eq!(view.hue(), IndicatorState::Red.hue());
}

#[tokio::test]
async fn off_then_on_round_trip_restores_thresholds() {
    let mut stage = stage(vec![22.0, 22.0, 22.0]).await;

    stage.device.run_cycle().await.unwrap();
    assert_eq!(stage.console.displayed_indicator(), IndicatorState::Green);

    stage.console.send_indicator_command(false).unwrap();
    stage.device.drain_inbox();
    assert!(stage.device.override_active());
    stage.device.run_cycle().await.unwrap();
    assert_eq!(stage.console.displayed_indicator(), IndicatorState::Off);

    stage.console.send_indicator_command(true).unwrap();
    stage.device.drain_inbox();
    assert!(!stage.device.override_active());
    stage.device.run_cycle().await.unwrap();
    assert_eq!(stage.console.displayed_indicator(), IndicatorState::Green);
}

#[tokio::test(start_paused = true)]
async fn console_off_command_clears_device_lamps_before_next_cycle() {
    let stage = stage(vec![33.0, 33.0, 33.0]).await;
    let shutdown = CancellationToken::new();
    let period = stage.settings.device.cycle_period();
    let lamps = stage.lamps.clone();
    let console = stage.console;
    let device = tokio::spawn(stage.device.run(shutdown.clone()));

    // First cycle runs immediately.
    time::sleep(Duration::from_millis(100)).await;
    assert!(lamps.is_on(Lamp::Red));
    assert_eq!(console.displayed_indicator(), IndicatorState::Red);

    console.send_indicator_command(false).unwrap();
    {
        let seen = stage.control_spy.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text(), "OFF");
    }

    time::sleep(Duration::from_millis(10)).await;
    assert!(period > Duration::from_millis(110));
    for lamp in [Lamp::Red, Lamp::Yellow, Lamp::Green, Lamp::Mode] {
        assert!(!lamps.is_on(lamp), "{:?} still lit", lamp);
    }

    time::sleep(period).await;
    assert_eq!(console.displayed_indicator(), IndicatorState::Off);
    assert!(!lamps.is_on(Lamp::Red));

    shutdown.cancel();
    device.await.unwrap();
    console.shutdown().await.unwrap();
}
