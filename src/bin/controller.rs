//! Sensor/actuator controller, host-side.
//!
//! Drives the pure state machine in `antares_capsule::controller` against a
//! real serial link to the camera node. Button events come from stdin
//! (`s` = short press, `e` = select, `l` = long press); sensor readings are
//! simulated on a bench rig, actuator outputs are logged.

use antares_capsule::controller::{
    Action, ButtonEvent, Controller, Mode, SensorReadings, Settings,
};
use anyhow::Result;
use std::io::{BufRead, Write};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

enum LinkWriter {
    Serial(std_mpsc::Sender<String>),
    Console,
}

impl LinkWriter {
    fn send_line(&self, line: String) {
        match self {
            LinkWriter::Serial(tx) => {
                if tx.send(line).is_err() {
                    error!("serial writer thread is gone");
                }
            }
            LinkWriter::Console => println!("{}", line),
        }
    }
}

fn open_link() -> Result<LinkWriter> {
    let Some(port_path) = std::env::var("SERIAL_PORT").ok() else {
        warn!("no SERIAL_PORT set, printing serial traffic to stdout");
        return Ok(LinkWriter::Console);
    };
    let baud_rate = std::env::var("BAUD_RATE")
        .unwrap_or_else(|_| "115200".to_string())
        .parse::<u32>()
        .unwrap_or(115200);

    let mut port = serialport::new(&port_path, baud_rate)
        .timeout(Duration::from_millis(500))
        .open()?;
    info!("📡 serial link open on {} @ {} baud", port_path, baud_rate);

    let (tx, rx) = std_mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("serial-writer".into())
        .spawn(move || {
            for line in rx {
                if let Err(e) = writeln!(port, "{}", line) {
                    error!("serial write failed: {}", e);
                    break;
                }
            }
        })?;
    Ok(LinkWriter::Serial(tx))
}

fn spawn_button_reader(tx: mpsc::UnboundedSender<ButtonEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "s" | "short" => ButtonEvent::Short,
                "e" | "select" => ButtonEvent::Select,
                "l" | "long" => ButtonEvent::Long,
                "" => continue,
                other => {
                    warn!("unknown input {:?} (use s/e/l)", other);
                    continue;
                }
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });
}

/// Bench-rig stand-ins for the DHT and soil probes: slow drifts around a
/// configurable baseline.
fn simulated_readings(started: Instant, now: Instant, base_temp: f32) -> SensorReadings {
    let t = now.duration_since(started).as_secs_f32();
    SensorReadings {
        temperature: Some(base_temp + 2.0 * (t / 60.0).sin()),
        humidity: Some(55.0 + 5.0 * (t / 90.0).cos()),
        soil: 400 + ((t * 2.0) as u16) % 50,
    }
}

fn apply(action: Action, link: &LinkWriter) {
    match action {
        Action::SerialSend(line) => link.send_line(line),
        Action::SetHeaterDuty(duty) => info!("🔥 heater duty -> {}", duty),
        Action::SetFans { fan_a, fan_b } => info!("🌀 fans -> A:{} B:{}", fan_a, fan_b),
        Action::StepTurntable { steps } => info!("🔄 turntable +{} steps", steps),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    // Boot-time binary choice, same as holding the panel button at reset.
    let mode = match std::env::args().nth(1).as_deref() {
        Some("manual") => Mode::Manual,
        _ => Mode::Autonomous,
    };
    let base_temp = std::env::var("SIM_BASE_TEMP")
        .unwrap_or_else(|_| "23.0".to_string())
        .parse::<f32>()
        .unwrap_or(23.0);

    let link = open_link()?;
    let (button_tx, mut button_rx) = mpsc::unbounded_channel();
    spawn_button_reader(button_tx);

    let started = Instant::now();
    let mut controller = Controller::new(mode, Settings::default(), started);
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut last_display = String::new();

    info!("🎛️ controller up in {:?} mode (buttons: s/e/l + enter)", mode);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let readings = simulated_readings(started, now, base_temp);
                for action in controller.tick(now, readings) {
                    apply(action, &link);
                }
                let panel_line = controller.display_line(now);
                if panel_line != last_display {
                    info!("{}", panel_line);
                    last_display = panel_line;
                }
            }
            event = button_rx.recv() => {
                let Some(event) = event else { break };
                let now = Instant::now();
                for action in controller.on_button(event, now) {
                    apply(action, &link);
                }
            }
        }
    }

    Ok(())
}
