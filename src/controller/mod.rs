//! Sensor/actuator controller state machine.
//!
//! This is the brain of the turntable side of the capsule: a closed-loop
//! climate controller, the manual settings menu, and the unattended
//! countdown that drives a full 360° capture session. The machine is pure —
//! button events and timed ticks go in, actuator and serial actions come
//! out — so the whole thing is testable without hardware; the
//! `capsule-controller` binary applies the actions to the real world.

pub mod menu;

use crate::protocol::{Command, OperatingMode, TelemetryFrame, TELEMETRY_PERIOD_MS};
use menu::MenuState;
use std::time::{Duration, Instant};
use tracing::info;

/// Tie tolerance for the three-way climate comparison.
pub const CLIMATE_DEADBAND: f32 = 0.2;
/// Heater output while below target. The heater is driven at a fixed duty,
/// not proportionally.
pub const HEATER_FIXED_DUTY: u8 = 180;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Climate target, integer part plus 0.5° increments.
    pub target_temp: f32,
    pub shots_per_session: u32,
    /// Time between unattended scan sessions.
    pub countdown: Duration,
    /// Cancellable grace period before a session actually starts.
    pub confirm_window: Duration,
    /// Worst-case camera-node latency per photo, storage flush included.
    /// The turntable must not move before this has elapsed.
    pub shot_latency: Duration,
    /// Settling time after a turntable advance.
    pub advance_time: Duration,
    /// Stepper steps for one full turntable revolution.
    pub steps_per_rev: i32,
}

impl Settings {
    pub const TARGET_TEMP_MIN: f32 = 10.0;
    pub const TARGET_TEMP_MAX: f32 = 40.0;

    /// One 0.5° increment, wrapping back to the minimum past the maximum.
    pub fn bump_target_temp(&mut self) {
        self.target_temp += 0.5;
        if self.target_temp > Self::TARGET_TEMP_MAX {
            self.target_temp = Self::TARGET_TEMP_MIN;
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_temp: 24.0,
            shots_per_session: 8,
            countdown: Duration::from_secs(600),
            confirm_window: Duration::from_secs(10),
            shot_latency: Duration::from_secs(3),
            advance_time: Duration::from_secs(1),
            steps_per_rev: 4096,
        }
    }
}

/// Debounced front-panel input, produced by the binary's input layer.
/// `Select` doubles as the countdown pause control in autonomous mode
/// (the panel maps a held select press to it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Short,
    Select,
    Long,
}

/// What the outside world must do in response to a tick or button event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write one line (command or telemetry) to the serial link.
    SerialSend(String),
    SetHeaterDuty(u8),
    SetFans { fan_a: bool, fan_b: bool },
    StepTurntable { steps: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Autonomous,
    Manual,
}

/// Latest sensor values, fed into every tick. `None` means the read failed.
#[derive(Debug, Clone, Copy)]
pub struct SensorReadings {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub soil: u16,
}

#[derive(Debug)]
enum ScanPhase {
    /// Waiting out the interval until the next unattended session.
    Countdown { ends_at: Instant },
    /// Countdown paused; short presses adjust the climate target.
    AdjustTarget { remaining: Duration },
    /// Grace period: any press cancels, expiry starts the session.
    Confirm { ends_at: Instant },
    Shooting {
        shots_done: u32,
        step: ShotStep,
        due_at: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShotStep {
    /// CAPTURE sent, waiting out the worst-case photo latency.
    Exposing,
    /// Turntable advance issued, waiting for it to settle.
    Advancing,
}

pub struct Controller {
    mode: Mode,
    settings: Settings,
    menu: MenuState,
    scan: ScanPhase,
    heater_duty: u8,
    fan_a: bool,
    fan_b: bool,
    last_telemetry: Option<Instant>,
}

impl Controller {
    /// The initial mode is the operator's boot-time choice.
    pub fn new(mode: Mode, settings: Settings, now: Instant) -> Self {
        Self {
            mode,
            scan: ScanPhase::Countdown {
                ends_at: now + settings.countdown,
            },
            settings,
            menu: MenuState::new(),
            heater_duty: 0,
            fan_a: false,
            fan_b: false,
            last_telemetry: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn menu(&self) -> &MenuState {
        &self.menu
    }

    pub fn heater_duty(&self) -> u8 {
        self.heater_duty
    }

    pub fn fans(&self) -> (bool, bool) {
        (self.fan_a, self.fan_b)
    }

    /// One line of state for the front panel / console.
    pub fn display_line(&self, now: Instant) -> String {
        match self.mode {
            Mode::Manual => {
                let page = self.menu.page();
                let marker = if self.menu.editing() { "*" } else { "" };
                format!("[MANUAL] {}{}", page.label(), marker)
            }
            Mode::Autonomous => match &self.scan {
                ScanPhase::Countdown { ends_at } => {
                    let left = ends_at.saturating_duration_since(now);
                    format!("[AUTO] next scan in {}s", left.as_secs())
                }
                ScanPhase::AdjustTarget { .. } => {
                    format!("[AUTO] paused, target {:.1}°C", self.settings.target_temp)
                }
                ScanPhase::Confirm { ends_at } => {
                    let left = ends_at.saturating_duration_since(now);
                    format!("[AUTO] scan starting in {}s, press to cancel", left.as_secs())
                }
                ScanPhase::Shooting { shots_done, .. } => {
                    format!(
                        "[AUTO] scanning {}/{}",
                        shots_done, self.settings.shots_per_session
                    )
                }
            },
        }
    }

    pub fn on_button(&mut self, event: ButtonEvent, now: Instant) -> Vec<Action> {
        if event == ButtonEvent::Long {
            return self.toggle_mode(now);
        }

        match self.mode {
            Mode::Manual => {
                match event {
                    ButtonEvent::Short => self.menu.on_short(&mut self.settings),
                    ButtonEvent::Select => self.menu.on_select(),
                    ButtonEvent::Long => unreachable!(),
                }
                Vec::new()
            }
            Mode::Autonomous => self.on_autonomous_button(event, now),
        }
    }

    fn on_autonomous_button(&mut self, event: ButtonEvent, now: Instant) -> Vec<Action> {
        match (&self.scan, event) {
            (ScanPhase::Countdown { ends_at }, ButtonEvent::Select) => {
                let remaining = ends_at.saturating_duration_since(now);
                info!("countdown paused, target adjust enabled");
                self.scan = ScanPhase::AdjustTarget { remaining };
            }
            (ScanPhase::AdjustTarget { remaining }, ButtonEvent::Select) => {
                let remaining = *remaining;
                info!("countdown resumed, target {:.1}°C", self.settings.target_temp);
                self.scan = ScanPhase::Countdown {
                    ends_at: now + remaining,
                };
            }
            (ScanPhase::AdjustTarget { .. }, ButtonEvent::Short) => {
                self.settings.bump_target_temp();
            }
            (ScanPhase::Confirm { .. }, _) => {
                info!("scan cancelled during confirmation window");
                self.scan = ScanPhase::Countdown {
                    ends_at: now + self.settings.countdown,
                };
            }
            _ => {}
        }
        Vec::new()
    }

    fn toggle_mode(&mut self, now: Instant) -> Vec<Action> {
        self.mode = match self.mode {
            Mode::Autonomous => Mode::Manual,
            Mode::Manual => Mode::Autonomous,
        };
        self.menu.reset();
        self.scan = ScanPhase::Countdown {
            ends_at: now + self.settings.countdown,
        };
        info!("mode toggled to {:?}", self.mode);

        // Leaving autonomous mode releases the climate outputs.
        if self.mode == Mode::Manual {
            self.heater_duty = 0;
            self.fan_a = false;
            self.fan_b = false;
            vec![
                Action::SetHeaterDuty(0),
                Action::SetFans {
                    fan_a: false,
                    fan_b: false,
                },
            ]
        } else {
            Vec::new()
        }
    }

    /// Advances the machine. Called on a fixed poll (~100 ms); every output
    /// change lands within one polling interval of its cause.
    pub fn tick(&mut self, now: Instant, readings: SensorReadings) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.mode == Mode::Autonomous {
            actions.extend(self.climate_tick(readings));
            actions.extend(self.scan_tick(now));
        }

        if self.telemetry_due(now) {
            self.last_telemetry = Some(now);
            actions.push(Action::SerialSend(self.telemetry_frame(readings).to_line()));
        }

        actions
    }

    fn telemetry_due(&self, now: Instant) -> bool {
        match self.last_telemetry {
            None => true,
            Some(at) => now.duration_since(at) >= Duration::from_millis(TELEMETRY_PERIOD_MS),
        }
    }

    fn telemetry_frame(&self, readings: SensorReadings) -> TelemetryFrame {
        TelemetryFrame {
            temperature: readings.temperature,
            humidity: readings.humidity,
            soil: readings.soil,
            heater_duty: self.heater_duty,
            fan_a: self.fan_a,
            fan_b: self.fan_b,
            mode: match self.mode {
                Mode::Autonomous => OperatingMode::Auto,
                Mode::Manual => OperatingMode::Manual,
            },
        }
    }

    /// Three-way comparison against the target: above → fans on, heater
    /// off; below → heater at fixed duty, fans off; inside the deadband →
    /// both off. An unreadable sensor fails safe with everything off.
    fn climate_tick(&mut self, readings: SensorReadings) -> Vec<Action> {
        let (duty, fans) = match readings.temperature {
            None => (0, false),
            Some(t) if t > self.settings.target_temp + CLIMATE_DEADBAND => (0, true),
            Some(t) if t < self.settings.target_temp - CLIMATE_DEADBAND => {
                (HEATER_FIXED_DUTY, false)
            }
            Some(_) => (0, false),
        };

        let mut actions = Vec::new();
        if duty != self.heater_duty {
            self.heater_duty = duty;
            actions.push(Action::SetHeaterDuty(duty));
        }
        if fans != self.fan_a || fans != self.fan_b {
            self.fan_a = fans;
            self.fan_b = fans;
            actions.push(Action::SetFans {
                fan_a: fans,
                fan_b: fans,
            });
        }
        actions
    }

    fn scan_tick(&mut self, now: Instant) -> Vec<Action> {
        match &self.scan {
            ScanPhase::Countdown { ends_at } if now >= *ends_at => {
                info!("countdown elapsed, opening confirmation window");
                self.scan = ScanPhase::Confirm {
                    ends_at: now + self.settings.confirm_window,
                };
                Vec::new()
            }
            ScanPhase::Confirm { ends_at } if now >= *ends_at => {
                info!("starting unattended scan session");
                self.scan = ScanPhase::Shooting {
                    shots_done: 1,
                    step: ShotStep::Exposing,
                    due_at: now + self.settings.shot_latency,
                };
                vec![
                    Action::SerialSend(Command::SessionStart.as_line().to_string()),
                    Action::SerialSend(Command::Capture.as_line().to_string()),
                ]
            }
            ScanPhase::Shooting {
                shots_done,
                step,
                due_at,
            } if now >= *due_at => {
                let (shots_done, step) = (*shots_done, *step);
                match step {
                    ShotStep::Exposing => {
                        // Photo is on storage by now; safe to move the table.
                        self.scan = ScanPhase::Shooting {
                            shots_done,
                            step: ShotStep::Advancing,
                            due_at: now + self.settings.advance_time,
                        };
                        vec![Action::StepTurntable {
                            steps: self.settings.steps_per_rev
                                / self.settings.shots_per_session as i32,
                        }]
                    }
                    ShotStep::Advancing if shots_done >= self.settings.shots_per_session => {
                        info!("scan session complete ({} shots)", shots_done);
                        self.scan = ScanPhase::Countdown {
                            ends_at: now + self.settings.countdown,
                        };
                        vec![Action::SerialSend(Command::SessionEnd.as_line().to_string())]
                    }
                    ShotStep::Advancing => {
                        self.scan = ScanPhase::Shooting {
                            shots_done: shots_done + 1,
                            step: ShotStep::Exposing,
                            due_at: now + self.settings.shot_latency,
                        };
                        vec![Action::SerialSend(Command::Capture.as_line().to_string())]
                    }
                }
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(temp: Option<f32>) -> SensorReadings {
        SensorReadings {
            temperature: temp,
            humidity: Some(50.0),
            soil: 400,
        }
    }

    fn quick_settings() -> Settings {
        Settings {
            countdown: Duration::from_secs(10),
            confirm_window: Duration::from_secs(2),
            shot_latency: Duration::from_secs(1),
            advance_time: Duration::from_secs(1),
            shots_per_session: 3,
            ..Settings::default()
        }
    }

    fn sent_lines(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::SerialSend(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn above_target_turns_fans_on_heater_off() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, Settings::default(), t0);
        ctrl.tick(t0, readings(Some(30.0)));

        assert_eq!(ctrl.heater_duty(), 0);
        assert_eq!(ctrl.fans(), (true, true));
    }

    #[test]
    fn below_target_heats_at_fixed_duty() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, Settings::default(), t0);
        ctrl.tick(t0, readings(Some(18.0)));

        assert_eq!(ctrl.heater_duty(), HEATER_FIXED_DUTY);
        assert_eq!(ctrl.fans(), (false, false));
    }

    #[test]
    fn within_deadband_everything_is_off() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, Settings::default(), t0);
        ctrl.tick(t0, readings(Some(24.1)));

        assert_eq!(ctrl.heater_duty(), 0);
        assert_eq!(ctrl.fans(), (false, false));
    }

    #[test]
    fn unreadable_sensor_fails_safe() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, Settings::default(), t0);
        ctrl.tick(t0, readings(Some(18.0)));
        assert_eq!(ctrl.heater_duty(), HEATER_FIXED_DUTY);

        ctrl.tick(t0 + Duration::from_millis(100), readings(None));
        assert_eq!(ctrl.heater_duty(), 0);
        assert_eq!(ctrl.fans(), (false, false));
    }

    #[test]
    fn full_scan_session_sequence_is_paced_and_complete() {
        let t0 = Instant::now();
        let settings = quick_settings();
        let n = settings.shots_per_session;
        let steps_per_shot = settings.steps_per_rev / n as i32;
        let mut ctrl = Controller::new(Mode::Autonomous, settings, t0);

        let mut lines = Vec::new();
        let mut table_steps = 0;
        let mut t = t0;
        // Walk past countdown + confirm + the whole session, but not into
        // the next countdown's confirmation window.
        for _ in 0..250 {
            t += Duration::from_millis(100);
            for action in ctrl.tick(t, readings(Some(24.0))) {
                match action {
                    Action::SerialSend(line) if !line.starts_with("DATA,") => lines.push(line),
                    Action::StepTurntable { steps } => table_steps += steps,
                    _ => {}
                }
            }
        }

        let mut expected = vec!["SESSION_START".to_string()];
        for _ in 0..n {
            expected.push("CAPTURE".to_string());
        }
        expected.push("SESSION_END".to_string());
        assert_eq!(lines, expected);
        assert_eq!(table_steps, steps_per_shot * n as i32, "one full revolution");
    }

    #[test]
    fn confirmation_window_is_cancellable() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, quick_settings(), t0);

        // Into the confirm window.
        let t1 = t0 + Duration::from_secs(10);
        ctrl.tick(t1, readings(Some(24.0)));
        ctrl.on_button(ButtonEvent::Short, t1);

        // Long past where the session would have started: nothing sent.
        let mut lines = Vec::new();
        let t2 = t1 + Duration::from_secs(5);
        lines.extend(sent_lines(&ctrl.tick(t2, readings(Some(24.0)))));
        assert!(lines.iter().all(|l| l.starts_with("DATA,")));
    }

    #[test]
    fn pausing_the_countdown_allows_target_adjustment() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, quick_settings(), t0);
        let before = ctrl.settings().target_temp;

        ctrl.on_button(ButtonEvent::Select, t0 + Duration::from_secs(4));
        ctrl.on_button(ButtonEvent::Short, t0 + Duration::from_secs(5));
        ctrl.on_button(ButtonEvent::Short, t0 + Duration::from_secs(5));
        assert_eq!(ctrl.settings().target_temp, before + 1.0);

        // Paused for a long while: the countdown must not have run out.
        let resume_at = t0 + Duration::from_secs(120);
        ctrl.on_button(ButtonEvent::Select, resume_at);
        let actions = ctrl.tick(resume_at + Duration::from_secs(2), readings(Some(24.0)));
        assert!(sent_lines(&actions).iter().all(|l| l.starts_with("DATA,")));
    }

    #[test]
    fn long_press_toggles_mode_and_resets_the_menu() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, Settings::default(), t0);
        ctrl.tick(t0, readings(Some(18.0)));
        assert_eq!(ctrl.heater_duty(), HEATER_FIXED_DUTY);

        let actions = ctrl.on_button(ButtonEvent::Long, t0);
        assert_eq!(ctrl.mode(), Mode::Manual);
        assert!(actions.contains(&Action::SetHeaterDuty(0)));
        assert_eq!(ctrl.heater_duty(), 0);

        ctrl.on_button(ButtonEvent::Long, t0);
        assert_eq!(ctrl.mode(), Mode::Autonomous);
    }

    #[test]
    fn telemetry_is_emitted_on_the_fixed_cadence() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Manual, Settings::default(), t0);

        let first = ctrl.tick(t0, readings(Some(22.0)));
        assert_eq!(sent_lines(&first).len(), 1);

        // Too soon: nothing.
        let soon = ctrl.tick(t0 + Duration::from_millis(200), readings(Some(22.0)));
        assert!(sent_lines(&soon).is_empty());

        let later = ctrl.tick(t0 + Duration::from_millis(600), readings(Some(22.0)));
        let lines = sent_lines(&later);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(",MANUAL"));
    }

    #[test]
    fn display_line_tracks_mode_and_phase() {
        let t0 = Instant::now();
        let mut ctrl = Controller::new(Mode::Autonomous, quick_settings(), t0);
        assert_eq!(ctrl.display_line(t0), "[AUTO] next scan in 10s");

        ctrl.on_button(ButtonEvent::Select, t0);
        assert!(ctrl.display_line(t0).starts_with("[AUTO] paused"));

        ctrl.on_button(ButtonEvent::Long, t0);
        assert_eq!(ctrl.display_line(t0), "[MANUAL] Status");
    }
}
