//! Wire format for the serial link between the sensor/actuator controller
//! and the camera node.
//!
//! The link is line-oriented and best-effort in both directions: a line
//! either parses as a whole or is dropped. There are no acknowledgments and
//! no retransmission; the two sides stay in step only by agreeing on
//! worst-case per-photo latency.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, u16, u8},
    combinator::{all_consuming, map, map_res, value},
    error::Error,
    sequence::{preceded, tuple},
    Finish, IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Telemetry cadence on the controller side.
pub const TELEMETRY_PERIOD_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Auto,
    Manual,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Auto => write!(f, "AUTO"),
            OperatingMode::Manual => write!(f, "MANUAL"),
        }
    }
}

/// One snapshot of sensor/actuator state, broadcast by the controller
/// roughly every [`TELEMETRY_PERIOD_MS`].
///
/// Temperature and humidity are `None` when the sensor read failed; the wire
/// encodes that as `nan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub soil: u16,
    pub heater_duty: u8,
    pub fan_a: bool,
    pub fan_b: bool,
    pub mode: OperatingMode,
}

impl TelemetryFrame {
    /// Renders the frame as a `DATA,...` line, without the trailing newline.
    pub fn to_line(&self) -> String {
        format!(
            "DATA,{},{},{},{},{},{},{}",
            fmt_reading(self.temperature),
            fmt_reading(self.humidity),
            self.soil,
            self.heater_duty,
            self.fan_a as u8,
            self.fan_b as u8,
            self.mode,
        )
    }
}

fn fmt_reading(reading: Option<f32>) -> String {
    match reading {
        Some(v) => format!("{:.1}", v),
        None => "nan".to_string(),
    }
}

/// Commands the controller sends to the camera node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Take one photo now. Carries no payload; the camera node picks the
    /// filename from its own session state.
    Capture,
    /// Begin a capture session. The camera node mints a fresh session id and
    /// resets its in-session shot counter.
    SessionStart,
    /// Close the session and flush its ledger entry.
    SessionEnd,
}

impl Command {
    pub fn as_line(&self) -> &'static str {
        match self {
            Command::Capture => "CAPTURE",
            Command::SessionStart => "SESSION_START",
            Command::SessionEnd => "SESSION_END",
        }
    }
}

/// Anything the camera node can receive on the serial link.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialMessage {
    Command(Command),
    Telemetry(TelemetryFrame),
}

fn parse_reading(s: &str) -> IResult<&str, Option<f32>> {
    map_res(take_while1(|c| c != ','), |t: &str| {
        t.parse::<f32>()
            .map(|v| if v.is_nan() { None } else { Some(v) })
    })(s)
}

fn parse_flag(s: &str) -> IResult<&str, bool> {
    alt((value(false, char('0')), value(true, char('1'))))(s)
}

fn parse_mode(s: &str) -> IResult<&str, OperatingMode> {
    alt((
        value(OperatingMode::Auto, tag("AUTO")),
        value(OperatingMode::Manual, tag("MANUAL")),
    ))(s)
}

fn parse_telemetry(s: &str) -> IResult<&str, TelemetryFrame> {
    map(
        tuple((
            preceded(tag("DATA,"), parse_reading),
            preceded(tag(","), parse_reading),
            preceded(tag(","), u16),
            preceded(tag(","), u8),
            preceded(tag(","), parse_flag),
            preceded(tag(","), parse_flag),
            preceded(tag(","), parse_mode),
        )),
        |(temperature, humidity, soil, heater_duty, fan_a, fan_b, mode)| TelemetryFrame {
            temperature,
            humidity,
            soil,
            heater_duty,
            fan_a,
            fan_b,
            mode,
        },
    )(s)
}

fn parse_message(s: &str) -> IResult<&str, SerialMessage> {
    alt((
        map(parse_telemetry, SerialMessage::Telemetry),
        value(
            SerialMessage::Command(Command::SessionStart),
            tag("SESSION_START"),
        ),
        value(
            SerialMessage::Command(Command::SessionEnd),
            tag("SESSION_END"),
        ),
        value(SerialMessage::Command(Command::Capture), tag("CAPTURE")),
    ))(s)
}

impl FromStr for SerialMessage {
    type Err = Error<String>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(parse_message)(s).finish() {
            Ok((_remaining, msg)) => Ok(msg),
            Err(Error { input, code }) => Err(Error {
                input: input.to_string(),
                code,
            }),
        }
    }
}
