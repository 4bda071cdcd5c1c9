//! Host-side software for the capsule 360° capture rig.
//!
//! Two embedded nodes cooperate over one serial link: a sensor/actuator
//! controller that runs the climate loop and steps the turntable through a
//! capture session, and a camera/network node that takes the photos, keeps
//! the session ledger on removable storage, and serves everything over
//! HTTP to the desktop reconstruction app. This crate implements both
//! sides: the camera node as the `capsule-node` binary, the controller
//! state machine as a pure library module driven by the
//! `capsule-controller` binary.

pub mod camera;
pub mod capture;
pub mod config;
pub mod controller;
pub mod ledger;
pub mod protocol;
pub mod serial;
pub mod server;
pub mod storage;
pub mod telemetry;
