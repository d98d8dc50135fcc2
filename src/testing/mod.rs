//! Testing utilities and mock implementations
//!
//! Lets the session, driver and blocking client run against a scripted
//! engine without an MQTT broker or name service.

pub mod mocks;

pub use mocks::*;
