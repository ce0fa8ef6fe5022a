//! Voice relay bridge library.
//!
//! This library connects voice-assistant directives delivered by a cloud
//! relay over MQTT to local automation flows, and reports device state back
//! to the relay with rate limiting and de-duplication.

pub mod admin;
pub mod config;
pub mod directive;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod state;
pub mod transport;

pub use error::{BridgeError, Result};
