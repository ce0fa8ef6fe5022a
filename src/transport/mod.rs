//! MQTT transport to the voice-assistant cloud relay.
//!
//! One [`TransportSession`] per account owns the broker connection and is
//! shared by every node registered for that account.

mod client;
mod session;
pub mod topics;

pub use client::{ConnectionStatus, MqttClient, MqttMessage, client_id};
pub use session::{HandlerKind, RegisteredHandler, TransportSession};

use crate::error::Result;
use crate::state::StatePayload;

/// Outbound operations the nodes need from a transport.
///
/// Both calls are fire-and-forget: they never wait on the broker. When the
/// transport is offline they fail with `TransportUnavailable` and the
/// message is dropped.
pub trait Publisher: Send + Sync {
    /// Publish `{messageId, success}` on `response/{account}/{endpoint}`.
    fn acknowledge(&self, message_id: &str, endpoint_id: &str, success: bool) -> Result<()>;

    /// Publish `{messageId, payload: {state}}` on `state/{account}/{endpoint}`.
    fn update_state(
        &self,
        message_id: &str,
        endpoint_id: &str,
        state: &StatePayload,
        device_name: &str,
    ) -> Result<()>;
}
