//! Relay topic layout.
//!
//! Inbound: `command/{account}/{device}` and `message/{account}/...`.
//! Outbound: `response/{account}/{device}` and `state/{account}/{device}`.

pub fn command_filter(account: &str) -> String {
    format!("command/{}/#", account)
}

pub fn message_filter(account: &str) -> String {
    format!("message/{}/#", account)
}

pub fn response_topic(account: &str, device: &str) -> String {
    format!("response/{}/{}", account, device)
}

pub fn state_topic(account: &str, device: &str) -> String {
    format!("state/{}/{}", account, device)
}

/// What an inbound topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    /// A directive; the device segment is informational, dispatch uses the body.
    Command { device: Option<&'a str> },
    /// Relay alert for the account owner.
    Message,
    Unknown,
}

pub fn classify<'a>(account: &str, topic: &'a str) -> InboundTopic<'a> {
    let mut parts = topic.splitn(3, '/');
    let (Some(kind), Some(owner)) = (parts.next(), parts.next()) else {
        return InboundTopic::Unknown;
    };
    if owner != account {
        return InboundTopic::Unknown;
    }
    match kind {
        "command" => InboundTopic::Command {
            device: parts.next().filter(|d| !d.is_empty()),
        },
        "message" => InboundTopic::Message,
        _ => InboundTopic::Unknown,
    }
}
