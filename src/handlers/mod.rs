//! Node handlers that sit between the relay session and the user flow.

mod command;
mod response;

pub use command::{CommandHandler, CommandMessage};
pub use response::{AckHandler, ResponseMessage};
