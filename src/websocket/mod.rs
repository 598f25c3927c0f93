//! WebSocket wire protocol and connection handling.

mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{ClientFrame, ResultStatus, ServerFrame};
