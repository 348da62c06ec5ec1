//! Built-in capability handlers.
//!
//! `echo` is the minimal reference handler used to exercise the transport;
//! the calculator handlers are a small worked example of a real server.

mod calculator;
mod echo;

pub use calculator::{CalculateHandler, ConvertUnitsHandler};
pub use echo::EchoHandler;
