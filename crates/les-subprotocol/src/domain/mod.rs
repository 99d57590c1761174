//! # Domain Layer
//!
//! Messages, connection state, handshake rules and errors. No I/O.

pub mod connection;
pub mod errors;
pub mod flow_control;
pub mod handshake;
pub mod messages;
pub mod value_objects;

pub use connection::*;
pub use errors::*;
pub use flow_control::*;
pub use handshake::*;
pub use messages::*;
pub use value_objects::*;
