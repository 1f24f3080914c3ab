//! Bridge to the external host process.
//!
//! # Architecture
//!
//! - **protocol**: Envelope types, echo and ack-code helpers
//! - **value**: Native payload values with ordered maps
//! - **codec**: Wire JSON <-> native conversion, websocket frames
//! - **transport**: Persistent and one-shot channels, reconnection

pub mod codec;
pub mod protocol;
pub mod transport;
pub mod value;
