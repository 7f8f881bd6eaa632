//! msgpack-rpc layer
//!
//! Neovim's embedded mode speaks msgpack-rpc over the child's stdio:
//!
//! - **Protocol**: message model (request, response, notification)
//! - **Codec**: msgpack encoding and incremental stream decoding
//! - **Channel**: calls matched by id, notifications, inbound queue
//!
//! Byte transport and process management come from `crate::io`.

pub mod channel;
pub mod codec;
pub mod error;
pub mod protocol;

pub use channel::{InboundMessage, RpcChannel};
pub use error::RpcError;
