//! Transport layer for env86 control and guest-service connections.
//!
//! Everything above this crate is written against two small traits:
//! - [`MessageSink`] sends one whole message on a channel
//! - [`MessageSource`] yields whole messages until end-of-stream
//!
//! Concrete carriers live here too: Unix domain socket endpoints
//! ([`SocketEndpoint`], [`IpcStream`]) and an in-process pair ([`memory::pair`]).

pub mod endpoint;
pub mod error;
pub mod memory;
pub mod stream;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{guest_endpoint, socket_path, CONTROL_TOKEN, GUEST_TOKEN};
pub use error::{Result, TransportError};
pub use stream::IpcStream;
pub use traits::{Message, MessageSink, MessageSource};

#[cfg(unix)]
pub use uds::SocketEndpoint;
