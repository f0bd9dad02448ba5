//! The VM side and host side of an env86 control connection.
//!
//! A running VM exposes its [`Machine`] to a controller through a
//! [`ControlSurface`]: RPC calls on the `rpc` channel, raw console bytes on
//! the `tty` channel, and guest-service frames assembled from a serial port
//! and relayed to a separate guest endpoint. A [`Session`] drives the
//! surface from one event queue. The controller talks to the VM through a
//! [`RemoteVm`].

pub mod bridge;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod remote;
pub mod rpc;
pub mod session;
pub mod surface;
pub mod tty;
#[cfg(unix)]
pub mod wiring;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeStats, ChannelBridge};
pub use error::{PeerError, Result};
pub use handlers::{Handler, HandlerTable};
pub use machine::{format_mac, Machine, VmEvent, TTY_PORT};
pub use remote::{RemoteVm, DEFAULT_TTY_BUFFER};
pub use rpc::{CallIds, RpcMessage};
pub use session::{spawn_pump, EventSender, Lane, Session, SessionEvent, EVENT_QUEUE_CAPACITY};
pub use surface::{
    ControlSurface, GuestConnector, GuestSink, NoGuestService, SurfaceConfig, MAX_PENDING_CALLS,
};
pub use tty::{ExitPatternWatch, TtyForwarder, TtyInput, CTRL_D};
#[cfg(unix)]
pub use wiring::{
    boot, connect_endpoint, ControlLink, ControlListener, SocketGuestConnector, SocketSession,
    SocketSink, SocketSource,
};
