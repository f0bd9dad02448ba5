//! Host and guest plumbing for v86 virtual machines.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix socket endpoints and the message sink/source traits
//! - [`frame`]: guest-service frame assembly and the transport envelope
//! - [`image`]: image manifests, boot defaults and initial-state download
//! - [`peer`]: control surface, session loop and host-side controller (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use env86_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use env86_frame::*;
}

/// Re-export image types.
pub mod image {
    pub use env86_image::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use env86_peer::*;
}
