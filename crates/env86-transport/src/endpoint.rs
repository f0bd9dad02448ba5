//! Endpoint addresses.
//!
//! The guest-service endpoint is never configured on its own: it is derived
//! from the control endpoint by swapping the final path segment's `ctl`
//! token for `guest`.

use std::path::PathBuf;

use crate::error::{Result, TransportError};

/// Token naming the control endpoint.
pub const CONTROL_TOKEN: &str = "ctl";

/// Token naming the guest-service endpoint.
pub const GUEST_TOKEN: &str = "guest";

const UNIX_SCHEME: &str = "unix://";

/// Derive the guest-service endpoint from a control endpoint.
///
/// `unix:///run/env86/ctl` becomes `unix:///run/env86/guest` and
/// `/tmp/vm/ctl.sock` becomes `/tmp/vm/guest.sock`. Query strings survive.
pub fn guest_endpoint(control: &str) -> Result<String> {
    let split = control.rfind('/').map_or(0, |idx| idx + 1);
    let (head, last) = control.split_at(split);

    let rest = last
        .strip_prefix(CONTROL_TOKEN)
        .filter(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with('?'))
        .ok_or_else(|| TransportError::InvalidEndpoint(control.to_string()))?;

    Ok(format!("{head}{GUEST_TOKEN}{rest}"))
}

/// Filesystem path of a socket endpoint, with an optional `unix://` scheme removed.
pub fn socket_path(endpoint: &str) -> Result<PathBuf> {
    let path = endpoint.strip_prefix(UNIX_SCHEME).unwrap_or(endpoint);
    if path.is_empty() || path.contains("://") {
        return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(PathBuf::from(path))
}
