//! CLI command implementations.

pub mod fetch;
pub mod link;
pub mod listen;
pub mod metadata;
pub mod sessions;
pub mod unlink;

use std::time::Duration;
use walletlink_core::HostRequest;

/// How long one-shot commands wait for relays before giving up.
pub const ONLINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Print a host request.
pub fn print_request(request: &HostRequest) {
    println!("Request {}", request.id);
    println!("  Kind:   {:?}", request.kind);
    println!("  Method: {}", request.method);
    if let Some(origin) = &request.origin {
        println!("  Origin: {}", origin);
    }
    println!("  Params: {}", request.params);
}
