//! Capture endpoints exposed to attackers.

pub mod http_listener;
pub mod ssh_listener;
pub mod types;

pub use http_listener::{HttpDecoy, HttpLimits, HttpListener};
pub use ssh_listener::{SshListener, SshSettings};
