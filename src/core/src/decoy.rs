//! Decoy identities served to HTTP clients.
//!
//! - `catalog`: the fixed, sorted collection of decoy pages.
//! - `selector`: deterministic host → (server banner, page) mapping.

pub mod catalog;
pub mod selector;

pub use catalog::{DecoyPage, PageCatalog};
pub use selector::{DecoyIdentity, DecoySelector, SERVER_BANNERS};
