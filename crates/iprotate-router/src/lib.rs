//! Router configuration: an order- and byte-preserving INI document plus the
//! write/reload cycle that keeps the local router in sync with the fleet.

pub mod document;
pub mod sync;

pub use document::RouterDocument;
pub use sync::{EndpointRef, RouterSync};
