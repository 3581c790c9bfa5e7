//! Address maps: register placement, submap hierarchy and front-door routing.

/// Map structure, submap links and transport bindings.
pub mod address_map;
/// Front-door read/write orchestration.
mod frontdoor;

pub use address_map::{AddressMap, MappedRegister};
