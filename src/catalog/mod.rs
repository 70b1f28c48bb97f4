//! Offline catalog: the persisted list of downloaded tracks

pub mod model;
pub mod store;

pub use model::{CatalogDocument, Membership, MembershipChange, PersistedTrack, TrackDescriptor};
pub use store::{CatalogError, CatalogStore};
