//! The app-state patch engine: MAC-chained, LTHash-verified sync of the
//! client-side collections (mutes, pins, archives, contacts, stars, ...).

pub mod errors;
pub mod hash;
pub mod keys;
pub mod lthash;
pub mod processor;
pub mod sync;

pub use errors::AppStateError;
pub use hash::HashState;
pub use processor::{Mutation, PatchList, Processor};
pub use sync::ALL_PATCH_NAMES;
