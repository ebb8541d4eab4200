pub mod device;
pub mod error;
pub mod memory;
pub mod traits;

pub use device::Device;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
