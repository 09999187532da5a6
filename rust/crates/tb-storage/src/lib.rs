pub mod memory;
pub mod snapshot;

pub use memory::{MemoryConnectionStore, MemoryFormCatalog, MemoryLeadStore};
pub use snapshot::StateSnapshot;
