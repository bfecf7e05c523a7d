pub mod cas;
pub mod memory;
pub mod sled_store;
pub mod store;

pub use cas::Cas;
pub use memory::MemoryStore;
pub use sled_store::SledStore;
pub use store::Store;
