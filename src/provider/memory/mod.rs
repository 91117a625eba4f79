//! In-memory backends for testing and single-process use
//!
//! Each backend records what it was asked to do and supports fault
//! injection, so pipeline behavior can be exercised without a network.

mod bus;
mod secrets;
mod warehouse;

pub use bus::MemoryBus;
pub use secrets::MemorySecretStore;
pub use warehouse::MemoryWarehouse;
