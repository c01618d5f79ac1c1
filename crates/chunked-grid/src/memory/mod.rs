//! Process-wide residency accounting for grid chunks.

mod manager;

pub use manager::MemoryManager;
