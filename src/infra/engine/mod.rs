//! Engine backends.

pub mod memory;

pub use memory::{InMemoryEngine, MemoryBrowser, MemoryContext, MemoryPage};
