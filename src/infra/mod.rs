//! Infrastructure adapters for automation engines.

pub mod engine;

pub use engine::{InMemoryEngine, MemoryBrowser, MemoryContext, MemoryPage};
