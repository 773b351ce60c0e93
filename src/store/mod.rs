//! Local storage: the content-addressed object cache and the file state index

pub mod atomic;
pub mod objects;
pub mod persistence;

pub use objects::ObjectStore;
pub use persistence::{FileStat, SledStateIndex};
