//! Directory hash trees
//!
//! Each directory level is one immutable tree object addressed by the hash of
//! its sorted `(name, hash)` entries. Identical subtrees are stored once.

pub mod builder;
pub mod hasher;
pub mod hydration;
pub mod meta;
pub mod object;
pub mod path;
pub mod walker;

pub use builder::{BuildStats, TreeBuilder};
pub use hydration::{CheckoutAction, CommitAction, DiskState, Hydration, Scope, ScopedFile};
pub use meta::{apply_delta, KnowledgeResolver};
pub use object::{TreeEntry, TreeObject};
pub use walker::WalkerConfig;
