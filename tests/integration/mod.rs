//! Integration tests for lode

mod partial_checkout;
mod property_determinism;
mod test_utils;
mod transfer_dedup;
mod tree_determinism;
mod virtual_directory;
