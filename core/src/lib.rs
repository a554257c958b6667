//! Shared leaf types for Wayfinder: the error taxonomy every service speaks,
//! the key-value/counter backend interface, the cache key canonicalizer, the
//! identity lookup seam and the travel-plan data model.
//!
//! Nothing in this crate talks to the network. The only I/O boundary is the
//! [`backend::KvBackend`] trait, which callers inject.

pub mod backend;
pub mod cache_key;
pub mod error;
pub mod identity;
pub mod plan;
