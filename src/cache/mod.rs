//! Local cache for the mirror.
//!
//! The [`PathResolver`] maps request paths onto the cache tree and the
//! [`store`] module writes fetched bytes through to it.  Entries are never
//! evicted; the `refresh` command is the only thing that rewrites them.

pub mod resolver;
pub mod store;

pub use resolver::{PathResolver, ResolveError};
