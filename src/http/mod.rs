//! HTTP layer for the mirror.
//!
//! This module provides the axum-based server that answers asset requests
//! from the local cache, falls back to the origin on a miss, and writes the
//! fetched bytes through to the cache.

pub mod handler;
