//! Admin API Module
//!
//! REST endpoints for cache statistics and out-of-process invalidation.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
