//! Core types for Drummer.

pub mod media;
pub mod message;
pub mod usage;

pub use media::*;
pub use message::*;
pub use usage::*;
