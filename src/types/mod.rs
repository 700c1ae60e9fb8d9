//! Core types for foreman.

pub mod iteration;
pub mod trajectory;
pub mod usage;

pub use iteration::*;
pub use trajectory::*;
pub use usage::*;
