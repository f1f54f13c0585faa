//! FundFlow Common Types
//!
//! This crate contains shared types used across FundFlow, including
//! identifiers, fixed-point money arithmetic and the transfer error taxonomy.

pub mod error;
pub mod identifiers;
pub mod monetary;

pub use error::*;
pub use identifiers::*;
pub use monetary::*;
