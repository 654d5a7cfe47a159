//! Domain model for the household registry.
//!
//! # Responsibility
//! - Define canonical household/resident/membership shapes used by the
//!   reconciler and persistence layers.
//! - Own the household membership invariants.
//!
//! # Invariants
//! - The head of household is never a member row and never carries a
//!   relationship label.
//! - Every relationship label belongs to a current member.

pub mod household;
pub mod resident;
