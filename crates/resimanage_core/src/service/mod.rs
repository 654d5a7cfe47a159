//! Core use-case services.
//!
//! # Responsibility
//! - Reconcile household membership against a storage collaborator.
//! - Orchestrate repository calls into transactional household use-cases.

pub mod household_service;
pub mod reconcile;
