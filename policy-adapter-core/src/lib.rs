//! Core types for the policy document adapter
//!
//! This crate contains the stored rule record, the field selector used to
//! match records, the mapping between policy rules and records, and the
//! policy model contract consumed from the authorization engine.

pub mod error;
pub mod models;
pub mod policy;

pub use error::CoreError;
pub use models::*;
pub use policy::{load_policy_line, load_policy_rule, MemoryModel, Model, PolicyGroup};
