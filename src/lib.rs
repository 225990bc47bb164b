//! Treatment-plan engine of a dental clinic management system.
//!
//! Covers the plan/phase/item lifecycle (approval gate, financial
//! recalculation, item state machine) and the constraint-based appointment
//! auto-scheduler. Everything else (directories, invoicing, holidays,
//! authentication, HTTP) is consumed through the traits in
//! [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod spacing;
pub mod store;
