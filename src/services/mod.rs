//! The six cooperating services of the treatment-plan engine.
//!
//! Every mutating operation takes the acting staff member as an explicit
//! `actor_id` parameter; there is no ambient identity context.

pub mod approval;
pub mod autoschedule;
pub mod item_addition;
pub mod item_deletion;
pub mod item_status;
pub mod item_update;
pub mod plan;
