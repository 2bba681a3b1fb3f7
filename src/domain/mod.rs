//! Domain types and DTOs

pub mod ai;
pub mod assessment;
pub mod consistency;
pub mod uploads;
