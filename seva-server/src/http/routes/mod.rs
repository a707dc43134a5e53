//! Route handlers organized by resource

pub mod bookings;
pub mod feedback;
pub mod health;
pub mod session;
pub mod status;
pub mod teachers;
pub mod vehicles;
