//! Domain repositories - one table each, built on [`Database`](super::Database)

pub mod bookings;
pub mod feedback;
pub mod teachers;
pub mod users;
pub mod vehicles;

pub use bookings::{Booking, BookingRepo, BookingStatus, NewBooking};
pub use feedback::{CategorySummary, Feedback, FeedbackRepo, NewFeedback, FEEDBACK_CATEGORIES};
pub use teachers::{Teacher, TeacherRepo};
pub use users::{NewUser, Role, User, UserRepo};
pub use vehicles::{Vehicle, VehicleRepo};
