//! Request handling helpers: input cleaning, validation, sessions, CSRF and
//! flash messages

pub mod csrf;
pub mod flash;
pub mod sanitize;
pub mod session;
pub mod validation;

pub use csrf::{CsrfToken, CSRF_HEADER};
pub use flash::{Flash, FlashLevel};
pub use session::{SessionStore, SESSION_COOKIE};
pub use validation::{Rule, ValidationError, ValidationErrors, Validator};
