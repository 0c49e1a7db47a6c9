//! Static checks over program structure and allocation vectors, run on
//! demand rather than on every search iteration.

pub mod error;
mod rules;
pub mod validator;

pub use error::{ValidationError, ValidationErrorType};
pub use validator::Validator;
