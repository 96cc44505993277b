pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;

pub use application::Commerce;
pub use error::{CommerceError, Result};
