//! Bearer token models.

pub mod secret;
pub mod token;

pub use secret::*;
pub use token::*;
