pub mod error;
pub mod identity;
pub mod logging;

pub use identity::{identity_middleware, AuthenticatedUser};
