pub mod auth;
pub mod family;

pub use auth::*;
pub use family::*;
