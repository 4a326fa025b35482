pub mod auth;
pub mod rest;

pub use auth::AuthClient;
pub use rest::{QueryBuilder, RestClient};
