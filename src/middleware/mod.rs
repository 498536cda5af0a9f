pub mod bearer_auth;

pub use bearer_auth::validate_bearer_token;
