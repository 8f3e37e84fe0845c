pub mod auth;

pub use auth::{auth_middleware, issue_token, Claims, Role};
