pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::{AuthSettings, sign_token, verify_token};
pub use server::{ApiState, build_router, serve};
