pub mod api;
pub mod config;
pub mod creds;
pub mod http;
pub mod ingest;
pub mod media;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use config::Config;
pub use session::{ReconnectPolicy, SessionManager};
pub use types::SessionState;
