pub mod memory;
pub mod rest;
pub mod traits;

pub use memory::InMemoryBackend;
pub use rest::RestBackend;
pub use traits::{
    AccountStore, Backend, ContactStore, MessageStore, Result, SessionStore, StoreError,
};
