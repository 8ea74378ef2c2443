//! `codegrade-auth` — permission and session vocabulary shared by the client.
//!
//! This crate is intentionally decoupled from HTTP and storage: it only
//! knows how to name permissions, address scopes, and shape answers.

pub mod permissions;
pub mod presets;
pub mod query;
pub mod scope;
pub mod session;

pub use permissions::{Permission, PermissionMap};
pub use query::{PermissionAnswer, PermissionQuery};
pub use scope::{GLOBAL_CACHE_KEY, PermissionScope};
pub use session::{Credentials, Session, SessionState};
