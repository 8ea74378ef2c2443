//! `codegrade-client`
//!
//! **Responsibility:** client-side core of the CodeGrade front-end.
//!
//! This crate provides:
//! - A permission cache that answers permission questions from a persisted,
//!   expiring copy and coalesces concurrent fetches per scope
//! - The session lifecycle (login, logout, verify) with reactive state
//! - Scoped key/value storage (in-memory and SQLite)
//! - A `reqwest` client for the CodeGrade HTTP API
//!
//! The server remains the authority; everything here is a cache of it.

pub mod api;
pub mod client;
pub mod config;
pub mod permissions;
pub mod session;
pub mod store;

pub use api::{ApiError, ApiErrorBody, AuthApi, HttpApi, PermissionSource, UserPayload};
pub use client::CodeGradeClient;
pub use config::ClientConfig;
pub use permissions::{CacheEntry, PermissionCache, PermissionError};
pub use session::{SessionError, SessionManager};
pub use store::{InMemoryStore, KeyValueStore, SqliteStore, StoreError};
