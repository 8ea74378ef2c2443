//! `codegrade-core` — shared building blocks for the CodeGrade client.
//!
//! This crate contains **pure** primitives (no HTTP, no storage).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{CourseId, UserId};
