//! Step definitions for the interface features.

pub mod backlog;
pub mod registry;
pub mod router;
