pub mod buffer_flags;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod format;
pub mod property;
pub mod snapshot;
pub mod state;
