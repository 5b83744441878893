pub mod context;
pub mod handle;
pub mod notifications;
pub mod registry;
