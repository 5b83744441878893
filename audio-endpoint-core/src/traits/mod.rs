pub mod analyzer;
pub mod controller_delegate;
pub mod device_api;
pub mod notification_sink;
pub mod stream_backend;
