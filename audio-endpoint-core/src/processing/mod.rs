pub mod analyzer;
pub mod ring_buffer;
pub mod samples;
