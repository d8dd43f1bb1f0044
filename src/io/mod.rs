pub mod config;
pub mod raw;
pub mod topology;
