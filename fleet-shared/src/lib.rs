pub mod application;
pub mod config;
pub mod device;
pub mod manifest;
