pub mod bridge;
pub mod config;
pub mod error;
pub mod handle;
pub mod slot;
pub mod vm;
