//! Utility modules

pub mod format;
pub mod logging;

pub use format::format_size;
