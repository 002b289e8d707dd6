//! TinyG firmware support
//!
//! JSON acknowledgments, incremental status reports and JSON override
//! commands.

pub mod dialect;
pub mod response_parser;

pub use dialect::TinyGDialect;
