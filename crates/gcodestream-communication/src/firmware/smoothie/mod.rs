//! Smoothieware firmware support

pub mod dialect;
pub mod response_parser;

pub use dialect::SmoothieDialect;
