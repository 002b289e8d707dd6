//! GRBL firmware support
//!
//! Provides response classification, status report parsing, error and
//! alarm decoding, and the version-keyed command vocabulary.

pub mod dialect;
pub mod error_decoder;
pub mod response_parser;
pub mod status_parser;

pub use dialect::GrblDialect;
pub use error_decoder::{decode_alarm, decode_error, format_alarm, format_error};
pub use response_parser::GrblResponseParser;
