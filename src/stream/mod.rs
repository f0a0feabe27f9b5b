//! Streamed-reply protocol handling
//!
//! Two small, separately-testable layers: [`framer::LineFramer`] turns
//! arbitrarily-chunked body text into discrete lines, and
//! [`decoder::decode_line`] classifies each line as a content fragment, the
//! reply terminator, an ignorable line, or an incomplete payload to
//! re-buffer.

pub mod decoder;
pub mod framer;

pub use decoder::{decode_line, Decoded};
pub use framer::LineFramer;
