//! Error types for the record codec

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed XML: {0}")]
    Xml(String),

    #[error("Expected root element <{expected}>, found <{found}>")]
    UnexpectedRoot {
        expected: &'static str,
        found: String,
    },

    #[error("Document has no <{0}> root element")]
    MissingRoot(&'static str),

    #[error("Document ends before </{0}>")]
    Truncated(String),

    #[error("Content after the root element: <{0}>")]
    TrailingContent(String),

    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Menu URL '{0}' does not point at a zone, branch or locality file")]
    UnrecognizedLink(String),
}
