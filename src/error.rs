use std::fmt::{self, Debug, Display, Formatter};

use derive_more::Display;

/// The category of an [`Error`], for callers that branch on failure class
/// rather than on the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A byte sequence no parser state accepts.
    MalformedInput,
    /// The stream ended mid-decode, mid-part or mid-delimiter.
    TruncatedInput,
    /// A configured header, field or length cap was exceeded.
    LimitExceeded,
    /// The parser was constructed with unusable configuration.
    InvalidConfiguration,
}

/// A set of errors that can occur while parsing a request body and in other
/// operations.
///
/// Every parsing error carries the byte offset, relative to the parser's
/// total consumed-byte counter, of the input that triggered it.
#[derive(Display, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The input contains a byte sequence no parser state accepts.
    #[display(fmt = "malformed input at byte {}: {}", offset, message)]
    MalformedInput { offset: u64, message: &'static str },

    /// The stream ended while a decode unit, header or part was still open.
    #[display(fmt = "truncated input at byte {}: {}", offset, message)]
    TruncatedInput { offset: u64, message: &'static str },

    /// A configured cap was exceeded.
    #[display(fmt = "limit exceeded at byte {}: {}", offset, message)]
    LimitExceeded { offset: u64, message: &'static str },

    /// The multipart boundary is unusable.
    #[display(fmt = "invalid boundary: {}", _0)]
    InvalidBoundary(&'static str),

    /// The `Content-Type` header does not describe a supported form body.
    #[display(fmt = "Content-Type is not a supported form content type")]
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    #[display(fmt = "failed to parse Content-Type as a mime type: {}", _0)]
    DecodeContentType(String),

    /// No boundary found in the `Content-Type` header.
    #[display(fmt = "multipart boundary not found in Content-Type")]
    NoBoundary,
}

impl Error {
    /// Classifies this error into one of the four [`ErrorKind`] categories.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedInput { .. } => ErrorKind::MalformedInput,
            Error::TruncatedInput { .. } => ErrorKind::TruncatedInput,
            Error::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Error::InvalidBoundary(_)
            | Error::NoMultipart
            | Error::DecodeContentType(_)
            | Error::NoBoundary => ErrorKind::InvalidConfiguration,
        }
    }

    /// The total consumed-byte offset at which this error was raised, if it
    /// was raised by parsing rather than by construction.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::MalformedInput { offset, .. }
            | Error::TruncatedInput { offset, .. }
            | Error::LimitExceeded { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
