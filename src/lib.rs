//! A streaming push parser for `multipart/form-data` and
//! `application/x-www-form-urlencoded` request bodies.
//!
//! Bytes are fed in arbitrarily-sized chunks through `write` and the parsers
//! report field names, field values and file-part bytes incrementally
//! through registered callbacks, without ever buffering the whole body. A
//! multipart delimiter may be split at any position across `write` calls;
//! the scanner holds the ambiguous tail in a bounded lookbehind buffer until
//! later bytes confirm or refute the match.
//!
//! The high-level entry point is [`FormParser`], which picks the right state
//! machine from the `Content-Type` header and assembles whole fields:
//!
//! ```
//! use formpipe::FormParser;
//!
//! let mut fields = Vec::new();
//! let mut parser = FormParser::builder("application/x-www-form-urlencoded")
//!     .on_field(|field| fields.push((field.name.clone(), field.text())))
//!     .build()
//!     .unwrap();
//!
//! parser.write(b"a=1&b=hello+world").unwrap();
//! parser.finalize().unwrap();
//! drop(parser);
//!
//! assert_eq!(fields.len(), 2);
//! ```
//!
//! [`MultipartParser`] and [`QuerystringParser`] expose the raw event stream
//! for callers that manage their own sinks, and [`Base64Decoder`] /
//! [`QuotedPrintableDecoder`] handle the content-transfer-encodings found
//! inside multipart parts.

pub use constraints::Constraints;
pub use content_disposition::ContentDisposition;
pub use decoders::{Base64Decoder, QuotedPrintableDecoder, Sink};
pub use error::{Error, ErrorKind};
pub use events::{Callbacks, Event, Payload};
pub use form::{decode_text, FileInfo, FormField, FormParser, FormParserBuilder};
pub use multipart::MultipartParser;
pub use querystring::QuerystringParser;

mod constants;
mod constraints;
mod content_disposition;
mod decoders;
mod error;
mod events;
mod form;
mod helpers;
mod multipart;
mod querystring;

/// A Result type often returned from methods that can have `formpipe`
/// errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Parses the `Content-Type` header to extract the boundary value.
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> crate::Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(|err| Error::DecodeContentType(err.to_string()))?;

    if !(m.type_() == mime::MULTIPART_FORM_DATA.type_() && m.subtype() == mime::MULTIPART_FORM_DATA.subtype()) {
        return Err(Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(Error::NoBoundary)
}
