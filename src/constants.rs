use lazy_static::lazy_static;
use regex::Regex;

pub(crate) const DEFAULT_MAX_HEADER_LENGTH: usize = 8192;
pub(crate) const DEFAULT_MAX_HEADERS_PER_PART: usize = 32;
pub(crate) const DEFAULT_MAX_FIELDS: usize = 1024;

// RFC 2046 §5.1.1 caps the boundary at 70 characters.
pub(crate) const MAX_BOUNDARY_LENGTH: usize = 70;

pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CR: u8 = b'\r';
pub(crate) const LF: u8 = b'\n';
pub(crate) const CRLF: &str = "\r\n";

lazy_static! {
    pub(crate) static ref CONTENT_DISPOSITION_FIELD_NAME_RE: Regex = Regex::new(r#"name="([^"]+)""#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FILE_NAME_RE: Regex = Regex::new(r#"filename="([^"]+)""#).unwrap();
}
