use crate::constants;

/// Parsing constraints shared by the body parsers.
///
/// The defaults are lenient: whitespace inside Base64 input is skipped,
/// querystring fields without `=` become fields with an empty value, and
/// unparseable part-header lines are ignored. Setting
/// [`strict`](Constraints::strict) turns all of those into errors.
#[derive(Debug, Clone)]
pub struct Constraints {
    pub(crate) strict: bool,
    pub(crate) max_header_length: usize,
    pub(crate) max_headers_per_part: usize,
    pub(crate) max_fields: usize,
}

impl Constraints {
    /// Creates the default, lenient constraints.
    pub fn new() -> Constraints {
        Constraints::default()
    }

    /// Rejects malformed-but-common input shapes instead of tolerating them.
    pub fn strict(mut self, strict: bool) -> Constraints {
        self.strict = strict;
        self
    }

    /// Caps the byte length of a single part-header line.
    pub fn max_header_length(mut self, limit: usize) -> Constraints {
        self.max_header_length = limit;
        self
    }

    /// Caps the number of header lines in a single multipart part.
    pub fn max_headers_per_part(mut self, limit: usize) -> Constraints {
        self.max_headers_per_part = limit;
        self
    }

    /// Caps the number of fields in a querystring body.
    pub fn max_fields(mut self, limit: usize) -> Constraints {
        self.max_fields = limit;
        self
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            strict: false,
            max_header_length: constants::DEFAULT_MAX_HEADER_LENGTH,
            max_headers_per_part: constants::DEFAULT_MAX_HEADERS_PER_PART,
            max_fields: constants::DEFAULT_MAX_FIELDS,
        }
    }
}
