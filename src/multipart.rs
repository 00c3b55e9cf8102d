use bytes::BytesMut;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use log::{debug, trace};
use memchr::{memchr, memmem};

use crate::constants;
use crate::constraints::Constraints;
use crate::error::Error;
use crate::events::{Callbacks, Event, Payload};
use crate::helpers;

/// The scanner's current position in the multipart grammar.
///
/// A possible delimiter split across writes is not a separate state: the
/// provisional bytes simply stay at the tail of the internal buffer, so
/// `Data` covers both the confirmed-data and the partial-match situations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Discarding bytes before the first delimiter line.
    Preamble,
    /// A delimiter was just matched; the next bytes decide between another
    /// part (CRLF) and the terminal form (`--`).
    BoundarySuffix,
    /// Accumulating part-header lines until the blank line.
    HeaderLine,
    /// Emitting part-body bytes while watching for the next delimiter.
    Data,
    /// Discarding everything after the terminal delimiter.
    Epilogue,
    /// Terminal; entered by `finalize`.
    Done,
}

/// A streaming push parser for `multipart/form-data` bodies.
///
/// Feed arbitrarily-chunked bytes with [`write`](MultipartParser::write) and
/// close the stream with [`finalize`](MultipartParser::finalize); part
/// boundaries, headers and data are reported through the registered
/// [`Callbacks`]. Delimiters may be split at any byte position across
/// writes: bytes that could still be the prefix of a delimiter are held in a
/// lookbehind buffer (never more than the delimiter length) and are released
/// as ordinary data the moment a later byte refutes the match.
///
/// ```
/// use formpipe::{Callbacks, Constraints, Event, MultipartParser, Payload};
///
/// let body = b"--MARK\r\nContent-Disposition: form-data; name=\"greeting\"\r\n\r\nhello\r\n--MARK--\r\n";
///
/// let mut data = Vec::new();
/// let mut callbacks = Callbacks::new();
/// callbacks.set(Event::PartData, |payload| {
///     data.extend_from_slice(payload.data().unwrap());
///     Ok(())
/// });
///
/// let mut parser = MultipartParser::new("MARK", Constraints::new(), callbacks).unwrap();
/// for chunk in body.chunks(3) {
///     parser.write(chunk).unwrap();
/// }
/// parser.finalize().unwrap();
/// drop(parser);
///
/// assert_eq!(data, b"hello");
/// ```
pub struct MultipartParser<'h> {
    // CRLF + "--" + boundary.
    delimiter: Vec<u8>,
    callbacks: Callbacks<'h>,
    constraints: Constraints,
    state: ParseState,
    buf: BytesMut,
    headers: HeaderMap,
    header_count: usize,
    consumed: u64,
    failed: Option<Error>,
    finalized: bool,
}

impl<'h> MultipartParser<'h> {
    /// Creates a parser for the given boundary (already unquoted, without
    /// the leading `--`).
    ///
    /// The boundary is validated eagerly: it must be non-empty, at most 70
    /// bytes (RFC 2046) and free of CR/LF.
    pub fn new<B: AsRef<[u8]>>(
        boundary: B,
        constraints: Constraints,
        callbacks: Callbacks<'h>,
    ) -> crate::Result<MultipartParser<'h>> {
        let boundary = boundary.as_ref();

        if boundary.is_empty() {
            return Err(Error::InvalidBoundary("boundary must not be empty"));
        }
        if boundary.len() > constants::MAX_BOUNDARY_LENGTH {
            return Err(Error::InvalidBoundary("boundary longer than 70 bytes"));
        }
        if boundary.contains(&constants::CR) || boundary.contains(&constants::LF) {
            return Err(Error::InvalidBoundary("boundary must not contain CR or LF"));
        }

        let mut delimiter = Vec::with_capacity(constants::CRLF.len() + constants::BOUNDARY_EXT.len() + boundary.len());
        delimiter.extend_from_slice(constants::CRLF.as_bytes());
        delimiter.extend_from_slice(constants::BOUNDARY_EXT.as_bytes());
        delimiter.extend_from_slice(boundary);

        Ok(MultipartParser {
            delimiter,
            callbacks,
            constraints,
            state: ParseState::Preamble,
            buf: BytesMut::new(),
            headers: HeaderMap::new(),
            header_count: 0,
            consumed: 0,
            failed: None,
            finalized: false,
        })
    }

    /// Feeds one chunk. Returns the number of bytes consumed, which equals
    /// `chunk.len()` unless an error aborts processing.
    pub fn write(&mut self, chunk: &[u8]) -> crate::Result<usize> {
        self.check_reusable()?;

        self.buf.extend_from_slice(chunk);
        self.consumed += chunk.len() as u64;

        match self.advance() {
            Ok(()) => Ok(chunk.len()),
            Err(err) => {
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Closes the stream. Errors unless the terminal delimiter was seen and
    /// no provisional bytes remain.
    pub fn finalize(&mut self) -> crate::Result<()> {
        self.check_reusable()?;
        self.finalized = true;

        let result = match self.state {
            ParseState::Epilogue => {
                self.state = ParseState::Done;
                self.buf.clear();
                Ok(())
            }
            ParseState::Preamble => Err(Error::TruncatedInput {
                offset: self.consumed,
                message: "no multipart delimiter found in body",
            }),
            ParseState::BoundarySuffix | ParseState::HeaderLine => Err(Error::TruncatedInput {
                offset: self.consumed,
                message: "body ended inside part headers",
            }),
            ParseState::Data => Err(Error::TruncatedInput {
                offset: self.consumed,
                message: "unexpected end of multipart body",
            }),
            ParseState::Done => unreachable!("finalize checked the finalized flag"),
        };

        if let Err(err) = &result {
            self.failed = Some(err.clone());
        }
        result
    }

    /// Total bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn check_reusable(&self) -> crate::Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.finalized {
            return Err(Error::MalformedInput {
                offset: self.consumed,
                message: "parser used after finalize",
            });
        }
        Ok(())
    }

    // Offset of buf[idx] relative to the whole stream.
    fn offset_at(&self, idx: usize) -> u64 {
        self.consumed - self.buf.len() as u64 + idx as u64
    }

    fn advance(&mut self) -> crate::Result<()> {
        loop {
            let progressed = match self.state {
                ParseState::Preamble => self.scan_preamble()?,
                ParseState::BoundarySuffix => self.scan_boundary_suffix()?,
                ParseState::HeaderLine => self.scan_header_line()?,
                ParseState::Data => self.scan_data()?,
                ParseState::Epilogue | ParseState::Done => {
                    self.buf.clear();
                    false
                }
            };

            if !progressed {
                return Ok(());
            }
        }
    }

    // Looks for the first delimiter line: "--boundary" at the very start of
    // the stream, or preceded by CRLF after arbitrary preamble bytes.
    fn scan_preamble(&mut self) -> crate::Result<bool> {
        // The first delimiter lacks the CRLF prefix.
        let dash_boundary = &self.delimiter[constants::CRLF.len()..];

        let mut search_from = 0;
        while let Some(rel) = memmem::find(&self.buf[search_from..], dash_boundary) {
            let idx = search_from + rel;
            let at_line_start = (idx == 0 && self.offset_at(0) == 0)
                || (idx >= 2 && &self.buf[idx - 2..idx] == constants::CRLF.as_bytes());

            if at_line_start {
                trace!("first delimiter matched at offset {}", self.offset_at(idx));
                let _ = self.buf.split_to(idx + dash_boundary.len());
                self.state = ParseState::BoundarySuffix;
                return Ok(true);
            }

            search_from = idx + 1;
        }

        // Discard confirmed preamble bytes; keep a tail that could still
        // grow into "\r\n--boundary".
        let hold = self.buf.len().min(self.delimiter.len() - 1);
        let _ = self.buf.split_to(self.buf.len() - hold);
        Ok(false)
    }

    // Just behind a matched delimiter: "--" closes the body, CRLF opens the
    // next part. Lenient mode skips transport padding before the CRLF.
    fn scan_boundary_suffix(&mut self) -> crate::Result<bool> {
        let first = match self.buf.first() {
            Some(&byte) => byte,
            None => return Ok(false),
        };

        match first {
            b'-' => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if self.buf[1] != b'-' {
                    return Err(Error::MalformedInput {
                        offset: self.offset_at(1),
                        message: "malformed closing delimiter",
                    });
                }
                debug!("terminal delimiter at offset {}", self.offset_at(0));
                let _ = self.buf.split_to(2);
                self.callbacks.dispatch(Event::BodyEnd, Payload::Empty)?;
                self.state = ParseState::Epilogue;
                Ok(true)
            }
            constants::CR => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if self.buf[1] != constants::LF {
                    return Err(Error::MalformedInput {
                        offset: self.offset_at(1),
                        message: "bare CR after delimiter",
                    });
                }
                let _ = self.buf.split_to(2);
                debug!("part opened at offset {}", self.offset_at(0));
                self.headers = HeaderMap::new();
                self.header_count = 0;
                self.callbacks.dispatch(Event::PartStart, Payload::Empty)?;
                self.state = ParseState::HeaderLine;
                Ok(true)
            }
            b' ' | b'\t' if !self.constraints.strict => {
                // Transport padding between the delimiter and its CRLF.
                let padding = self
                    .buf
                    .iter()
                    .take_while(|&&byte| byte == b' ' || byte == b'\t')
                    .count();
                let _ = self.buf.split_to(padding);
                Ok(true)
            }
            _ => Err(Error::MalformedInput {
                offset: self.offset_at(0),
                message: "unexpected byte after delimiter",
            }),
        }
    }

    // Consumes one complete header line, or the blank line ending the block.
    fn scan_header_line(&mut self) -> crate::Result<bool> {
        let lf = match memchr(constants::LF, &self.buf) {
            Some(idx) => idx,
            None => {
                if self.buf.len() > self.constraints.max_header_length {
                    return Err(Error::LimitExceeded {
                        offset: self.offset_at(0),
                        message: "part header line too long",
                    });
                }
                return Ok(false);
            }
        };

        let has_cr = lf > 0 && self.buf[lf - 1] == constants::CR;
        if !has_cr && self.constraints.strict {
            return Err(Error::MalformedInput {
                offset: self.offset_at(lf),
                message: "header line not terminated by CRLF",
            });
        }

        let line_end = if has_cr { lf - 1 } else { lf };
        if line_end > self.constraints.max_header_length {
            return Err(Error::LimitExceeded {
                offset: self.offset_at(0),
                message: "part header line too long",
            });
        }

        if line_end == 0 {
            // Blank line: headers complete, body follows.
            let _ = self.buf.split_to(lf + 1);
            self.callbacks
                .dispatch(Event::PartHeadersEnd, Payload::Headers(&self.headers))?;
            self.state = ParseState::Data;
            return Ok(true);
        }

        if self.header_count >= self.constraints.max_headers_per_part {
            return Err(Error::LimitExceeded {
                offset: self.offset_at(0),
                message: "too many headers in part",
            });
        }
        self.header_count += 1;

        match self.parse_header_line(line_end) {
            Ok((name, value)) => {
                self.headers.append(name.clone(), value.clone());
                self.callbacks
                    .dispatch(Event::PartHeader, Payload::Header(&name, &value))?;
            }
            Err(err) => {
                if self.constraints.strict {
                    return Err(err);
                }
                debug!("skipping unparseable header line at offset {}", self.offset_at(0));
            }
        }

        let _ = self.buf.split_to(lf + 1);
        Ok(true)
    }

    fn parse_header_line(&self, line_end: usize) -> crate::Result<(HeaderName, HeaderValue)> {
        let line = &self.buf[..line_end];
        let malformed = |message| Error::MalformedInput {
            offset: self.offset_at(0),
            message,
        };

        let colon = memchr(b':', line).ok_or_else(|| malformed("header line without ':'"))?;

        let name = HeaderName::from_bytes(&line[..colon])
            .map_err(|_| malformed("invalid header name"))?;
        let value = HeaderValue::from_bytes(helpers::trim_ows(&line[colon + 1..]))
            .map_err(|_| malformed("invalid header value"))?;

        Ok((name, value))
    }

    // The lookbehind scan. Three outcomes: full delimiter match, a partial
    // match held back at the buffer tail, or plain data.
    fn scan_data(&mut self) -> crate::Result<bool> {
        if let Some(idx) = memmem::find(&self.buf, &self.delimiter) {
            trace!("delimiter matched at offset {}", self.offset_at(idx));
            if idx > 0 {
                self.callbacks
                    .dispatch(Event::PartData, Payload::Data(&self.buf[..idx]))?;
            }
            self.callbacks.dispatch(Event::PartEnd, Payload::Empty)?;
            debug!("part closed at offset {}", self.offset_at(idx));

            let _ = self.buf.split_to(idx + self.delimiter.len());
            self.state = ParseState::BoundarySuffix;
            return Ok(true);
        }

        // No full match: hold back the longest buffer suffix that is still a
        // delimiter prefix and release everything before it as data.
        let hold = longest_delimiter_prefix(&self.buf, &self.delimiter);
        let emit = self.buf.len() - hold;
        if emit > 0 {
            self.callbacks
                .dispatch(Event::PartData, Payload::Data(&self.buf[..emit]))?;
            let _ = self.buf.split_to(emit);
        }
        Ok(false)
    }
}

// Length of the longest proper delimiter prefix that ends `buf`; the
// longest-match tie-break for a delimiter possibly split across writes.
fn longest_delimiter_prefix(buf: &[u8], delimiter: &[u8]) -> usize {
    let max = buf.len().min(delimiter.len() - 1);
    for k in (1..=max).rev() {
        if buf[buf.len() - k..] == delimiter[..k] {
            return k;
        }
    }
    0
}
