use bytes::BytesMut;
use log::debug;
use memchr::memchr;

use crate::constraints::Constraints;
use crate::error::Error;
use crate::events::{Callbacks, Event, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    /// Expecting a field name or end of input.
    BeforeField,
    /// Accumulating name bytes until `=` or `&`.
    InName,
    /// Streaming value bytes until `&`.
    InValue,
}

/// A streaming push parser for `application/x-www-form-urlencoded` bodies.
///
/// Field names are accumulated and delivered whole through the
/// [`FieldStart`](Event::FieldStart) event; value bytes stream through
/// [`FieldData`](Event::FieldData) as they arrive, so large values never
/// buffer fully. Bytes are forwarded raw: percent-decoding is the sink's
/// concern, applied once per delimiter-bounded segment.
///
/// Lenient mode (the default) turns a bare name (`&a&b=c`) into a field with
/// an empty value: `FieldStart` immediately followed by `FieldEnd` with no
/// `FieldData` in between. Strict mode rejects it at the offset of the
/// terminating `&` (or at end of input).
pub struct QuerystringParser<'h> {
    callbacks: Callbacks<'h>,
    constraints: Constraints,
    state: FieldState,
    name: BytesMut,
    field_count: usize,
    consumed: u64,
    failed: Option<Error>,
    finalized: bool,
}

impl<'h> QuerystringParser<'h> {
    pub fn new(constraints: Constraints, callbacks: Callbacks<'h>) -> QuerystringParser<'h> {
        QuerystringParser {
            callbacks,
            constraints,
            state: FieldState::BeforeField,
            name: BytesMut::new(),
            field_count: 0,
            consumed: 0,
            failed: None,
            finalized: false,
        }
    }

    /// Feeds one chunk. Returns the number of bytes consumed, which equals
    /// `chunk.len()` unless an error aborts processing.
    pub fn write(&mut self, chunk: &[u8]) -> crate::Result<usize> {
        self.check_reusable()?;

        match self.write_inner(chunk) {
            Ok(()) => {
                self.consumed += chunk.len() as u64;
                Ok(chunk.len())
            }
            Err(err) => {
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Closes the stream, completing any in-flight field.
    pub fn finalize(&mut self) -> crate::Result<()> {
        self.check_reusable()?;
        self.finalized = true;

        let result = self.finalize_inner();
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

    fn write_inner(&mut self, chunk: &[u8]) -> crate::Result<()> {
        let mut pos = 0;

        while pos < chunk.len() {
            match self.state {
                FieldState::BeforeField => {
                    // Empty segments ("&&", leading "&") carry no name, so
                    // neither mode has anything to report.
                    if chunk[pos] == b'&' {
                        pos += 1;
                    } else {
                        self.state = FieldState::InName;
                    }
                }
                FieldState::InName => {
                    let rel = chunk[pos..].iter().position(|&b| b == b'=' || b == b'&');
                    match rel {
                        None => {
                            self.name.extend_from_slice(&chunk[pos..]);
                            pos = chunk.len();
                        }
                        Some(rel) => {
                            self.name.extend_from_slice(&chunk[pos..pos + rel]);
                            let separator_offset = self.consumed + (pos + rel) as u64;
                            let separator = chunk[pos + rel];
                            pos += rel + 1;

                            if separator == b'=' {
                                self.begin_field(separator_offset)?;
                                self.state = FieldState::InValue;
                            } else {
                                self.bare_name(separator_offset)?;
                                self.state = FieldState::BeforeField;
                            }
                        }
                    }
                }
                FieldState::InValue => match memchr(b'&', &chunk[pos..]) {
                    None => {
                        self.callbacks
                            .dispatch(Event::FieldData, Payload::Data(&chunk[pos..]))?;
                        pos = chunk.len();
                    }
                    Some(rel) => {
                        if rel > 0 {
                            self.callbacks
                                .dispatch(Event::FieldData, Payload::Data(&chunk[pos..pos + rel]))?;
                        }
                        self.callbacks.dispatch(Event::FieldEnd, Payload::Empty)?;
                        pos += rel + 1;
                        self.state = FieldState::BeforeField;
                    }
                },
            }
        }

        Ok(())
    }

    fn finalize_inner(&mut self) -> crate::Result<()> {
        match self.state {
            FieldState::BeforeField => {}
            FieldState::InName => {
                self.bare_name(self.consumed)?;
            }
            FieldState::InValue => {
                self.callbacks.dispatch(Event::FieldEnd, Payload::Empty)?;
            }
        }
        self.state = FieldState::BeforeField;
        self.callbacks.dispatch(Event::BodyEnd, Payload::Empty)
    }

    // A completed name: enforce the field cap, then announce the field.
    fn begin_field(&mut self, offset: u64) -> crate::Result<()> {
        if self.field_count >= self.constraints.max_fields {
            return Err(Error::LimitExceeded {
                offset,
                message: "too many fields",
            });
        }
        self.field_count += 1;
        debug!("field #{} started", self.field_count);

        self.callbacks
            .dispatch(Event::FieldStart, Payload::Data(&self.name))?;
        self.name.clear();
        Ok(())
    }

    // A name terminated without '=': mode-dependent.
    fn bare_name(&mut self, offset: u64) -> crate::Result<()> {
        if self.constraints.strict {
            return Err(Error::MalformedInput {
                offset,
                message: "field without '='",
            });
        }
        self.begin_field(offset)?;
        self.callbacks.dispatch(Event::FieldEnd, Payload::Empty)
    }
}
