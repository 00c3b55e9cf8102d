use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};

use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Events emitted by the body parsers.
///
/// The querystring machine emits the `Field*` events, the multipart scanner
/// the `Part*` events; both emit [`BodyEnd`](Event::BodyEnd) exactly once on
/// a successful `finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A field name is complete. Payload: the raw name bytes.
    FieldStart,
    /// A slice of a field's value. Payload: the raw value bytes.
    FieldData,
    /// The current field is complete.
    FieldEnd,
    /// A new multipart part was opened.
    PartStart,
    /// One part header was parsed. Payload: the header name and value.
    PartHeader,
    /// The blank line ending a part's header block was consumed.
    /// Payload: the part's full header map.
    PartHeadersEnd,
    /// A slice of a part's body. Payload: the raw data bytes.
    PartData,
    /// The current part was closed by a delimiter.
    PartEnd,
    /// The body is complete; no further events follow.
    BodyEnd,
}

/// The data accompanying a dispatched [`Event`].
pub enum Payload<'a> {
    /// The event itself is the signal; there is no data.
    Empty,
    /// A borrowed byte span. A zero-length span marks a logical boundary
    /// rather than data.
    Data(&'a [u8]),
    /// A parsed part header.
    Header(&'a HeaderName, &'a HeaderValue),
    /// The completed header map of the current part.
    Headers(&'a HeaderMap),
}

impl<'a> Payload<'a> {
    /// The byte span carried by this payload, if any.
    pub fn data(&self) -> Option<&'a [u8]> {
        match self {
            Payload::Data(data) => Some(data),
            _ => None,
        }
    }
}

type Handler<'h> = Box<dyn FnMut(Payload<'_>) -> crate::Result<()> + 'h>;

/// A registry mapping each [`Event`] to zero or one handler.
///
/// Dispatch is synchronous on the caller's thread. An event with no
/// registered handler is silently dropped; a handler returning `Err` aborts
/// the `write` call that triggered it and poisons the parser. Handlers only
/// receive borrowed payloads, so they cannot re-enter the parser that is
/// dispatching to them.
#[derive(Default)]
pub struct Callbacks<'h> {
    handlers: HashMap<Event, Handler<'h>>,
}

impl<'h> Callbacks<'h> {
    /// Creates an empty registry.
    pub fn new() -> Callbacks<'h> {
        Callbacks::default()
    }

    /// Registers `handler` for `event`, replacing any previous handler.
    pub fn set<F>(&mut self, event: Event, handler: F) -> &mut Self
    where
        F: FnMut(Payload<'_>) -> crate::Result<()> + 'h,
    {
        self.handlers.insert(event, Box::new(handler));
        self
    }

    /// Registers `handler` for `event` in builder position.
    pub fn with<F>(mut self, event: Event, handler: F) -> Self
    where
        F: FnMut(Payload<'_>) -> crate::Result<()> + 'h,
    {
        self.set(event, handler);
        self
    }

    /// Invokes the handler registered for `event`, if there is one.
    pub fn dispatch(&mut self, event: Event, payload: Payload<'_>) -> crate::Result<()> {
        match self.handlers.get_mut(&event) {
            Some(handler) => handler(payload),
            None => Ok(()),
        }
    }
}

impl Debug for Callbacks<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
