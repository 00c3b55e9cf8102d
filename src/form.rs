use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use log::debug;
use mime::Mime;

use crate::constraints::Constraints;
use crate::content_disposition::ContentDisposition;
use crate::decoders::{Base64Decoder, QuotedPrintableDecoder};
use crate::error::Error;
use crate::events::{Callbacks, Event, Payload};
use crate::helpers;
use crate::multipart::MultipartParser;
use crate::querystring::QuerystringParser;

/// Decodes `data` with the named charset, falling back to UTF-8 when the
/// label is absent or unknown.
pub fn decode_text(data: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, _, _) = encoding.decode(data);
    text.into_owned()
}

/// A fully assembled non-file field.
#[derive(Debug, Clone)]
pub struct FormField {
    /// Field name, from the querystring or the part's `Content-Disposition`.
    pub name: String,
    /// Decoded value bytes: transfer-encoding removed for multipart parts,
    /// `%XX`/`+` resolved for urlencoded bodies.
    pub data: Bytes,
    charset: Option<String>,
}

impl FormField {
    /// The value as text, decoded with the field's declared charset.
    pub fn text(&self) -> String {
        decode_text(&self.data, self.charset.as_deref())
    }
}

/// Metadata of a file part, available from the moment its headers complete.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub field_name: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<Mime>,
    pub headers: HeaderMap,
}

type FieldHook<'h> = Box<dyn FnMut(&FormField) + 'h>;
type FileStartHook<'h> = Box<dyn FnMut(&FileInfo) + 'h>;
type FileDataHook<'h> = Box<dyn FnMut(&[u8]) + 'h>;
type FileEndHook<'h> = Box<dyn FnMut() + 'h>;
type PartHeaderHook<'h> = Box<dyn FnMut(&HeaderName, &HeaderValue) + 'h>;
type ErrorHook<'h> = Box<dyn FnMut(&Error) + 'h>;

#[derive(Default)]
struct Hooks<'h> {
    on_field: Option<FieldHook<'h>>,
    on_file_start: Option<FileStartHook<'h>>,
    on_file_data: Option<FileDataHook<'h>>,
    on_file_end: Option<FileEndHook<'h>>,
    on_part_header: Option<PartHeaderHook<'h>>,
}

/// Builder for [`FormParser`]; see there.
pub struct FormParserBuilder<'h> {
    content_type: String,
    constraints: Constraints,
    hooks: Hooks<'h>,
    on_error: Option<ErrorHook<'h>>,
}

impl<'h> FormParserBuilder<'h> {
    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Called once per completed non-file field.
    pub fn on_field<F: FnMut(&FormField) + 'h>(mut self, hook: F) -> Self {
        self.hooks.on_field = Some(Box::new(hook));
        self
    }

    /// Called when a file part's headers complete.
    pub fn on_file_start<F: FnMut(&FileInfo) + 'h>(mut self, hook: F) -> Self {
        self.hooks.on_file_start = Some(Box::new(hook));
        self
    }

    /// Called with each decoded slice of a file part's body.
    pub fn on_file_data<F: FnMut(&[u8]) + 'h>(mut self, hook: F) -> Self {
        self.hooks.on_file_data = Some(Box::new(hook));
        self
    }

    /// Called when a file part is closed.
    pub fn on_file_end<F: FnMut() + 'h>(mut self, hook: F) -> Self {
        self.hooks.on_file_end = Some(Box::new(hook));
        self
    }

    /// Called with every parsed part header.
    pub fn on_part_header<F: FnMut(&HeaderName, &HeaderValue) + 'h>(mut self, hook: F) -> Self {
        self.hooks.on_part_header = Some(Box::new(hook));
        self
    }

    /// Observes the error that poisoned the parser, in addition to the
    /// `Err` returned from `write`/`finalize`.
    pub fn on_error<F: FnMut(&Error) + 'h>(mut self, hook: F) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> crate::Result<FormParser<'h>> {
        let mime: Mime = self
            .content_type
            .parse()
            .map_err(|err: mime::FromStrError| Error::DecodeContentType(err.to_string()))?;

        let inner = if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA {
            let boundary = mime
                .get_param(mime::BOUNDARY)
                .map(|name| name.as_str().to_owned())
                .ok_or(Error::NoBoundary)?;

            Inner::Multipart(build_multipart(
                boundary,
                self.constraints,
                self.hooks,
            )?)
        } else if mime.type_() == mime::APPLICATION && mime.subtype() == mime::WWW_FORM_URLENCODED {
            let charset = mime
                .get_param(mime::CHARSET)
                .map(|charset| charset.as_str().to_owned());

            Inner::Urlencoded(build_urlencoded(charset, self.constraints, self.hooks))
        } else {
            return Err(Error::NoMultipart);
        };

        Ok(FormParser {
            inner,
            on_error: self.on_error,
        })
    }
}

enum Inner<'h> {
    Multipart(MultipartParser<'h>),
    Urlencoded(QuerystringParser<'h>),
}

/// Parses a whole request body, selecting the multipart or the querystring
/// state machine from the declared `Content-Type` and assembling their raw
/// events into fields and files.
///
/// ```
/// use formpipe::FormParser;
///
/// let mut fields = Vec::new();
/// let mut parser = FormParser::builder("application/x-www-form-urlencoded")
///     .on_field(|field| fields.push((field.name.clone(), field.text())))
///     .build()
///     .unwrap();
///
/// parser.write(b"greeting=hello+world&count=3").unwrap();
/// parser.finalize().unwrap();
/// drop(parser);
///
/// assert_eq!(fields[0], ("greeting".to_owned(), "hello world".to_owned()));
/// assert_eq!(fields[1], ("count".to_owned(), "3".to_owned()));
/// ```
pub struct FormParser<'h> {
    inner: Inner<'h>,
    on_error: Option<ErrorHook<'h>>,
}

impl<'h> FormParser<'h> {
    pub fn builder<T: Into<String>>(content_type: T) -> FormParserBuilder<'h> {
        FormParserBuilder {
            content_type: content_type.into(),
            constraints: Constraints::new(),
            hooks: Hooks::default(),
            on_error: None,
        }
    }

    /// Feeds one chunk to the selected state machine.
    pub fn write(&mut self, chunk: &[u8]) -> crate::Result<usize> {
        let result = match &mut self.inner {
            Inner::Multipart(parser) => parser.write(chunk),
            Inner::Urlencoded(parser) => parser.write(chunk),
        };
        self.report(result)
    }

    /// Closes the body.
    pub fn finalize(&mut self) -> crate::Result<()> {
        let result = match &mut self.inner {
            Inner::Multipart(parser) => parser.finalize(),
            Inner::Urlencoded(parser) => parser.finalize(),
        };
        self.report(result)
    }

    fn report<T>(&mut self, result: crate::Result<T>) -> crate::Result<T> {
        if let (Err(err), Some(hook)) = (&result, self.on_error.as_mut()) {
            hook(err);
        }
        result
    }
}

// One in-flight multipart part.
struct PartState {
    disposition: ContentDisposition,
    charset: Option<String>,
    is_file: bool,
    decoder: PartDecoder,
    value: BytesMut,
}

// Routes part data through the declared Content-Transfer-Encoding.
enum PartDecoder {
    Identity(BytesMut),
    Base64(Base64Decoder<BytesMut>),
    QuotedPrintable(QuotedPrintableDecoder<BytesMut>),
}

impl PartDecoder {
    fn for_headers(headers: &HeaderMap, strict: bool) -> PartDecoder {
        let encoding = headers
            .get("content-transfer-encoding")
            .and_then(|value| value.to_str().ok())
            .map(str::to_ascii_lowercase);

        match encoding.as_deref() {
            Some("base64") => PartDecoder::Base64(Base64Decoder::with_strict(BytesMut::new(), strict)),
            Some("quoted-printable") => PartDecoder::QuotedPrintable(QuotedPrintableDecoder::new(BytesMut::new())),
            // 7bit, 8bit, binary and absent all pass through.
            _ => PartDecoder::Identity(BytesMut::new()),
        }
    }

    fn write(&mut self, data: &[u8]) -> crate::Result<()> {
        match self {
            PartDecoder::Identity(buf) => {
                buf.extend_from_slice(data);
                Ok(())
            }
            PartDecoder::Base64(decoder) => decoder.write(data).map(|_| ()),
            PartDecoder::QuotedPrintable(decoder) => decoder.write(data).map(|_| ()),
        }
    }

    fn finalize(&mut self) -> crate::Result<()> {
        match self {
            PartDecoder::Identity(_) => Ok(()),
            PartDecoder::Base64(decoder) => decoder.finalize(),
            PartDecoder::QuotedPrintable(decoder) => decoder.finalize(),
        }
    }

    fn drain(&mut self) -> BytesMut {
        match self {
            PartDecoder::Identity(buf) => buf.split(),
            PartDecoder::Base64(decoder) => decoder.get_mut().split(),
            PartDecoder::QuotedPrintable(decoder) => decoder.get_mut().split(),
        }
    }
}

struct MultipartAssembly<'h> {
    hooks: Hooks<'h>,
    strict: bool,
    part: Option<PartState>,
}

impl<'h> MultipartAssembly<'h> {
    fn open_part(&mut self, headers: &HeaderMap) -> crate::Result<()> {
        let disposition = ContentDisposition::parse(headers);
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Mime>().ok());
        let charset = content_type
            .as_ref()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str().to_owned());

        let is_file = disposition.is_file();
        if is_file {
            debug!("file part opened: {:?}", disposition.file_name);
            if let Some(hook) = self.hooks.on_file_start.as_mut() {
                let info = FileInfo {
                    field_name: disposition.field_name.clone(),
                    file_name: disposition.file_name.clone(),
                    content_type: content_type.clone(),
                    headers: headers.clone(),
                };
                hook(&info);
            }
        }

        self.part = Some(PartState {
            disposition,
            charset,
            is_file,
            decoder: PartDecoder::for_headers(headers, self.strict),
            value: BytesMut::new(),
        });
        Ok(())
    }

    fn part_data(&mut self, data: &[u8]) -> crate::Result<()> {
        let part = match self.part.as_mut() {
            Some(part) => part,
            None => return Ok(()),
        };

        part.decoder.write(data)?;
        let decoded = part.decoder.drain();
        if decoded.is_empty() {
            return Ok(());
        }

        if part.is_file {
            if let Some(hook) = self.hooks.on_file_data.as_mut() {
                hook(&decoded);
            }
        } else {
            part.value.extend_from_slice(&decoded);
        }
        Ok(())
    }

    fn close_part(&mut self) -> crate::Result<()> {
        let mut part = match self.part.take() {
            Some(part) => part,
            None => return Ok(()),
        };

        part.decoder.finalize()?;
        let decoded = part.decoder.drain();

        if part.is_file {
            if !decoded.is_empty() {
                if let Some(hook) = self.hooks.on_file_data.as_mut() {
                    hook(&decoded);
                }
            }
            if let Some(hook) = self.hooks.on_file_end.as_mut() {
                hook();
            }
        } else {
            part.value.extend_from_slice(&decoded);
            if let Some(hook) = self.hooks.on_field.as_mut() {
                let field = FormField {
                    name: part.disposition.field_name.unwrap_or_default(),
                    data: part.value.freeze(),
                    charset: part.charset,
                };
                hook(&field);
            }
        }
        Ok(())
    }
}

fn build_multipart<'h>(
    boundary: String,
    constraints: Constraints,
    hooks: Hooks<'h>,
) -> crate::Result<MultipartParser<'h>> {
    let strict = constraints.strict;
    let shared = Rc::new(RefCell::new(MultipartAssembly {
        hooks,
        strict,
        part: None,
    }));

    let mut callbacks = Callbacks::new();

    let assembly = Rc::clone(&shared);
    callbacks.set(Event::PartHeader, move |payload| {
        if let Payload::Header(name, value) = payload {
            if let Some(hook) = assembly.borrow_mut().hooks.on_part_header.as_mut() {
                hook(name, value);
            }
        }
        Ok(())
    });

    let assembly = Rc::clone(&shared);
    callbacks.set(Event::PartHeadersEnd, move |payload| {
        if let Payload::Headers(headers) = payload {
            assembly.borrow_mut().open_part(headers)?;
        }
        Ok(())
    });

    let assembly = Rc::clone(&shared);
    callbacks.set(Event::PartData, move |payload| {
        if let Some(data) = payload.data() {
            assembly.borrow_mut().part_data(data)?;
        }
        Ok(())
    });

    let assembly = shared;
    callbacks.set(Event::PartEnd, move |_| assembly.borrow_mut().close_part());

    MultipartParser::new(boundary, constraints, callbacks)
}

struct UrlencodedAssembly<'h> {
    hooks: Hooks<'h>,
    charset: Option<String>,
    name: String,
    value: BytesMut,
}

impl<'h> UrlencodedAssembly<'h> {
    fn end_field(&mut self) {
        if let Some(hook) = self.hooks.on_field.as_mut() {
            let field = FormField {
                name: std::mem::take(&mut self.name),
                data: Bytes::from(helpers::decode_url_segment(&self.value)),
                charset: self.charset.clone(),
            };
            hook(&field);
        }
        self.name.clear();
        self.value.clear();
    }
}

fn build_urlencoded<'h>(
    charset: Option<String>,
    constraints: Constraints,
    hooks: Hooks<'h>,
) -> QuerystringParser<'h> {
    let shared = Rc::new(RefCell::new(UrlencodedAssembly {
        hooks,
        charset,
        name: String::new(),
        value: BytesMut::new(),
    }));

    let mut callbacks = Callbacks::new();

    let assembly = Rc::clone(&shared);
    callbacks.set(Event::FieldStart, move |payload| {
        if let Some(raw) = payload.data() {
            let mut assembly = assembly.borrow_mut();
            let decoded = helpers::decode_url_segment(raw);
            assembly.name = decode_text(&decoded, assembly.charset.as_deref());
        }
        Ok(())
    });

    let assembly = Rc::clone(&shared);
    callbacks.set(Event::FieldData, move |payload| {
        if let Some(data) = payload.data() {
            assembly.borrow_mut().value.extend_from_slice(data);
        }
        Ok(())
    });

    let assembly = shared;
    callbacks.set(Event::FieldEnd, move |_| {
        assembly.borrow_mut().end_field();
        Ok(())
    });

    QuerystringParser::new(constraints, callbacks)
}
