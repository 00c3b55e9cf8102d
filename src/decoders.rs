use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::BytesMut;
use memchr::memchr;

use crate::error::Error;

/// Receives decoded bytes from a streaming decoder.
///
/// A decoder owns its sink and forwards output as it is produced; nothing is
/// buffered beyond the decoder's own carry state. `finalize` is chained so
/// stacked sinks flush in order.
pub trait Sink {
    fn write(&mut self, data: &[u8]) -> crate::Result<()>;

    fn finalize(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

impl Sink for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> crate::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl Sink for BytesMut {
    fn write(&mut self, data: &[u8]) -> crate::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, data: &[u8]) -> crate::Result<()> {
        (**self).write(data)
    }

    fn finalize(&mut self) -> crate::Result<()> {
        (**self).finalize()
    }
}

fn is_base64_char(byte: u8) -> bool {
    matches!(byte, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}

/// A streaming Base64 decoder wrapping a byte [`Sink`].
///
/// Input may be split at any byte: up to 3 characters that do not complete a
/// 4-character group are carried to the next `write`. Alphabet and padding
/// placement are validated per byte so errors report exact offsets; the
/// 6-bit packing of each complete group is delegated to [`base64`].
///
/// Lenient mode (the default) skips ASCII whitespace between characters;
/// strict mode rejects it.
pub struct Base64Decoder<S> {
    sink: S,
    carry: [u8; 4],
    carry_len: usize,
    seen_padding: bool,
    strict: bool,
    consumed: u64,
    failed: Option<Error>,
    finalized: bool,
}

impl<S: Sink> Base64Decoder<S> {
    /// Creates a lenient decoder forwarding decoded bytes to `sink`.
    pub fn new(sink: S) -> Base64Decoder<S> {
        Base64Decoder::with_strict(sink, false)
    }

    pub fn with_strict(sink: S, strict: bool) -> Base64Decoder<S> {
        Base64Decoder {
            sink,
            carry: [0; 4],
            carry_len: 0,
            seen_padding: false,
            strict,
            consumed: 0,
            failed: None,
            finalized: false,
        }
    }

    /// Decodes one chunk, forwarding complete groups to the sink.
    pub fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        self.check_reusable()?;

        match self.write_inner(data) {
            Ok(()) => Ok(data.len()),
            Err(err) => {
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Flushes carry state and finalizes the sink.
    ///
    /// A leftover that is not a complete (optionally padded) group means the
    /// input was cut off mid-character-quad and is reported as truncation.
    pub fn finalize(&mut self) -> crate::Result<()> {
        self.check_reusable()?;
        self.finalized = true;

        if self.carry_len > 0 {
            let err = Error::TruncatedInput {
                offset: self.consumed,
                message: "base64 input ended mid-group",
            };
            self.failed = Some(err.clone());
            return Err(err);
        }

        self.sink.finalize()
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    fn check_reusable(&self) -> crate::Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.finalized {
            return Err(Error::MalformedInput {
                offset: self.consumed,
                message: "decoder used after finalize",
            });
        }
        Ok(())
    }

    fn write_inner(&mut self, data: &[u8]) -> crate::Result<()> {
        for (i, &byte) in data.iter().enumerate() {
            let offset = self.consumed + i as u64;

            if byte.is_ascii_whitespace() {
                if self.strict {
                    return Err(Error::MalformedInput {
                        offset,
                        message: "whitespace in base64 input",
                    });
                }
                continue;
            }

            if self.seen_padding {
                return Err(Error::MalformedInput {
                    offset,
                    message: "data after base64 padding",
                });
            }

            if byte == b'=' {
                // Padding is only valid as the 3rd or 4th character of the
                // final group.
                if self.carry_len < 2 {
                    return Err(Error::MalformedInput {
                        offset,
                        message: "misplaced base64 padding",
                    });
                }
            } else {
                if !is_base64_char(byte) {
                    return Err(Error::MalformedInput {
                        offset,
                        message: "invalid base64 character",
                    });
                }
                if self.carry[..self.carry_len].contains(&b'=') {
                    return Err(Error::MalformedInput {
                        offset,
                        message: "misplaced base64 padding",
                    });
                }
            }

            self.carry[self.carry_len] = byte;
            self.carry_len += 1;

            if self.carry_len == 4 {
                self.flush_group(offset)?;
            }
        }

        self.consumed += data.len() as u64;
        Ok(())
    }

    fn flush_group(&mut self, offset: u64) -> crate::Result<()> {
        let mut decoded = [0u8; 3];
        let len = STANDARD
            .decode_slice(&self.carry, &mut decoded)
            .map_err(|_| Error::MalformedInput {
                offset,
                message: "invalid base64 group",
            })?;

        if self.carry.contains(&b'=') {
            self.seen_padding = true;
        }
        self.carry_len = 0;

        self.sink.write(&decoded[..len])
    }
}

/// A streaming Quoted-Printable decoder wrapping a byte [`Sink`].
///
/// Literal bytes are forwarded verbatim, `=XX` escapes decode to one byte
/// and soft line breaks (`=\r\n` or `=\n`) are dropped. A chunk ending in
/// `=`, `=X` or `=\r` carries those bytes to the next `write`.
pub struct QuotedPrintableDecoder<S> {
    sink: S,
    carry: [u8; 3],
    carry_len: usize,
    consumed: u64,
    failed: Option<Error>,
    finalized: bool,
}

impl<S: Sink> QuotedPrintableDecoder<S> {
    pub fn new(sink: S) -> QuotedPrintableDecoder<S> {
        QuotedPrintableDecoder {
            sink,
            carry: [0; 3],
            carry_len: 0,
            consumed: 0,
            failed: None,
            finalized: false,
        }
    }

    pub fn write(&mut self, data: &[u8]) -> crate::Result<usize> {
        self.check_reusable()?;

        match self.write_inner(data) {
            Ok(()) => Ok(data.len()),
            Err(err) => {
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Finalizes the decoder; a pending `=` or `=X` escape that never
    /// completed is reported as truncation.
    pub fn finalize(&mut self) -> crate::Result<()> {
        self.check_reusable()?;
        self.finalized = true;

        if self.carry_len > 0 {
            let err = Error::TruncatedInput {
                offset: self.consumed - self.carry_len as u64,
                message: "quoted-printable input ended mid-escape",
            };
            self.failed = Some(err.clone());
            return Err(err);
        }

        self.sink.finalize()
    }

    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    fn check_reusable(&self) -> crate::Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.finalized {
            return Err(Error::MalformedInput {
                offset: self.consumed,
                message: "decoder used after finalize",
            });
        }
        Ok(())
    }

    fn write_inner(&mut self, data: &[u8]) -> crate::Result<()> {
        let carry_start = self.consumed - self.carry_len as u64;
        let mut pos = 0;

        // Feed bytes into the pending escape until it resolves or the chunk
        // runs out.
        while self.carry_len > 0 && pos < data.len() {
            self.carry[self.carry_len] = data[pos];
            self.carry_len += 1;
            pos += 1;
            self.resolve_carry(carry_start)?;
        }

        let mut start = pos;
        while pos < data.len() {
            let eq = match memchr(b'=', &data[pos..]) {
                Some(rel) => pos + rel,
                None => break,
            };

            if eq > start {
                self.sink.write(&data[start..eq])?;
            }

            let available = data.len() - eq;
            if available == 1 {
                self.carry[0] = b'=';
                self.carry_len = 1;
                start = data.len();
                pos = data.len();
                break;
            }

            let offset = self.consumed + eq as u64;
            match data[eq + 1] {
                b'\n' => pos = eq + 2, // soft break, LF form
                b'\r' => {
                    if available == 2 {
                        self.carry = [b'=', b'\r', 0];
                        self.carry_len = 2;
                        start = data.len();
                        pos = data.len();
                        break;
                    }
                    if data[eq + 2] != b'\n' {
                        return Err(Error::MalformedInput {
                            offset,
                            message: "invalid quoted-printable escape",
                        });
                    }
                    pos = eq + 3; // soft break, CRLF form
                }
                first => {
                    let hi = hex_value(first).ok_or(Error::MalformedInput {
                        offset,
                        message: "invalid quoted-printable escape",
                    })?;
                    if available == 2 {
                        self.carry = [b'=', first, 0];
                        self.carry_len = 2;
                        start = data.len();
                        pos = data.len();
                        break;
                    }
                    let lo = hex_value(data[eq + 2]).ok_or(Error::MalformedInput {
                        offset,
                        message: "invalid quoted-printable escape",
                    })?;
                    self.sink.write(&[(hi << 4) | lo])?;
                    pos = eq + 3;
                }
            }
            start = pos;
        }

        if start < data.len() {
            self.sink.write(&data[start..])?;
        }

        self.consumed += data.len() as u64;
        Ok(())
    }

    // Called each time one byte is appended to a carried escape; the carry
    // always starts with '='.
    fn resolve_carry(&mut self, carry_start: u64) -> crate::Result<()> {
        let err = Error::MalformedInput {
            offset: carry_start,
            message: "invalid quoted-printable escape",
        };

        match self.carry_len {
            2 => match self.carry[1] {
                b'\n' => {
                    self.carry_len = 0; // soft break
                    Ok(())
                }
                b'\r' => Ok(()),
                second if hex_value(second).is_some() => Ok(()),
                _ => Err(err),
            },
            3 => {
                if self.carry[1] == b'\r' {
                    if self.carry[2] != b'\n' {
                        return Err(err);
                    }
                    self.carry_len = 0; // soft break
                    return Ok(());
                }
                let hi = hex_value(self.carry[1]).ok_or_else(|| err.clone())?;
                let lo = hex_value(self.carry[2]).ok_or(err)?;
                self.carry_len = 0;
                self.sink.write(&[(hi << 4) | lo])
            }
            _ => Ok(()),
        }
    }
}
