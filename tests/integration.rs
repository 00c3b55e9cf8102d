use std::cell::RefCell;

use formpipe::{Callbacks, Constraints, ErrorKind, Event, MultipartParser, Payload, QuerystringParser};

#[derive(Debug, Clone, PartialEq)]
enum Ev {
    PartStart,
    Header(String, String),
    HeadersEnd,
    Data(Vec<u8>),
    PartEnd,
    BodyEnd,
}

// Adjacent data events merged, so differently-chunked runs compare equal.
fn normalize(events: Vec<Ev>) -> Vec<Ev> {
    let mut merged: Vec<Ev> = Vec::new();
    for event in events {
        match (merged.last_mut(), event) {
            (Some(Ev::Data(tail)), Ev::Data(data)) => tail.extend_from_slice(&data),
            (_, event) => merged.push(event),
        }
    }
    merged
}

fn parse_multipart(
    body: &[u8],
    boundary: &str,
    chunk_size: usize,
    constraints: Constraints,
) -> formpipe::Result<Vec<Ev>> {
    let events = RefCell::new(Vec::new());

    {
        let mut callbacks = Callbacks::new();
        callbacks
            .set(Event::PartStart, |_| {
                events.borrow_mut().push(Ev::PartStart);
                Ok(())
            })
            .set(Event::PartHeader, |payload| {
                if let Payload::Header(name, value) = payload {
                    events
                        .borrow_mut()
                        .push(Ev::Header(name.to_string(), value.to_str().unwrap().to_owned()));
                }
                Ok(())
            })
            .set(Event::PartHeadersEnd, |_| {
                events.borrow_mut().push(Ev::HeadersEnd);
                Ok(())
            })
            .set(Event::PartData, |payload| {
                events.borrow_mut().push(Ev::Data(payload.data().unwrap().to_vec()));
                Ok(())
            })
            .set(Event::PartEnd, |_| {
                events.borrow_mut().push(Ev::PartEnd);
                Ok(())
            })
            .set(Event::BodyEnd, |_| {
                events.borrow_mut().push(Ev::BodyEnd);
                Ok(())
            });

        let mut parser = MultipartParser::new(boundary, constraints, callbacks)?;
        for chunk in body.chunks(chunk_size.max(1)) {
            parser.write(chunk)?;
        }
        parser.finalize()?;
    }

    Ok(normalize(events.into_inner()))
}

// Encodes parts as a multipart body; the inverse of what the parser emits.
fn encode_multipart(boundary: &str, parts: &[(&[(&str, &str)], &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (headers, data) in parts {
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"\r\n");
        for (name, value) in *headers {
            body.extend_from_slice(name.as_bytes());
            body.extend_from_slice(b": ");
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--\r\n");
    body
}

const SAMPLE_BODY: &[u8] = b"--X-BOUNDARY\r\n\
Content-Disposition: form-data; name=\"My Field\"\r\n\
\r\n\
abcd\r\n\
--X-BOUNDARY\r\n\
Content-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
Hello world\nHello\r\nWorld\rAgain\r\n\
--X-BOUNDARY--\r\n";

#[test]
fn test_multipart_basic() {
    let events = parse_multipart(SAMPLE_BODY, "X-BOUNDARY", SAMPLE_BODY.len(), Constraints::new()).unwrap();

    assert_eq!(
        events,
        vec![
            Ev::PartStart,
            Ev::Header(
                "content-disposition".to_owned(),
                r#"form-data; name="My Field""#.to_owned()
            ),
            Ev::HeadersEnd,
            Ev::Data(b"abcd".to_vec()),
            Ev::PartEnd,
            Ev::PartStart,
            Ev::Header(
                "content-disposition".to_owned(),
                r#"form-data; name="File Field"; filename="a-text-file.txt""#.to_owned()
            ),
            Ev::Header("content-type".to_owned(), "text/plain".to_owned()),
            Ev::HeadersEnd,
            Ev::Data(b"Hello world\nHello\r\nWorld\rAgain".to_vec()),
            Ev::PartEnd,
            Ev::BodyEnd,
        ]
    );
}

#[test]
fn test_multipart_chunking_invariance() {
    let whole = parse_multipart(SAMPLE_BODY, "X-BOUNDARY", SAMPLE_BODY.len(), Constraints::new()).unwrap();

    // Byte-at-a-time splits every delimiter across writes at every offset.
    for chunk_size in 1..=16 {
        let chunked = parse_multipart(SAMPLE_BODY, "X-BOUNDARY", chunk_size, Constraints::new()).unwrap();
        assert_eq!(chunked, whole, "chunk size {}", chunk_size);
    }
}

#[test]
fn test_multipart_delimiter_split_at_every_offset() {
    // Two-write splits walking through the interior delimiter one byte at a
    // time, including the CRLF prefix and the boundary tail.
    let delimiter_at = SAMPLE_BODY
        .windows(b"\r\n--X-BOUNDARY".len())
        .position(|w| w == b"\r\n--X-BOUNDARY")
        .unwrap();
    let whole = parse_multipart(SAMPLE_BODY, "X-BOUNDARY", SAMPLE_BODY.len(), Constraints::new()).unwrap();

    for split in delimiter_at..=delimiter_at + b"\r\n--X-BOUNDARY".len() {
        let events = RefCell::new(Vec::new());
        {
            let mut callbacks = Callbacks::new();
            callbacks.set(Event::PartData, |payload| {
                events.borrow_mut().push(Ev::Data(payload.data().unwrap().to_vec()));
                Ok(())
            });
            let mut parser = MultipartParser::new("X-BOUNDARY", Constraints::new(), callbacks).unwrap();
            parser.write(&SAMPLE_BODY[..split]).unwrap();
            parser.write(&SAMPLE_BODY[split..]).unwrap();
            parser.finalize().unwrap();
        }

        let data: Vec<Ev> = normalize(events.into_inner());
        let expected: Vec<Ev> = whole
            .iter()
            .filter(|ev| matches!(ev, Ev::Data(_)))
            .cloned()
            .collect();
        assert_eq!(data, expected, "split at {}", split);
    }
}

#[test]
fn test_multipart_round_trip() {
    let parts: &[(&[(&str, &str)], &[u8])] = &[
        (
            &[("content-disposition", r#"form-data; name="alpha""#)],
            b"first part body",
        ),
        (
            &[
                ("content-disposition", r#"form-data; name="blob"; filename="b.bin""#),
                ("content-type", "application/octet-stream"),
            ],
            b"\x00\x01binary -- almost a boundary\r\n--nope\x02",
        ),
    ];
    let body = encode_multipart("rt-boundary-7", parts);

    for chunk_size in [1, 3, body.len()] {
        let events = parse_multipart(&body, "rt-boundary-7", chunk_size, Constraints::new()).unwrap();

        let mut part_idx = 0;
        let mut headers = Vec::new();
        let mut data: Vec<u8> = Vec::new();
        for event in events {
            match event {
                Ev::Header(name, value) => headers.push((name, value)),
                Ev::Data(bytes) => data.extend_from_slice(&bytes),
                Ev::PartEnd => {
                    let (expected_headers, expected_data) = parts[part_idx];
                    let expected_headers: Vec<(String, String)> = expected_headers
                        .iter()
                        .map(|(n, v)| (n.to_string(), v.to_string()))
                        .collect();
                    assert_eq!(headers, expected_headers);
                    assert_eq!(data, expected_data);
                    headers = Vec::new();
                    data = Vec::new();
                    part_idx += 1;
                }
                _ => {}
            }
        }
        assert_eq!(part_idx, parts.len());
    }
}

#[test]
fn test_boundary_prefix_in_data_is_emitted() {
    // Part data ends with a proper prefix of the delimiter; it must come out
    // as data, not vanish into the lookbehind buffer.
    let parts: &[(&[(&str, &str)], &[u8])] = &[(
        &[("content-disposition", r#"form-data; name="d""#)],
        b"tail looks like \r\n--MARq but is not",
    )];
    let body = encode_multipart("MARK", parts);

    for chunk_size in 1..=8 {
        let events = parse_multipart(&body, "MARK", chunk_size, Constraints::new()).unwrap();
        assert!(events.contains(&Ev::Data(b"tail looks like \r\n--MARq but is not".to_vec())));
    }
}

#[test]
fn test_preamble_and_epilogue_are_discarded() {
    let mut body = b"This preamble is ignored.\r\n".to_vec();
    body.extend_from_slice(&encode_multipart(
        "MARK",
        &[(&[("content-disposition", r#"form-data; name="x""#)], b"data")],
    ));
    body.extend_from_slice(b"trailing epilogue noise");

    for chunk_size in [1, 5, body.len()] {
        let events = parse_multipart(&body, "MARK", chunk_size, Constraints::new()).unwrap();
        assert_eq!(
            events,
            vec![
                Ev::PartStart,
                Ev::Header("content-disposition".to_owned(), r#"form-data; name="x""#.to_owned()),
                Ev::HeadersEnd,
                Ev::Data(b"data".to_vec()),
                Ev::PartEnd,
                Ev::BodyEnd,
            ]
        );
    }
}

#[test]
fn test_empty_body_with_terminal_delimiter_only() {
    let events = parse_multipart(b"--MARK--\r\n", "MARK", 1, Constraints::new()).unwrap();
    assert_eq!(events, vec![Ev::BodyEnd]);
}

#[test]
fn test_max_headers_per_part() {
    let body = encode_multipart(
        "MARK",
        &[(
            &[("h-one", "1"), ("h-two", "2"), ("h-three", "3")],
            b"data",
        )],
    );

    let err = parse_multipart(&body, "MARK", body.len(), Constraints::new().max_headers_per_part(2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    assert!(parse_multipart(&body, "MARK", body.len(), Constraints::new().max_headers_per_part(3)).is_ok());
}

#[test]
fn test_max_header_length() {
    let long_value = "v".repeat(64);
    let headers: &[(&str, &str)] = &[("long-header", &long_value)];
    let body = encode_multipart("MARK", &[(headers, b"data")]);

    let err = parse_multipart(&body, "MARK", body.len(), Constraints::new().max_header_length(32)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
}

#[test]
fn test_finalize_mid_delimiter_is_truncated_input() {
    let mut callbacks = Callbacks::new();
    callbacks.set(Event::PartData, |_| Ok(()));
    let mut parser = MultipartParser::new("MARK", Constraints::new(), callbacks).unwrap();

    parser.write(b"--MARK\r\nh: v\r\n\r\nbody\r\n--MA").unwrap();
    let err = parser.finalize().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TruncatedInput);
}

#[test]
fn test_transport_padding_after_boundary() {
    let body = b"--MARK  \t\r\nh: v\r\n\r\ndata\r\n--MARK--\r\n";

    let events = parse_multipart(body, "MARK", body.len(), Constraints::new()).unwrap();
    assert!(events.contains(&Ev::Data(b"data".to_vec())));

    let err = parse_multipart(body, "MARK", body.len(), Constraints::new().strict(true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn test_malformed_header_line() {
    let body = b"--MARK\r\nnot a header line\r\ngood: yes\r\n\r\ndata\r\n--MARK--\r\n";

    // Lenient: the unparseable line is skipped, the good one survives.
    let events = parse_multipart(body, "MARK", body.len(), Constraints::new()).unwrap();
    assert!(events.contains(&Ev::Header("good".to_owned(), "yes".to_owned())));

    let err = parse_multipart(body, "MARK", body.len(), Constraints::new().strict(true)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn test_handler_error_aborts_write() {
    let mut callbacks = Callbacks::new();
    callbacks.set(Event::PartStart, |_| {
        Err(formpipe::Error::MalformedInput {
            offset: 0,
            message: "part rejected by handler",
        })
    });
    let mut parser = MultipartParser::new("MARK", Constraints::new(), callbacks).unwrap();

    assert!(parser.write(b"--MARK\r\nh: v\r\n\r\ndata\r\n--MARK--\r\n").is_err());
    // The failure is sticky.
    assert!(parser.write(b"more").is_err());
}

#[test]
fn test_querystring_chunking_invariance() {
    let input = b"a=1&b=2&c=3";
    let fields = RefCell::new(Vec::new());

    let run = |chunk_size: usize| -> Vec<(Vec<u8>, Vec<u8>)> {
        fields.borrow_mut().clear();
        {
            let mut callbacks = Callbacks::new();
            callbacks
                .set(Event::FieldStart, |payload| {
                    fields
                        .borrow_mut()
                        .push((payload.data().unwrap().to_vec(), Vec::new()));
                    Ok(())
                })
                .set(Event::FieldData, |payload| {
                    fields
                        .borrow_mut()
                        .last_mut()
                        .unwrap()
                        .1
                        .extend_from_slice(payload.data().unwrap());
                    Ok(())
                });

            let mut parser = QuerystringParser::new(Constraints::new(), callbacks);
            for chunk in input.chunks(chunk_size) {
                parser.write(chunk).unwrap();
            }
            parser.finalize().unwrap();
        }
        fields.borrow().clone()
    };

    let whole = run(input.len());
    assert_eq!(
        whole,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    for chunk_size in 1..input.len() {
        assert_eq!(run(chunk_size), whole, "chunk size {}", chunk_size);
    }
}
