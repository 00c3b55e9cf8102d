use percent_encoding::percent_decode;

/// Strips optional whitespace (RFC 7230 OWS) from both ends of a header
/// value.
pub(crate) fn trim_ows(mut bytes: &[u8]) -> &[u8] {
    while let Some((b' ', rest)) | Some((b'\t', rest)) = split_first(bytes) {
        bytes = rest;
    }
    while let Some((b' ', rest)) | Some((b'\t', rest)) = split_last(bytes) {
        bytes = rest;
    }
    bytes
}

fn split_first(bytes: &[u8]) -> Option<(u8, &[u8])> {
    bytes.split_first().map(|(&b, rest)| (b, rest))
}

fn split_last(bytes: &[u8]) -> Option<(u8, &[u8])> {
    bytes.split_last().map(|(&b, rest)| (b, rest))
}

/// Decodes one urlencoded segment: `+` becomes a space, then `%XX` escapes
/// are resolved. Applied once per delimiter-bounded segment, never per byte.
pub(crate) fn decode_url_segment(segment: &[u8]) -> Vec<u8> {
    let plus_decoded: Vec<u8> = segment
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&plus_decoded).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_ows() {
        assert_eq!(trim_ows(b"  text/plain\t "), b"text/plain");
        assert_eq!(trim_ows(b"no-ows"), b"no-ows");
        assert_eq!(trim_ows(b" \t "), b"");
    }

    #[test]
    fn test_decode_url_segment() {
        assert_eq!(decode_url_segment(b"a+b%21"), b"a b!".to_vec());
        assert_eq!(decode_url_segment(b"plain"), b"plain".to_vec());
        // An incomplete escape passes through untouched.
        assert_eq!(decode_url_segment(b"100%"), b"100%".to_vec());
    }
}
