use http::header::{self, HeaderMap};

use crate::constants;

/// Field metadata extracted from a part's `Content-Disposition` header.
#[derive(Debug, Clone, Default)]
pub struct ContentDisposition {
    pub field_name: Option<String>,
    pub file_name: Option<String>,
}

impl ContentDisposition {
    pub(crate) fn parse(headers: &HeaderMap) -> ContentDisposition {
        let content_disposition = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|val| val.to_str().ok());

        let field_name = content_disposition
            .and_then(|val| constants::CONTENT_DISPOSITION_FIELD_NAME_RE.captures(val))
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_owned());

        let file_name = content_disposition
            .and_then(|val| constants::CONTENT_DISPOSITION_FILE_NAME_RE.captures(val))
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_owned());

        ContentDisposition { field_name, file_name }
    }

    /// A part with a `filename` parameter is treated as a file upload.
    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }
}
