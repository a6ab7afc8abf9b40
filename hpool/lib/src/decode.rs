//! Content-type driven decoding of response bodies.
//!
//! Decoding never fails: bodies that do not match their declared type fall
//! back to text, and bytes that are not UTF-8 fall back to binary.

use std::ffi::OsStr;
use std::path::Path;

use bytes::Bytes;
use serde_json::Value;

use crate::message::ResponseEnvelope;

/// File name used for binary payloads without a better name.
pub const GENERIC_FILENAME: &str = "response";

/// A response body interpreted by its content type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    /// Raw bytes with a suggested file name.
    Binary { bytes: Bytes, filename: String },
    /// Parsed JSON with its pretty-printed text.
    Json { text: String, value: Value },
    Html { text: String },
    Text { text: String },
}

impl DecodedResponse {
    /// Text of textual payloads, `None` for binary ones.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Json { text, .. } | Self::Html { text } | Self::Text { text } => Some(text),
            Self::Binary { .. } => None,
        }
    }

    fn json(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        Self::Json { text, value }
    }

    fn binary(bytes: &Bytes, filename: String) -> Self {
        Self::Binary {
            bytes: bytes.clone(),
            filename,
        }
    }
}

/// Decodes the body of `envelope`.
///
/// ## Examples
///
/// ```rust
/// use hpool_lib::{DecodedResponse, ResponseEnvelope, decode};
/// use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
///
/// let mut headers = HeaderMap::new();
/// headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
/// let envelope = ResponseEnvelope::new(200, headers, r#"{"a":1}"#);
///
/// match decode(&envelope) {
///     DecodedResponse::Json { text, .. } => assert_eq!(text, "{\n  \"a\": 1\n}"),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn decode(envelope: &ResponseEnvelope) -> DecodedResponse {
    match envelope
        .content_type()
        .map(str::trim)
        .filter(|content_type| !content_type.is_empty())
    {
        Some(content_type) => decode_declared(envelope, &content_type.to_ascii_lowercase()),
        None => sniff(&envelope.body),
    }
}

fn decode_declared(envelope: &ResponseEnvelope, content_type: &str) -> DecodedResponse {
    let body = &envelope.body;
    if is_binary(content_type) {
        return DecodedResponse::binary(body, binary_filename(envelope, content_type));
    }
    if content_type.contains("application/json") {
        return match serde_json::from_slice::<Value>(body) {
            Ok(value) => DecodedResponse::json(value),
            Err(_) => DecodedResponse::Text {
                text: envelope.text_lossy(),
            },
        };
    }
    if content_type.contains("text/html") {
        return DecodedResponse::Html {
            text: envelope.text_lossy(),
        };
    }
    if content_type.contains("text/") {
        return DecodedResponse::Text {
            text: envelope.text_lossy(),
        };
    }
    match std::str::from_utf8(body) {
        Ok(text) => DecodedResponse::Text {
            text: text.to_string(),
        },
        Err(_) => DecodedResponse::binary(body, GENERIC_FILENAME.to_string()),
    }
}

fn sniff(body: &Bytes) -> DecodedResponse {
    let Ok(text) = std::str::from_utf8(body) else {
        return DecodedResponse::binary(body, GENERIC_FILENAME.to_string());
    };
    match serde_json::from_str::<Value>(text) {
        Ok(value) => DecodedResponse::json(value),
        Err(_) => DecodedResponse::Text {
            text: text.to_string(),
        },
    }
}

fn is_binary(content_type: &str) -> bool {
    ["application/octet-stream", "image/", "audio/", "video/"]
        .iter()
        .any(|family| content_type.contains(family))
}

fn binary_filename(envelope: &ResponseEnvelope, content_type: &str) -> String {
    if let Some(name) = envelope
        .header("content-disposition")
        .and_then(disposition_filename)
    {
        return name;
    }
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    format!("{GENERIC_FILENAME}{}", extension_for(mime).unwrap_or_default())
}

/// Extracts the `filename=` token of a `Content-Disposition` value.
///
/// Only bare file names are accepted: names with path separators, `.`, `..`
/// or control characters yield `None`.
fn disposition_filename(disposition: &str) -> Option<String> {
    let (_, rest) = disposition.split_once("filename=")?;
    let name = rest
        .split(';')
        .next()?
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    is_bare_filename(name).then(|| name.to_string())
}

fn is_bare_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
        && Path::new(name).file_name() == Some(OsStr::new(name))
}

/// File extension, with its dot, for a binary mime type.
pub fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "application/octet-stream" => Some(".bin"),
        "image/png" => Some(".png"),
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/svg+xml" => Some(".svg"),
        "image/bmp" => Some(".bmp"),
        "image/tiff" => Some(".tiff"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some(".ico"),
        "audio/mpeg" => Some(".mp3"),
        "audio/flac" | "audio/x-flac" => Some(".flac"),
        "audio/ogg" => Some(".ogg"),
        "audio/wav" | "audio/x-wav" => Some(".wav"),
        "audio/aac" => Some(".aac"),
        "audio/webm" => Some(".weba"),
        "video/mp4" => Some(".mp4"),
        "video/webm" => Some(".webm"),
        "video/mpeg" => Some(".mpeg"),
        "video/quicktime" => Some(".mov"),
        "video/x-msvideo" => Some(".avi"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn envelope(content_type: Option<&'static str>, body: &'static [u8]) -> ResponseEnvelope {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert("content-type", HeaderValue::from_static(content_type));
        }
        ResponseEnvelope::new(200, headers, Bytes::from_static(body))
    }

    #[test]
    fn test_json_is_pretty_printed() {
        let decoded = decode(&envelope(Some("application/json; charset=utf-8"), br#"{"a":[1,2]}"#));
        let DecodedResponse::Json { text, value } = decoded else {
            panic!("expected json");
        };
        assert_eq!(text, "{\n  \"a\": [\n    1,\n    2\n  ]\n}");
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn test_malformed_json_falls_back_to_text() {
        let decoded = decode(&envelope(Some("Application/JSON"), b"{not json"));
        assert_eq!(
            decoded,
            DecodedResponse::Text {
                text: "{not json".to_string()
            }
        );
    }

    #[test]
    fn test_html_and_text() {
        assert_eq!(
            decode(&envelope(Some("text/html"), b"<p>hi</p>")),
            DecodedResponse::Html {
                text: "<p>hi</p>".to_string()
            }
        );
        assert_eq!(
            decode(&envelope(Some("text/plain"), b"hi \xff")),
            DecodedResponse::Text {
                text: "hi \u{fffd}".to_string()
            }
        );
    }

    #[test]
    fn test_binary_names() {
        let decoded = decode(&envelope(Some("image/png"), b"\x89PNG"));
        assert!(matches!(decoded, DecodedResponse::Binary { ref filename, .. } if filename == "response.png"));

        let decoded = decode(&envelope(Some("video/x-unknown"), b"\x00"));
        assert!(matches!(decoded, DecodedResponse::Binary { ref filename, .. } if filename == "response"));

        let mut with_name = envelope(Some("application/octet-stream"), b"\x00\x01");
        with_name.headers.insert(
            "content-disposition",
            HeaderValue::from_static("attachment; filename=\"report.pdf\"; size=2"),
        );
        let DecodedResponse::Binary { bytes, filename } = decode(&with_name) else {
            panic!("expected binary");
        };
        assert_eq!(filename, "report.pdf");
        assert_eq!(&bytes[..], b"\x00\x01");
    }

    #[test]
    fn test_other_content_types_use_strict_utf8() {
        assert_eq!(
            decode(&envelope(Some("application/xml"), b"<a/>")),
            DecodedResponse::Text {
                text: "<a/>".to_string()
            }
        );
        assert!(matches!(
            decode(&envelope(Some("application/x-custom"), b"\xff\xfe")),
            DecodedResponse::Binary { ref filename, .. } if filename == GENERIC_FILENAME
        ));
    }

    #[test]
    fn test_absent_content_type_is_sniffed() {
        assert!(matches!(
            decode(&envelope(None, br#"[1]"#)),
            DecodedResponse::Json { .. }
        ));
        assert_eq!(
            decode(&envelope(None, b"plain")),
            DecodedResponse::Text {
                text: "plain".to_string()
            }
        );
        assert!(matches!(
            decode(&envelope(None, b"\xff")),
            DecodedResponse::Binary { .. }
        ));
    }

    #[test]
    fn test_disposition_filename_parsing() {
        assert_eq!(disposition_filename("inline; filename=a.txt").as_deref(), Some("a.txt"));
        assert_eq!(disposition_filename("attachment; filename=''"), None);
        assert_eq!(disposition_filename("attachment"), None);
    }

    #[test]
    fn test_disposition_filename_rejects_paths() {
        for disposition in [
            "attachment; filename=\"../escaped.png\"",
            "attachment; filename=/etc/passwd",
            "attachment; filename=\"..\\win.ini\"",
            "attachment; filename=..",
            "attachment; filename=\"a\nb\"",
        ] {
            assert_eq!(disposition_filename(disposition), None, "{disposition}");
        }

        let mut escaping = envelope(Some("image/png"), b"\x89PNG");
        escaping.headers.insert(
            "content-disposition",
            HeaderValue::from_static("attachment; filename=\"../escaped.png\""),
        );
        assert!(matches!(
            decode(&escaping),
            DecodedResponse::Binary { ref filename, .. } if filename == "response.png"
        ));
    }
}
