//! S3 error model, following the shape of the service's XML error replies.

use mpfu_core::{UploadError, UploadErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Error {
    /// Service error code (`NoSuchBucket`, `AccessDenied`, ...). `Transport`
    /// for failures below HTTP.
    pub code: String,
    pub message: String,
    /// HTTP status, 0 when no response arrived.
    pub status_code: u16,
    pub request_id: Option<String>,
    pub retryable: bool,
    /// Transport failure before any response (DNS, refused, TLS).
    #[serde(default)]
    pub connect: bool,
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3 error [{}]: {}", self.code, self.message)?;
        if self.status_code != 0 {
            write!(f, " (HTTP {})", self.status_code)?;
        }
        if let Some(ref id) = self.request_id {
            write!(f, " [RequestId: {}]", id)?;
        }
        Ok(())
    }
}

impl std::error::Error for S3Error {}

impl S3Error {
    pub fn new(code: &str, message: &str, status_code: u16) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            status_code,
            request_id: None,
            retryable: Self::is_retryable_code(code, status_code),
            connect: false,
        }
    }

    /// Parse an S3 XML error body:
    ///
    /// ```xml
    /// <Error><Code>NoSuchBucket</Code><Message>...</Message><RequestId>...</RequestId></Error>
    /// ```
    ///
    /// Bodiless replies (HEAD, some 403s) fall back to a code derived from
    /// the status.
    pub fn parse_xml_error(status_code: u16, body: &str) -> Self {
        let code = xml_text(body, "Code").unwrap_or_else(|| {
            match status_code {
                301 => "PermanentRedirect",
                403 => "AccessDenied",
                404 => "NotFound",
                _ => "UnknownError",
            }
            .to_string()
        });
        let message =
            xml_text(body, "Message").unwrap_or_else(|| format!("HTTP {} from object storage", status_code));
        let mut err = Self::new(&code, &message, status_code);
        err.request_id = xml_text(body, "RequestId");
        err
    }

    /// Map a failure on an endpoint the bucket check already reached. A
    /// transport error here broke the upload, not the connection setup.
    pub fn into_transfer_failure(mut self) -> UploadError {
        self.connect = false;
        self.into()
    }

    fn is_retryable_code(code: &str, status_code: u16) -> bool {
        if matches!(status_code, 429 | 500 | 502 | 503 | 504) {
            return true;
        }
        matches!(
            code,
            "SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout" | "Throttling"
        )
    }
}

impl From<reqwest::Error> for S3Error {
    fn from(e: reqwest::Error) -> Self {
        let connect = e.is_connect() || e.is_timeout();
        Self {
            code: "Transport".to_string(),
            message: e.to_string(),
            status_code: e.status().map(|s| s.as_u16()).unwrap_or(0),
            request_id: None,
            retryable: connect || e.is_request(),
            connect,
        }
    }
}

impl From<S3Error> for UploadError {
    fn from(e: S3Error) -> Self {
        let kind = if e.connect {
            UploadErrorKind::Connect
        } else {
            match e.code.as_str() {
                "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken" => {
                    UploadErrorKind::Authentication
                }
                "Transport" => UploadErrorKind::Transfer,
                _ if e.status_code >= 500 => UploadErrorKind::Transfer,
                _ => UploadErrorKind::Protocol,
            }
        };
        UploadError::new(kind, e.to_string())
    }
}

/// Text content of the first `<tag>` element.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}
