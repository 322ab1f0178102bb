use std::error::Error as StdError;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};

use crate::error::{ErrorCode, TransferError};
use crate::http::types::{Headers, HttpMethod, Request};

const TLS_MARKERS: [&str; 4] = ["certificate", "tls", "ssl", "handshake"];

pub(super) const fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

pub(super) fn parse_url(raw: &str) -> Result<Url, TransferError> {
    let url = Url::parse(raw.trim()).map_err(|err| {
        TransferError::new(ErrorCode::InvalidUrl, format!("Invalid URL '{}': {}", raw, err))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TransferError::new(
            ErrorCode::InvalidUrl,
            format!("Unsupported URL scheme '{}'", other),
        )),
    }
}

pub(super) fn header_map(request: &Request) -> Result<HeaderMap, TransferError> {
    let mut map = HeaderMap::with_capacity(request.headers.len().saturating_add(1));
    for (name, value) in &request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            TransferError::internal(format!("Invalid header name '{}': {}", name, err))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|err| {
            TransferError::internal(format!("Invalid value for header '{}': {}", name, err))
        })?;
        map.insert(header_name, header_value);
    }
    if request.body.payload().is_some()
        && !map.contains_key(CONTENT_TYPE)
        && let Some(content_type) = request.body.default_content_type()
    {
        map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    Ok(map)
}

pub(super) fn response_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

pub(super) fn status_text(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("Unknown").to_owned()
}

pub(super) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Maps a client failure onto the transfer error taxonomy.
pub(super) fn classify(err: &reqwest::Error) -> TransferError {
    let message = describe(err);
    let code = if err.is_timeout() {
        ErrorCode::Timeout
    } else if mentions_tls(err) {
        ErrorCode::SslError
    } else if err.is_connect() {
        ErrorCode::ConnectionFailed
    } else if err.is_builder() {
        ErrorCode::InvalidUrl
    } else {
        ErrorCode::InternalError
    };
    TransferError::new(code, message)
}

fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn mentions_tls(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if TLS_MARKERS.iter().any(|marker| text.contains(marker)) {
            return true;
        }
        source = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::{Body, BodyMode};

    #[test]
    fn parse_url_rejects_garbage_and_foreign_schemes() -> Result<(), String> {
        let err = match parse_url("not a url") {
            Ok(_) => return Err("Expected invalid URL".to_owned()),
            Err(err) => err,
        };
        if err.code != ErrorCode::InvalidUrl {
            return Err(format!("Unexpected code {}", err.code));
        }
        let err = match parse_url("ftp://example.com/file") {
            Ok(_) => return Err("Expected unsupported scheme".to_owned()),
            Err(err) => err,
        };
        if err.code != ErrorCode::InvalidUrl {
            return Err(format!("Unexpected code {}", err.code));
        }
        parse_url("https://example.com/path?q=1")
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    #[test]
    fn header_map_adds_content_type_for_json_body() -> Result<(), String> {
        let request = Request::get("http://localhost/")
            .with_header("X-Trace", "abc")
            .with_body(Body::new(BodyMode::Json, "{\"a\":1}"));
        let map = header_map(&request).map_err(|err| err.to_string())?;
        if map.get(CONTENT_TYPE).map(HeaderValue::as_bytes) != Some(b"application/json".as_slice())
        {
            return Err("Missing default content type".to_owned());
        }
        if map.get("x-trace").is_none() {
            return Err("Missing custom header".to_owned());
        }
        Ok(())
    }

    #[test]
    fn header_map_keeps_explicit_content_type() -> Result<(), String> {
        let request = Request::get("http://localhost/")
            .with_header("Content-Type", "application/vnd.api+json")
            .with_body(Body::new(BodyMode::Json, "{}"));
        let map = header_map(&request).map_err(|err| err.to_string())?;
        if map.get(CONTENT_TYPE).map(HeaderValue::as_bytes)
            != Some(b"application/vnd.api+json".as_slice())
        {
            return Err("Explicit content type was replaced".to_owned());
        }
        Ok(())
    }

    #[test]
    fn header_map_rejects_invalid_names() -> Result<(), String> {
        let request = Request::get("http://localhost/").with_header("bad header", "x");
        match header_map(&request) {
            Ok(_) => Err("Expected invalid header name".to_owned()),
            Err(err) if err.code == ErrorCode::InternalError => Ok(()),
            Err(err) => Err(format!("Unexpected code {}", err.code)),
        }
    }
}
