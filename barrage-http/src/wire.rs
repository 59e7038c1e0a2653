use crate::{Error, HttpRequest, Result};

pub(crate) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

pub(crate) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

pub(crate) fn parse_url(raw: &str) -> Result<(url::Url, hyper::Uri)> {
    let parsed = url::Url::parse(raw).map_err(|_| Error::InvalidUrl(raw.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::UnsupportedScheme(raw.to_string()));
    }
    let uri: hyper::Uri = raw
        .parse()
        .map_err(|_| Error::InvalidUrl(raw.to_string()))?;
    Ok((parsed, uri))
}

/// Bytes an HTTP/1.1 request occupies on the wire: request line, headers, blank line, body.
///
/// `Host` and `Content-Length` are counted even when the caller did not set them, since
/// the client adds them.
pub fn estimate_request_bytes(req: &HttpRequest) -> Result<u64> {
    let (parsed, uri) = parse_url(&req.url)?;
    Ok(request_bytes(req, &parsed, &uri))
}

pub(crate) fn request_bytes(req: &HttpRequest, parsed: &url::Url, uri: &hyper::Uri) -> u64 {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    // "METHOD SP path SP HTTP/1.1 CRLF"
    let mut bytes = (req.method.as_str().len() + 1 + path.len() + 1 + "HTTP/1.1".len() + 2) as u64;

    for (k, v) in &req.headers {
        bytes = bytes.saturating_add(header_bytes(k.len(), v.len()));
    }

    if !has_header(&req.headers, "host")
        && let Some(host) = host_header_value(parsed)
    {
        bytes = bytes.saturating_add(header_bytes("host".len(), host.len()));
    }

    let body_len = req.body.len() as u64;
    if body_len != 0 && !has_header(&req.headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes("content-length".len(), v.len()));
    }

    bytes.saturating_add(2).saturating_add(body_len)
}

/// Status line and headers of a response; the reason phrase is ignored.
pub(crate) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version_len = match version {
        http::Version::HTTP_2 | http::Version::HTTP_3 => "HTTP/2".len(),
        _ => "HTTP/1.1".len(),
    };

    // "HTTP/1.1 SP 200 CRLF"
    let mut bytes = (version_len + 1 + status.as_str().len() + 2) as u64;
    for (name, value) in headers {
        bytes = bytes.saturating_add(header_bytes(name.as_str().len(), value.len()));
    }
    bytes.saturating_add(2)
}

fn header_bytes(name_len: usize, value_len: usize) -> u64 {
    // "name: value\r\n"
    (name_len + 2 + value_len + 2) as u64
}
