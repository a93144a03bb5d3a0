//! HTTP/1.0 request handling for the forward proxy.
//!
//! Covers the subset the proxy speaks: reading a request head off the
//! client socket, parsing the `GET <absolute-URI> HTTP/<v>` request line,
//! splitting the URI into host, port, and path, and rewriting the request
//! for the origin server. The rewrite emits each standard header exactly
//! once, keeps the client-provided value only for `Host:`, and passes every
//! other client header through verbatim.

use std::io::{self, BufRead};

use crate::error::HttpError;

/// Upper bound on a request head (request line plus headers).
pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Header slots handed to the parser.
const MAX_HEADERS: usize = 64;

const USER_AGENT_HDR: &str =
    "User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3\r\n";
const ACCEPT_HDR: &str =
    "Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n";
const ACCEPT_ENCODING_HDR: &str = "Accept-Encoding: gzip, deflate\r\n";
const CONNECTION_HDR: &str = "Connection: close\r\n";
const PROXY_CONNECTION_HDR: &str = "Proxy-Connection: close\r\n";

/// Headers the proxy standardizes; client copies are dropped in the rewrite.
const STANDARD_HEADERS: [&str; 6] = [
    "Host",
    "User-Agent",
    "Accept",
    "Accept-Encoding",
    "Connection",
    "Proxy-Connection",
];

/// A parsed client request: method, the request-URI exactly as received
/// (the cache key), and the client's headers in order.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl Request {
    /// Returns the first header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// Where a request-URI points: origin host, port, and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Reads bytes from `reader` up to and including the blank line that ends a
/// request head. Stops early at EOF or once [`MAX_HEAD_BYTES`] arrive; the
/// parser rejects whatever truncated head results.
pub fn read_request_head<R: BufRead>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut head = Vec::new();
    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        let mut consumed = chunk.len();
        head.extend_from_slice(chunk);

        if let Some(end) = find_terminator(&head) {
            let spill = head.len() - end;
            consumed -= spill;
            head.truncate(end);
            reader.consume(consumed);
            break;
        }
        reader.consume(consumed);
        if head.len() >= MAX_HEAD_BYTES {
            break;
        }
    }
    Ok(head)
}

/// Offset one past the `\r\n\r\n` head terminator, if present.
fn find_terminator(head: &[u8]) -> Option<usize> {
    head.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Parses a request head into method, request-URI, and headers.
pub fn parse_request(head: &[u8]) -> Result<Request, HttpError> {
    let mut header_slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_slots);

    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) | Err(_) => {
            return Err(HttpError::BadRequest("malformed request head".into()));
        }
    }
    let method = parsed
        .method
        .ok_or_else(|| HttpError::BadRequest("missing method".into()))?
        .to_string();
    let uri = parsed
        .path
        .ok_or_else(|| HttpError::BadRequest("missing request-URI".into()))?
        .to_string();
    let headers = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_vec()))
        .collect();

    Ok(Request {
        method,
        uri,
        headers,
    })
}

/// Splits an absolute `http://host[:port]/path` URI into its target.
///
/// The host runs to the first of space, `:`, `/`, CR, LF, or NUL. A `:`
/// before the path introduces a decimal port (default 80); a `:` inside the
/// path is part of the path. A missing path becomes `/`.
pub fn parse_url(uri: &str) -> Result<Target, HttpError> {
    let bad = || HttpError::BadRequest(uri.to_string());

    if uri.len() < 7 || !uri[..7].eq_ignore_ascii_case("http://") {
        return Err(bad());
    }
    let rest = &uri[7..];

    let host_end = rest
        .find([' ', ':', '/', '\r', '\n', '\0'])
        .unwrap_or(rest.len());
    let host = &rest[..host_end];
    if host.is_empty() {
        return Err(bad());
    }

    let mut port = 80u16;
    let mut path_from = host_end;
    if rest[host_end..].starts_with(':') {
        let after_colon = &rest[host_end + 1..];
        let digits = after_colon
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_colon.len());
        if digits == 0 {
            return Err(bad());
        }
        port = after_colon[..digits].parse().map_err(|_| bad())?;
        path_from = host_end + 1 + digits;
    }

    let path = match rest[path_from..].find('/') {
        Some(slash) => rest[path_from + slash..].to_string(),
        None => "/".to_string(),
    };

    Ok(Target {
        host: host.to_string(),
        port,
        path,
    })
}

/// Renders the rewritten request sent to the origin server.
///
/// The request line becomes `GET <path> HTTP/1.0`. Each standard header is
/// emitted exactly once, with the client's value kept only for `Host:`;
/// remaining client headers follow verbatim, then the terminating blank
/// line.
pub fn build_upstream_request(req: &Request, target: &Target) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    out.extend_from_slice(format!("GET {} HTTP/1.0\r\n", target.path).as_bytes());

    out.extend_from_slice(b"Host: ");
    match req.header("Host") {
        Some(value) => out.extend_from_slice(value),
        None => out.extend_from_slice(target.host.as_bytes()),
    }
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(USER_AGENT_HDR.as_bytes());
    out.extend_from_slice(ACCEPT_HDR.as_bytes());
    out.extend_from_slice(ACCEPT_ENCODING_HDR.as_bytes());
    out.extend_from_slice(CONNECTION_HDR.as_bytes());
    out.extend_from_slice(PROXY_CONNECTION_HDR.as_bytes());

    for (name, value) in &req.headers {
        if STANDARD_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out
}

/// Renders the complete error response for a failed request.
///
/// The body is a minimal HTML page naming the proxy; the head carries the
/// status line, `Content-type`, and `Content-length`.
pub fn error_page(err: &HttpError) -> Vec<u8> {
    let (code, short) = err.status();
    let long = match err {
        HttpError::BadRequest(_) => "Proxy could not understand the request",
        HttpError::NotImplemented(_) => "Proxy only implements GET requests",
    };

    let body = format!(
        "<html><title>Proxy Server Error</title><body bgcolor=\"ffffff\">\r\n\
         {code}: {short}\r\n\
         <p>{long}: {cause}\r\n\
         <hr><em>Proxykit Proxy Server</em>\r\n",
        cause = err.cause(),
    );
    let head = format!(
        "HTTP/1.0 {code} {short}\r\nContent-type: text/html\r\nContent-length: {}\r\n\r\n",
        body.len(),
    );

    let mut out = head.into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn parse(uri: &str) -> Target {
        parse_url(uri).unwrap()
    }

    // -- read_request_head ------------------------------------------------

    #[test]
    fn head_stops_at_blank_line() {
        let raw = b"GET http://a/ HTTP/1.0\r\nHost: a\r\n\r\nBODYBYTES";
        let mut reader = io::BufReader::new(&raw[..]);
        let head = read_request_head(&mut reader).unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
        assert!(!head.windows(4).any(|w| w == b"BODY"));

        // The body is still waiting on the reader.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"BODYBYTES");
    }

    #[test]
    fn head_at_eof_is_returned_as_is() {
        let raw = b"GET http://a/ HTT";
        let mut reader = io::BufReader::new(&raw[..]);
        let head = read_request_head(&mut reader).unwrap();
        assert_eq!(head, raw);
        assert!(parse_request(&head).is_err());
    }

    // -- parse_request ----------------------------------------------------

    #[test]
    fn request_line_and_headers_parse() {
        let head = b"GET http://example.com/x HTTP/1.1\r\nHost: example.com\r\nX-Custom: 1\r\n\r\n";
        let req = parse_request(head).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "http://example.com/x");
        assert_eq!(req.header("host"), Some(&b"example.com"[..]));
        assert_eq!(req.header("x-custom"), Some(&b"1"[..]));
        assert_eq!(req.header("absent"), None);
    }

    #[test]
    fn garbage_head_is_bad_request() {
        let err = parse_request(b"\x01\x02 nonsense\r\n\r\n").unwrap_err();
        assert_eq!(err.status().0, 400);
    }

    // -- parse_url --------------------------------------------------------

    #[test]
    fn plain_host_defaults_port_and_path() {
        let t = parse("http://example.com");
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 80);
        assert_eq!(t.path, "/");
    }

    #[test]
    fn explicit_port_and_path() {
        let t = parse("http://example.com:8080/cgi/env?q=1");
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 8080);
        assert_eq!(t.path, "/cgi/env?q=1");
    }

    #[test]
    fn port_without_path_defaults_path() {
        let t = parse("http://example.com:8080");
        assert_eq!(t.port, 8080);
        assert_eq!(t.path, "/");
    }

    #[test]
    fn colon_in_path_is_not_a_port() {
        let t = parse("http://example.com/when:now");
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 80);
        assert_eq!(t.path, "/when:now");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let t = parse("HTTP://EXAMPLE.com/");
        assert_eq!(t.host, "EXAMPLE.com");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(parse_url("ftp://example.com/").is_err());
        assert!(parse_url("example.com/").is_err());
        assert!(parse_url("http:/example.com").is_err());
    }

    #[test]
    fn rejects_empty_host_and_port() {
        assert!(parse_url("http:///path").is_err());
        assert!(parse_url("http://host:/path").is_err());
        assert!(parse_url("http://host:99999/path").is_err());
    }

    // -- build_upstream_request -------------------------------------------

    fn request_with(headers: &[(&str, &str)]) -> Request {
        Request {
            method: "GET".into(),
            uri: "http://example.com/x".into(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.as_bytes().to_vec()))
                .collect(),
        }
    }

    #[test]
    fn rewrite_standardizes_headers_once() {
        let req = request_with(&[
            ("Host", "example.com:8080"),
            ("Connection", "keep-alive"),
            ("Accept", "*/*"),
            ("Cookie", "k=v"),
        ]);
        let target = parse("http://example.com:8080/x");
        let out = String::from_utf8(build_upstream_request(&req, &target)).unwrap();

        assert!(out.starts_with("GET /x HTTP/1.0\r\n"));
        // Client value kept only for Host.
        assert!(out.contains("Host: example.com:8080\r\n"));
        assert_eq!(out.matches("Host: ").count(), 1);
        // Client Connection/Accept values are replaced by the fixed ones.
        assert!(out.contains("Connection: close\r\n"));
        assert!(!out.contains("keep-alive"));
        assert_eq!(out.matches("Accept: ").count(), 1);
        assert!(out.contains("Accept: text/html"));
        // Everything else passes through.
        assert!(out.contains("Cookie: k=v\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[test]
    fn rewrite_fills_missing_host() {
        let req = request_with(&[]);
        let target = parse("http://example.com/x");
        let out = String::from_utf8(build_upstream_request(&req, &target)).unwrap();
        assert!(out.contains("Host: example.com\r\n"));
        assert!(out.contains("Proxy-Connection: close\r\n"));
        assert!(out.contains("Accept-Encoding: gzip, deflate\r\n"));
        assert!(out.contains("User-Agent: Mozilla/5.0"));
    }

    #[test]
    fn accept_language_is_not_swallowed_by_accept() {
        let req = request_with(&[("Accept-Language", "en-US")]);
        let target = parse("http://example.com/");
        let out = String::from_utf8(build_upstream_request(&req, &target)).unwrap();
        assert!(out.contains("Accept-Language: en-US\r\n"));
    }

    // -- error_page -------------------------------------------------------

    #[test]
    fn error_page_is_well_formed() {
        let page = error_page(&crate::error::HttpError::NotImplemented("POST".into()));
        let text = String::from_utf8(page).unwrap();
        assert!(text.starts_with("HTTP/1.0 501 Not Implemented\r\n"));
        assert!(text.contains("Content-type: text/html\r\n"));
        let body_start = text.find("\r\n\r\n").unwrap() + 4;
        let body = &text[body_start..];
        let declared: usize = text
            .lines()
            .find(|l| l.starts_with("Content-length: "))
            .and_then(|l| l.trim_start_matches("Content-length: ").parse().ok())
            .unwrap();
        assert_eq!(declared, body.len());
        assert!(body.contains("Proxykit Proxy Server"));
    }
}
