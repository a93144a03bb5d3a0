//! Forward-proxy server loop and per-connection request handling.
//!
//! Accepts connections on a TCP listener and hands each one to a detached
//! handler thread. A handler parses the request, answers `GET` requests
//! from the shared cache when it can, and otherwise forwards the rewritten
//! request upstream, streaming the response back to the client while
//! capturing up to [`MAX_OBJECT_SIZE`] bytes for insertion into the cache.

use std::io::{self, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::cache::{SharedCache, MAX_OBJECT_SIZE};
use crate::error::HttpError;
use crate::proxy::http::{
    build_upstream_request, error_page, parse_request, parse_url, read_request_head,
};

/// Streaming chunk size for upstream responses.
const IO_CHUNK: usize = 8 * 1024;

/// The proxy: a listener plus the cache its handlers share.
#[derive(Debug)]
pub struct Proxy {
    listener: TcpListener,
    cache: Arc<SharedCache>,
}

impl Proxy {
    /// Binds the proxy to `addr`. Port 0 picks an ephemeral port.
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            cache: Arc::new(SharedCache::new()),
        })
    }

    /// The address the proxy is listening on.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, spawning a detached handler thread per
    /// connection. Returns only if the listener itself fails.
    pub fn run(self) -> io::Result<()> {
        ignore_sigpipe();
        info!(addr = %self.local_addr()?, "proxy listening");

        for conn in self.listener.incoming() {
            match conn {
                Ok(stream) => {
                    let cache = Arc::clone(&self.cache);
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream, &cache) {
                            debug!(%err, "connection closed with error");
                        }
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            }
        }
        Ok(())
    }
}

/// Ignores SIGPIPE so a client that hangs up mid-write surfaces as an I/O
/// error instead of killing the process.
fn ignore_sigpipe() {
    #[cfg(unix)]
    // SAFETY: SIG_IGN installs the kernel's ignore disposition; no handler
    // code runs, so there are no signal-safety obligations.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Serves one client connection.
pub(crate) fn handle_connection(client: TcpStream, cache: &SharedCache) -> io::Result<()> {
    let mut reader = BufReader::new(client.try_clone()?);
    let mut writer = client;

    let head = read_request_head(&mut reader)?;
    if head.is_empty() {
        return Ok(());
    }
    let request = match parse_request(&head) {
        Ok(request) => request,
        Err(err) => return send_error(&mut writer, &err),
    };

    if !request.method.eq_ignore_ascii_case("GET") {
        debug!(method = %request.method, "rejecting non-GET request");
        return send_error(&mut writer, &HttpError::NotImplemented(request.method));
    }

    // The cache key is the request-URI exactly as the client sent it.
    let url = request.uri.clone();
    let target = match parse_url(&request.uri) {
        Ok(target) => target,
        Err(err) => return send_error(&mut writer, &err),
    };

    if let Some(cached) = cache.lookup(&url) {
        debug!(%url, bytes = cached.len(), "cache hit");
        writer.write_all(&cached)?;
        return Ok(());
    }

    debug!(%url, host = %target.host, port = target.port, "cache miss, forwarding");
    let mut upstream = match TcpStream::connect((target.host.as_str(), target.port)) {
        Ok(upstream) => upstream,
        Err(err) => {
            // Connect failure is fatal to this request only; the client
            // connection is simply closed.
            debug!(%err, host = %target.host, "origin connect failed");
            return Ok(());
        }
    };
    upstream.write_all(&build_upstream_request(&request, &target))?;

    // Stream the response through while capturing it for the cache, giving
    // up on the capture once it can no longer fit.
    let mut chunk = [0u8; IO_CHUNK];
    let mut captured: Vec<u8> = Vec::new();
    let mut total = 0usize;
    loop {
        let n = upstream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        total += n;
        if total <= MAX_OBJECT_SIZE {
            captured.extend_from_slice(&chunk[..n]);
        } else if !captured.is_empty() {
            captured = Vec::new();
        }
        writer.write_all(&chunk[..n])?;
    }

    if total <= MAX_OBJECT_SIZE {
        let stored = cache.insert(&url, Arc::from(captured.into_boxed_slice()));
        debug!(%url, bytes = total, stored, "response complete");
    }
    Ok(())
}

fn send_error(writer: &mut TcpStream, err: &HttpError) -> io::Result<()> {
    writer.write_all(&error_page(err))
}
