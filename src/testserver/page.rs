//! The input-test page and the local HTTP server that hosts it.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::core::errors::{IthError, Result};

/// Title of the page; also the name of its root web area.
pub const PAGE_TITLE: &str = "E14s test page";

/// Path the page is opened at.
pub const URL_PATH: &str = "/e14s-test";

const ACCEPT_TICK: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Every field is labelled by its `aria-label`, which becomes its
/// accessible name.
pub const PAGE_HTML: &str = r##"<!DOCTYPE html>
<meta charset="utf-8">
<title>E14s test page</title>
<pre>No autocomplete, autocorrect or autocapitalize</pre>
<textarea aria-label="textArea disabled autocomplete, autocorrect, autocapitalize" autocomplete="off" autocorrect="off" autocapitalize="off" spellcheck="false" style="width: 100%"></textarea>
<pre>&lt;textarea rows="7"&gt;</pre>
<textarea rows="7" aria-label="textAreaInputField" style="width: 100%"></textarea>
<pre>&lt;input type="text"&gt;</pre>
<input type="text" aria-label="textInputField" style="width: 100%" />
<pre>&lt;input type="search"&gt;</pre>
<input type="search" aria-label="searchInputField" style="width: 100%" />
<pre>&lt;input type="password"&gt; with a readonly mirror</pre>
<input id="passwordInput" type="password" aria-label="passwordInputField" style="width: 100%"
    oninput="document.getElementById('e14s-test-password-mirror').value = this.value;" />
<input id="e14s-test-password-mirror" aria-label="passwordTextField" type="text" readonly style="width: 100%" />
<pre>&lt;input type="number"&gt;</pre>
<input type="number" id="numberInput" aria-label="numberInputField" style="width: 100%" />
<pre>&lt;input type="email"&gt;</pre>
<input type="email" aria-label="emailInputField" style="width: 100%" />
<pre>&lt;input type="url"&gt;</pre>
<input type="url" aria-label="urlInputField" style="width: 100%" />
<pre>&lt;input type="tel"&gt;</pre>
<input type="tel" aria-label="telInputField" style="width: 100%" />
<pre>&lt;input type="date"&gt;</pre>
<input type="date" aria-label="dateInputField" style="width: 100%" />
<pre>&lt;input type="month"&gt;</pre>
<input type="month" aria-label="monthInputField" style="width: 100%" />
<pre>&lt;input type="week"&gt;</pre>
<input type="week" aria-label="weekInputField" style="width: 100%" />
<pre>&lt;input type="time"&gt;</pre>
<input type="time" aria-label="timeInputField" style="width: 100%" />
<pre>&lt;input type="datetime-local"&gt;</pre>
<input type="datetime-local" aria-label="dateTimeInputField" style="width: 100%" />
<pre>&lt;input type="text" inputmode="numeric" pattern="[0-9]*"&gt;</pre>
<input type="text" inputmode="numeric" aria-label="textInputNumericField" />
<pre>autocapitalize: sentences</pre>
<textarea rows="3" aria-label="autocapitalize in sentence mode" autocapitalize="sentences" style="width: 100%"></textarea>
<pre>autocapitalize: words</pre>
<textarea rows="3" aria-label="autocapitalize in words mode" autocapitalize="words" style="width: 100%"></textarea>
<pre>autocapitalize: characters</pre>
<textarea rows="3" aria-label="autocapitalize in characters mode" autocapitalize="characters" style="width: 100%"></textarea>
<pre>autocapitalize: off</pre>
<textarea rows="3" aria-label="autocapitalize off" autocapitalize="none" style="width: 100%"></textarea>
"##;

/// Build an HTTP response with the given status code, content type, and body.
fn build_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        _ => "Unknown",
    };
    let headers = format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    let mut response = headers.into_bytes();
    response.extend_from_slice(body);
    response
}

/// Every GET serves the page, whatever the path.
fn handle_request(request: &str) -> Vec<u8> {
    let request_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return build_response(400, "text/plain", b"Bad Request");
    }
    match parts[0] {
        "GET" => build_response(200, "text/html; charset=utf-8", PAGE_HTML.as_bytes()),
        "HEAD" => {
            let mut full = build_response(200, "text/html; charset=utf-8", PAGE_HTML.as_bytes());
            full.truncate(full.len() - PAGE_HTML.len());
            full
        }
        _ => build_response(405, "text/plain", b"Method Not Allowed"),
    }
}

fn handle_connection(mut stream: TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0_u8; 1024];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 64 * 1024 {
            break;
        }
    }
    let request = String::from_utf8_lossy(&buf);
    stream.write_all(&handle_request(&request))?;
    stream.flush()
}

fn serve(listener: &TcpListener, shutdown: &Receiver<()>) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream) {
                    tracing::debug!(%peer, error = %err, "[ITH-SERVER] connection failed");
                }
                continue;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                tracing::warn!(error = %err, "[ITH-SERVER] accept failed");
            }
        }
        match shutdown.recv_timeout(ACCEPT_TICK) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Serves [`PAGE_HTML`] on 127.0.0.1 from a background thread until
/// closed or dropped.
#[derive(Debug)]
pub struct TestPageServer {
    addr: SocketAddr,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestPageServer {
    /// Bind an ephemeral port and start serving.
    pub fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").map_err(|source| IthError::Io {
            path: "127.0.0.1:0".into(),
            source,
        })?;
        let addr = listener.local_addr().map_err(|source| IthError::Io {
            path: "127.0.0.1:0".into(),
            source,
        })?;
        listener.set_nonblocking(true).map_err(|source| IthError::Io {
            path: addr.to_string().into(),
            source,
        })?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = std::thread::Builder::new()
            .name("ith-test-page".to_string())
            .spawn(move || serve(&listener, &rx))
            .map_err(|err| IthError::Runtime {
                details: format!("failed to spawn page server thread: {err}"),
            })?;
        tracing::info!(%addr, "[ITH-SERVER] test page server started");
        Ok(Self {
            addr,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL of the test page.
    pub fn url(&self) -> String {
        format!("http://{}{URL_PATH}", self.addr)
    }

    /// Stop serving and wait for the thread to exit.
    pub fn close(mut self) {
        self.shutdown_now();
    }

    fn shutdown_now(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("[ITH-SERVER] server thread panicked");
            }
            tracing::debug!(addr = %self.addr, "[ITH-SERVER] test page server stopped");
        }
    }
}

impl Drop for TestPageServer {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Fetch `url` with a plain HTTP/1.1 GET and return the body.
pub fn http_get(url: &str) -> Result<String> {
    let rest = url.strip_prefix("http://").ok_or_else(|| IthError::Runtime {
        details: format!("unsupported URL {url}"),
    })?;
    let (host, path) = rest.find('/').map_or((rest, "/"), |i| (&rest[..i], &rest[i..]));
    let io_err = |source| IthError::Io {
        path: url.into(),
        source,
    };
    let mut stream = TcpStream::connect(host).map_err(io_err)?;
    stream.set_read_timeout(Some(READ_TIMEOUT)).map_err(io_err)?;
    write!(stream, "GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n").map_err(io_err)?;
    let mut raw = String::new();
    stream.read_to_string(&mut raw).map_err(io_err)?;
    let (head, body) = raw.split_once("\r\n\r\n").ok_or_else(|| IthError::Runtime {
        details: format!("malformed response from {url}"),
    })?;
    if !head.starts_with("HTTP/1.1 200") {
        return Err(IthError::Runtime {
            details: format!("GET {url}: {}", head.lines().next().unwrap_or("")),
        });
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_length(resp: &str) -> Option<usize> {
        resp.lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .and_then(|v| v.trim().parse().ok())
    }

    #[test]
    fn head_keeps_content_length_without_body() {
        let resp = handle_request("HEAD /e14s-test HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(content_length(&text), Some(PAGE_HTML.len()));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn non_get_is_rejected() {
        let resp = String::from_utf8(handle_request("POST / HTTP/1.1\r\n\r\n")).unwrap();
        assert!(resp.starts_with("HTTP/1.1 405"));
        let resp = String::from_utf8(handle_request("")).unwrap();
        assert!(resp.starts_with("HTTP/1.1 400"));
    }

    #[test]
    fn server_serves_page_until_closed() {
        let server = TestPageServer::start().unwrap();
        let url = server.url();
        assert!(url.ends_with(URL_PATH));
        let body = http_get(&url).unwrap();
        assert!(body.contains("<title>E14s test page</title>"));
        assert!(body.contains("aria-label=\"passwordTextField\""));
        let addr = server.addr();
        server.close();
        assert!(TcpStream::connect(addr).is_err() || http_get(&url).is_err());
    }
}
