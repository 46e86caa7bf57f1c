//! One-shot loopback listener for the OAuth redirect.

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::debug;

/// Outcome of inspecting one inbound request.
enum Callback {
    /// Not the redirect path (favicon and friends)
    Ignored,
    Code(String),
    Rejected(String),
}

const V4: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const V6: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);

/// Listener bound to the host port of a loopback redirect URI.
///
/// `localhost` binds both loopback families since browsers may resolve it
/// to either.
#[derive(Debug)]
pub struct CallbackListener {
    listeners: Vec<TcpListener>,
    path: String,
}

impl CallbackListener {
    /// Binds to the port named by `redirect_uri`.
    ///
    /// # Errors
    /// Returns an error if the URI is not a loopback http URL or the port is taken.
    pub fn bind(redirect_uri: &str) -> Result<Self> {
        let url = url::Url::parse(redirect_uri)
            .with_context(|| format!("Invalid redirect URI: {redirect_uri}"))?;
        if url.scheme() != "http" {
            anyhow::bail!("Redirect URI must use http to be captured locally: {redirect_uri}");
        }
        let addrs: &[IpAddr] = match url.host_str() {
            Some("localhost") => &[V4, V6],
            Some("127.0.0.1") => &[V4],
            Some("[::1]") => &[V6],
            _ => anyhow::bail!("Redirect URI is not a loopback address: {redirect_uri}"),
        };
        let mut port = url.port_or_known_default().unwrap_or(80);

        let mut listeners = Vec::with_capacity(addrs.len());
        let mut last_error = None;
        for &addr in addrs {
            match TcpListener::bind((addr, port)) {
                Ok(listener) => {
                    // later families follow the port the first one got
                    port = listener.local_addr()?.port();
                    listener
                        .set_nonblocking(true)
                        .context("Failed to configure callback listener")?;
                    listeners.push(listener);
                }
                Err(err) => {
                    debug!(%addr, port, error = %err, "loopback address unavailable");
                    last_error = Some(err);
                }
            }
        }
        if listeners.is_empty() {
            let err = last_error.map_or_else(
                || anyhow::anyhow!("no loopback address to bind"),
                anyhow::Error::from,
            );
            return Err(err).with_context(|| format!("Failed to listen on port {port}"));
        }

        Ok(Self {
            listeners,
            path: url.path().to_string(),
        })
    }

    /// Port the listener is bound to.
    ///
    /// # Errors
    /// Returns an error if the socket address cannot be read.
    pub fn local_port(&self) -> Result<u16> {
        let listener = self
            .listeners
            .first()
            .context("Callback listener has no socket")?;
        Ok(listener.local_addr()?.port())
    }

    /// Loopback addresses being listened on.
    pub fn local_addrs(&self) -> Vec<IpAddr> {
        self.listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .map(|addr| addr.ip())
            .collect()
    }

    /// Blocks until the redirect arrives or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    /// Returns an error if the provider reported an error or the state does not match.
    pub fn wait_for_code(self, expected_state: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut idle = true;
            for listener in &self.listeners {
                match listener.accept() {
                    Ok((stream, _)) => {
                        idle = false;
                        match self.handle(stream, expected_state) {
                            Callback::Ignored => {}
                            Callback::Code(code) => return Ok(Some(code)),
                            Callback::Rejected(reason) => anyhow::bail!(reason),
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(err).context("Callback listener failed"),
                }
            }
            if idle {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    fn handle(&self, mut stream: TcpStream, expected_state: &str) -> Callback {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        let mut buffer = [0u8; 4096];
        let read = stream.read(&mut buffer).unwrap_or(0);
        let request = String::from_utf8_lossy(&buffer[..read]);
        let outcome = self.inspect(&request, expected_state);

        let response = match &outcome {
            Callback::Ignored => http_response("404 Not Found", "text/plain", "Not found"),
            Callback::Code(_) => http_response("200 OK", "text/html", SUCCESS_PAGE),
            Callback::Rejected(reason) => http_response("400 Bad Request", "text/plain", reason),
        };
        let _ = stream.write_all(response.as_bytes());
        outcome
    }

    fn inspect(&self, request: &str, expected_state: &str) -> Callback {
        let Some(target) = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
        else {
            return Callback::Ignored;
        };
        let Ok(url) = url::Url::parse(&format!("http://localhost{target}")) else {
            return Callback::Ignored;
        };
        if url.path() != self.path {
            debug!(path = url.path(), "ignoring request outside the redirect path");
            return Callback::Ignored;
        }

        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        if let Some(error) = param("error") {
            let description = param("error_description").unwrap_or_default();
            return Callback::Rejected(format!("Authorization failed: {error} {description}"));
        }
        if param("state").as_deref() != Some(expected_state) {
            return Callback::Rejected("State mismatch".to_string());
        }
        match param("code") {
            Some(code) if !code.is_empty() => Callback::Code(code),
            _ => Callback::Rejected("Authorization code missing from redirect".to_string()),
        }
    }
}

const SUCCESS_PAGE: &str = "<!doctype html><html><head><meta charset=\"utf-8\" /><title>Sistema A</title></head><body><p>Logged in. Return to your terminal to continue.</p></body></html>";

fn http_response(status: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}
