//! WebSocket listener
//!
//! Accepts TCP (optionally TLS) connections, resolves the route during the
//! WebSocket handshake and hands each upgraded connection to a [`Session`].
//!
//! * `/<token>/ws`   → gate and garage
//! * `/<token>/mono` → gate only
//! * anything else   → 404, no upgrade
//!
//! Requests without `Upgrade: websocket` get the browser clients from the
//! static directory: `/gate`, `/hud`, `/favicon.ico`, `/manifest.json` and
//! `/static/*`.

use crate::domain::models::Entitlement;
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{BleAdapter, DeviceRegistry};
use crate::infrastructure::tls;
use crate::presentation::session::Session;
use anyhow::Context;
use futures::StreamExt;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, info_span, warn, Instrument};

/// Map a request path to the entitlement of its endpoint
pub fn resolve_route(path: &str, token: &str) -> Option<Entitlement> {
    let endpoint = if token.is_empty() {
        path
    } else {
        path.strip_prefix('/')?.strip_prefix(token)?
    };
    match endpoint {
        "/ws" => Some(Entitlement::GateAndGarage),
        "/mono" => Some(Entitlement::GateOnly),
        _ => None,
    }
}

/// Map a plain GET target to a file relative to the static directory
pub fn static_file(target: &str) -> Option<PathBuf> {
    let path = target.split(['?', '#']).next().unwrap_or(target);
    let relative = match path {
        "/gate" => "gate.html",
        "/hud" => "hud.html",
        "/favicon.ico" => "favicon.ico",
        "/manifest.json" => "manifest.json",
        _ => path.strip_prefix("/static/")?,
    };
    let relative = Path::new(relative);
    let mut components = relative.components().peekable();
    components.peek()?;
    components
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| relative.to_path_buf())
}

fn is_upgrade(head: &str) -> bool {
    head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

/// Request target of a plain (non-upgrade) GET, if the head is one
fn plain_get(head: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(head);
    if is_upgrade(&head) {
        return None;
    }
    let mut request_line = head.lines().next()?.split(' ');
    match (request_line.next()?, request_line.next()) {
        ("GET", Some(target)) => Some(target.to_string()),
        _ => None,
    }
}

fn content_type(file: &Path) -> &'static str {
    match file.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("ico") => "image/x-icon",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn http_response(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        status,
        content_type,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

pub struct GatewayServer<A: BleAdapter> {
    registry: Arc<DeviceRegistry<A>>,
    address: String,
    token: String,
    tls: Option<TlsAcceptor>,
    heartbeat_interval: Duration,
    static_dir: PathBuf,
    next_session: AtomicU64,
}

impl<A: BleAdapter> GatewayServer<A> {
    pub fn new(registry: Arc<DeviceRegistry<A>>, settings: &Settings) -> anyhow::Result<Self> {
        let server = &settings.server;
        let tls = if server.use_tls {
            let acceptor =
                tls::load_acceptor(Path::new(&server.certificate), Path::new(&server.private_key))
                    .context("loading TLS material")?;
            Some(acceptor)
        } else {
            None
        };

        Ok(Self {
            registry,
            address: server.address.clone(),
            token: server.auth_token.clone(),
            tls,
            heartbeat_interval: settings.session.heartbeat_interval(),
            static_dir: PathBuf::from(&server.static_dir),
            next_session: AtomicU64::new(1),
        })
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("binding {}", self.address))?;
        info!(
            "Listening on {}://{}",
            if self.tls.is_some() { "wss" } else { "ws" },
            listener.local_addr()?
        );

        let server = Arc::new(self);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&server);
                    tokio::spawn(async move { server.handle_connection(stream, peer).await });
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("session", id, %peer);

        async {
            let served = match &self.tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => self.serve(id, stream).await,
                    Err(e) => Err(anyhow::Error::new(e).context("TLS handshake")),
                },
                None => self.serve(id, stream).await,
            };
            if let Err(e) = served {
                debug!("Connection dropped: {:#}", e);
            }
        }
        .instrument(span)
        .await
    }

    async fn serve<S>(&self, id: u64, stream: S) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // The preview stays buffered, so the handshake still sees the whole head
        let mut reader = BufReader::new(stream);
        let head = reader.fill_buf().await.context("reading request head")?;
        if let Some(target) = plain_get(head) {
            return self.serve_static(reader, &target).await;
        }

        let mut entitlement = None;
        let callback = |request: &Request, response: Response| {
            let path = request.uri().path();
            match resolve_route(path, &self.token) {
                Some(found) => {
                    entitlement = Some(found);
                    Ok(response)
                }
                None => {
                    info!("Refusing unknown path {}", path);
                    let mut refusal = ErrorResponse::new(None);
                    *refusal.status_mut() = StatusCode::NOT_FOUND;
                    Err(refusal)
                }
            }
        };
        let ws_stream = accept_hdr_async(reader, callback)
            .await
            .context("WebSocket handshake")?;
        let Some(entitlement) = entitlement else {
            return Ok(());
        };

        let (tx, rx) = ws_stream.split();
        Session::new(
            id,
            Arc::clone(&self.registry),
            entitlement,
            self.heartbeat_interval,
        )
        .run(tx, rx)
        .await;
        Ok(())
    }

    async fn serve_static<S>(&self, mut stream: S, target: &str) -> anyhow::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let found = match static_file(target) {
            Some(file) => {
                let path = self.static_dir.join(&file);
                match tokio::fs::read(&path).await {
                    Ok(body) => Some((file, body)),
                    Err(e) => {
                        debug!("Cannot read {}: {}", path.display(), e);
                        None
                    }
                }
            }
            None => None,
        };

        let response = match found {
            Some((file, body)) => {
                debug!("GET {} ({} bytes)", target, body.len());
                http_response("200 OK", content_type(&file), &body)
            }
            None => {
                info!("No static file for {}", target);
                http_response("404 Not Found", "text/plain; charset=utf-8", b"not found")
            }
        };
        stream
            .write_all(&response)
            .await
            .context("writing HTTP response")?;
        stream.shutdown().await.context("closing HTTP response")?;
        Ok(())
    }
}
