//! Shared HTTP listener for scrape requests.
//!
//! Listeners are process-wide resources keyed by listener address: the first
//! reporter requesting an address performs the real bind, later reporters
//! attach to the existing endpoint, and the endpoint is closed only when the
//! last reporter releases it. Each endpoint runs on its own thread with a
//! current-thread runtime, so reporters can be driven from non-async host
//! code.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::net::TcpSocket;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::error::ReporterError;
use crate::listener::ListenerAddress;
use crate::registry::{MetricRegistry, SharedRegistry};

/// Table key: configured host plus resolved port.
type ListenerKey = (String, u16);

struct ServerEntry {
    registry: SharedRegistry,
    shutdown: watch::Sender<bool>,
    thread: thread::JoinHandle<()>,
    refs: usize,
}

/// Process-wide table of bound listeners.
static SERVERS: Lazy<Mutex<HashMap<ListenerKey, ServerEntry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Handle to a bound (or joined) listener, held by one reporter instance.
///
/// The handle carries the *resolved* port: a reporter configured with port 0
/// reads the actually-chosen port here, which is what a later reporter needs
/// to join the same endpoint.
pub struct SharedServer {
    key: ListenerKey,
    port: u16,
    registry: SharedRegistry,
}

impl SharedServer {
    /// The resolved port this endpoint is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The registry backing this endpoint.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }
}

/// Acquire the listener for the given address, binding it if this is the
/// first reporter to request it.
///
/// Binding is synchronous and fails fast; a port-0 request always binds a
/// fresh endpoint on a kernel-chosen port.
pub fn acquire(address: &ListenerAddress) -> Result<SharedServer, ReporterError> {
    let mut servers = SERVERS.lock();

    if address.port != 0 {
        let key = (address.host.clone(), address.port);
        if let Some(entry) = servers.get_mut(&key) {
            entry.refs += 1;
            debug!(addr = %address, refs = entry.refs, "Attached to existing metrics listener");
            return Ok(SharedServer {
                key,
                port: address.port,
                registry: entry.registry.clone(),
            });
        }
    }

    let bind_target = address.socket_addr_string();
    let sock_addr = bind_target
        .to_socket_addrs()
        .map_err(|e| ReporterError::Bind {
            addr: bind_target.clone(),
            source: e,
        })?
        .next()
        .ok_or_else(|| ReporterError::Bind {
            addr: bind_target.clone(),
            source: io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved no addresses"),
        })?;

    // SO_REUSEADDR lets a fresh reporter rebind an address whose previous
    // endpoint was just torn down, without waiting out TIME_WAIT, while a
    // genuinely conflicting active listener still fails fast.
    let socket = if sock_addr.is_ipv6() {
        TcpSocket::new_v6()
    } else {
        TcpSocket::new_v4()
    }
    .map_err(ReporterError::Listener)?;
    socket.set_reuseaddr(true).map_err(ReporterError::Listener)?;
    socket.bind(sock_addr).map_err(|e| ReporterError::Bind {
        addr: bind_target.clone(),
        source: e,
    })?;
    let port = socket
        .local_addr()
        .map_err(ReporterError::Listener)?
        .port();

    let registry: SharedRegistry = Arc::new(MetricRegistry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ReporterError::Listener)?;

    // Listen before returning, so the endpoint accepts scrapes as soon as
    // acquire succeeds. Registering the listener needs the runtime context.
    let listener = {
        let _guard = runtime.enter();
        socket.listen(1024).map_err(ReporterError::Listener)?
    };

    let router = create_router(registry.clone());
    let thread = thread::Builder::new()
        .name(format!("promlink-listener-{}", port))
        .spawn(move || serve(runtime, listener, router, shutdown_rx))
        .map_err(ReporterError::Listener)?;

    info!(addr = %bind_target, port, "Metrics listener started");

    let key = (address.host.clone(), port);
    servers.insert(
        key.clone(),
        ServerEntry {
            registry: registry.clone(),
            shutdown: shutdown_tx,
            thread,
            refs: 1,
        },
    );

    Ok(SharedServer {
        key,
        port,
        registry,
    })
}

/// Release one reference to a listener, tearing the endpoint down when the
/// last reference is gone.
pub fn release(server: SharedServer) {
    let mut servers = SERVERS.lock();

    let last = match servers.get_mut(&server.key) {
        Some(entry) => {
            entry.refs -= 1;
            if entry.refs > 0 {
                debug!(port = server.port, refs = entry.refs, "Detached from metrics listener");
            }
            entry.refs == 0
        }
        None => false,
    };
    if !last {
        return;
    }

    if let Some(entry) = servers.remove(&server.key) {
        let _ = entry.shutdown.send(true);
        // The endpoint is fully torn down before the table lock is released,
        // so a concurrent acquire for this address can only bind once the
        // port is genuinely free.
        if entry.thread.join().is_err() {
            error!(port = server.port, "Metrics listener thread panicked");
        }
        info!(port = server.port, "Metrics listener stopped");
    }
}

fn serve(
    runtime: tokio::runtime::Runtime,
    listener: tokio::net::TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    runtime.block_on(async move {
        // Dropping the serve future on shutdown closes the socket and any
        // open connections immediately; teardown must not wait on idle
        // keep-alive connections.
        tokio::select! {
            result = axum::serve(listener, router).into_future() => {
                if let Err(e) = result {
                    error!(error = %e, "Metrics listener terminated");
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Metrics listener shutting down");
            }
        }
    });
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            break;
        }
        if *shutdown.borrow() {
            break;
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

/// Create the HTTP router.
fn create_router(registry: SharedRegistry) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the /metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.render();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}
