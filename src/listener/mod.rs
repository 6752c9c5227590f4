//! # Listeners
//! src/listener/mod.rs
//!
//! Un listener por dirección configurada. Cada uno corre su propio loop
//! de accept y convierte cada conexión en un [`Job`] de la cola compartida.
//!
//! ```text
//! accept() → [TLS wrap] → Job → JobQueue::enqueue (bloquea si está llena)
//! ```
//!
//! La variante (plano o TLS) se decide al construir: la configuración TLS
//! se carga antes de abrir el socket, así un certificado inválido aborta
//! el arranque sin dejar puertos abiertos.

pub mod registry;
#[cfg(feature = "tls")]
pub mod tls;

pub use registry::ListenerRegistry;

use crate::config::ConfigFile;
use crate::error::{Result, ServerError};
use crate::jobs::{Connection, Job, JobQueue, ListenerId};
use crate::metrics::Metrics;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Puerto por defecto de `Listen`
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Puerto por defecto de `SslListen`
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Puerto del listener implícito cuando el proceso no es root
pub const UNPRIVILEGED_PORT: u16 = 8000;

/// Pausa entre reintentos de bind
const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Certificado y clave de un listener TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Dirección de escucha configurada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerEndpoint {
    /// Dirección IP o nombre ("" = todas las interfaces IPv4)
    pub ip: String,

    pub port: u16,

    /// `Some` para listeners TLS
    pub tls: Option<TlsFiles>,
}

impl ListenerEndpoint {
    /// Endpoint sin TLS
    pub fn plain(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            tls: None,
        }
    }

    /// Endpoint implícito: `0.0.0.0:80` con privilegios, `0.0.0.0:8000` sin ellos
    pub fn default_endpoint(privileged: bool) -> Self {
        let port = if privileged { DEFAULT_HTTP_PORT } else { UNPRIVILEGED_PORT };
        Self::plain("0.0.0.0", port)
    }

    /// `Listen <ip> [port]`
    ///
    /// ```
    /// use http_appserver::listener::ListenerEndpoint;
    ///
    /// let ep = ListenerEndpoint::from_listen(&["127.0.0.1".to_string()]).unwrap();
    /// assert_eq!(ep.port, 80);
    /// assert!(ListenerEndpoint::from_listen(&[]).is_err());
    /// ```
    pub fn from_listen(params: &[String]) -> Result<Self> {
        let ip = params.first().ok_or(ServerError::EmptyListen("Listen"))?;
        let port = parse_port(params.get(1), DEFAULT_HTTP_PORT)?;
        Ok(Self::plain(ip.as_str(), port))
    }

    /// `SslListen <ip> [port] [cert] [key]`
    ///
    /// El certificado se resuelve aquí, antes de que exista ningún socket.
    pub fn from_ssl_listen(params: &[String], config: &ConfigFile) -> Result<Self> {
        let ip = params.first().ok_or(ServerError::EmptyListen("SslListen"))?;
        let port = parse_port(params.get(1), DEFAULT_HTTPS_PORT)?;
        let tls = resolve_tls_files(params, config.get("SslCertificate"), config.get("SslKey"))?;

        Ok(Self {
            ip: ip.clone(),
            port,
            tls: Some(tls),
        })
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Direcciones de socket candidatas para el bind
    fn socket_addrs(&self) -> Result<Vec<SocketAddr>> {
        let host = if self.ip.is_empty() { "0.0.0.0" } else { self.ip.as_str() };
        let addrs: Vec<_> = (host, self.port)
            .to_socket_addrs()
            .map_err(|e| ServerError::Address(format!("{self}: {e}")))?
            .collect();

        if addrs.is_empty() {
            return Err(ServerError::Address(self.to_string()));
        }
        Ok(addrs)
    }
}

impl std::fmt::Display for ListenerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

fn parse_port(raw: Option<&String>, default: u16) -> Result<u16> {
    match raw {
        None => Ok(default),
        Some(p) => p.parse().map_err(|_| ServerError::InvalidPort(p.clone())),
    }
}

/// Resuelve certificado y clave de un `SslListen`
///
/// - 4+ parámetros: certificado y clave propios.
/// - 3 parámetros: el archivo del certificado también contiene la clave.
/// - si no: `SslCertificate`, y como clave `SslKey` o el mismo certificado.
pub fn resolve_tls_files(
    params: &[String],
    default_cert: Option<&str>,
    default_key: Option<&str>,
) -> Result<TlsFiles> {
    let certificate = match params.get(2) {
        Some(cert) => cert.as_str(),
        None => default_cert.unwrap_or(""),
    };

    if certificate.is_empty() {
        return Err(ServerError::SslCertificateMissing);
    }

    let key = match (params.get(3), params.get(2)) {
        (Some(key), _) => key.as_str(),
        (None, Some(cert)) => cert.as_str(),
        (None, None) => default_key.filter(|k| !k.is_empty()).unwrap_or(certificate),
    };

    Ok(TlsFiles {
        certificate: PathBuf::from(certificate),
        key: PathBuf::from(key),
    })
}

/// Opciones de bind y de las conexiones aceptadas
#[derive(Debug, Clone, Copy)]
pub struct BindOptions {
    pub backlog: i32,
    pub retry: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for BindOptions {
    fn default() -> Self {
        let s = crate::config::Settings::default();
        Self::from(&s)
    }
}

impl From<&crate::config::Settings> for BindOptions {
    fn from(s: &crate::config::Settings) -> Self {
        Self {
            backlog: s.listen_backlog,
            retry: s.listen_retry,
            read_timeout: s.socket_read_timeout,
            write_timeout: s.socket_write_timeout,
        }
    }
}

/// Variante del listener
enum ListenerKind {
    Plain,
    #[cfg(feature = "tls")]
    Secure(std::sync::Arc<rustls::ServerConfig>),
}

/// Socket de escucha abierto
pub struct Listener {
    id: ListenerId,
    endpoint: ListenerEndpoint,
    socket: TcpListener,
    local_addr: SocketAddr,
    stopped: AtomicBool,
    kind: ListenerKind,
    options: BindOptions,
}

impl Listener {
    /// Prepara la variante y abre el socket
    pub fn bind(endpoint: ListenerEndpoint, options: BindOptions) -> Result<Self> {
        let kind = match &endpoint.tls {
            None => ListenerKind::Plain,
            #[cfg(feature = "tls")]
            Some(files) => ListenerKind::Secure(tls::server_config(files)?),
            #[cfg(not(feature = "tls"))]
            Some(_) => return Err(ServerError::Tls("built without tls support".to_string())),
        };

        let socket = bind_with_retry(&endpoint, &options)?;
        let local_addr = socket.local_addr()?;

        let listener = Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            socket,
            local_addr,
            stopped: AtomicBool::new(false),
            kind,
            options,
        };

        tracing::info!(
            listener = listener.id,
            addr = %listener.local_addr,
            tls = listener.endpoint.is_secure(),
            "escuchando"
        );
        Ok(listener)
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn endpoint(&self) -> &ListenerEndpoint {
        &self.endpoint
    }

    /// Dirección real (útil con puerto 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Acepta conexiones y las encola hasta que se llame a [`Listener::stop`]
    ///
    /// También termina si la cola se cerró.
    pub fn run_accept_loop(&self, queue: &JobQueue, metrics: &Metrics) {
        tracing::debug!(listener = self.id, addr = %self.local_addr, "accept loop iniciado");

        while !self.is_stopped() {
            let (stream, peer) = match self.socket.accept() {
                Ok(accepted) => accepted,
                Err(e) if self.is_stopped() => {
                    tracing::debug!(listener = self.id, error = %e, "accept interrumpido por stop");
                    break;
                }
                Err(e) => {
                    match e.kind() {
                        io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset => {}
                        _ => {
                            tracing::error!(listener = self.id, error = %e, "error en accept");
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                    continue;
                }
            };

            // La conexión de despertar de stop() no es trabajo
            if self.is_stopped() {
                break;
            }

            let connection = match self.wrap(stream) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(listener = self.id, %peer, error = %e, "conexión descartada");
                    continue;
                }
            };

            metrics.record_accepted();
            tracing::trace!(listener = self.id, %peer, "conexión aceptada");

            if queue.enqueue(Job::new(connection, peer, self.id)).is_err() {
                tracing::debug!(listener = self.id, "cola cerrada, fin del accept loop");
                break;
            }
        }

        tracing::debug!(listener = self.id, "accept loop terminado");
    }

    /// Aplica timeouts y, si corresponde, envuelve en TLS
    fn wrap(&self, stream: TcpStream) -> io::Result<Connection> {
        stream.set_read_timeout(non_zero(self.options.read_timeout))?;
        stream.set_write_timeout(non_zero(self.options.write_timeout))?;
        stream.set_nodelay(true)?;

        match &self.kind {
            ListenerKind::Plain => Ok(Connection::Plain(stream)),
            #[cfg(feature = "tls")]
            ListenerKind::Secure(config) => {
                let conn = rustls::ServerConnection::new(std::sync::Arc::clone(config))
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                Ok(Connection::Tls(Box::new(rustls::StreamOwned::new(conn, stream))))
            }
        }
    }

    /// Detiene el listener; idempotente
    ///
    /// Desbloquea un `accept` pendiente conectándose al propio puerto.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let wake = wake_addr(self.local_addr);
        if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            tracing::debug!(listener = self.id, error = %e, "no se pudo despertar el accept");
        }
        tracing::info!(listener = self.id, addr = %self.local_addr, "listener detenido");
    }

    /// Marca el listener como detenido sin despertar a nadie
    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Un timeout de 0 significa "sin timeout"
fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

/// Dirección para conectarse a uno mismo
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

/// Bind con backlog, reintentando mientras la dirección esté en uso
fn bind_with_retry(endpoint: &ListenerEndpoint, options: &BindOptions) -> Result<TcpListener> {
    let addrs = endpoint.socket_addrs()?;
    let attempts = options.retry + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match bind_any(&addrs, options.backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => e,
        };

        if err.kind() != io::ErrorKind::AddrInUse || attempt >= attempts {
            return Err(ServerError::Bind {
                addr: endpoint.to_string(),
                attempts: attempt,
                source: err,
            });
        }

        tracing::warn!(addr = %endpoint, attempt, error = %err, "dirección en uso, reintentando");
        thread::sleep(BIND_RETRY_DELAY);
    }
}

/// Prueba cada dirección resuelta; devuelve el último error si ninguna sirve
fn bind_any(addrs: &[SocketAddr], backlog: i32) -> io::Result<TcpListener> {
    let mut last_err = None;

    for addr in addrs {
        match bind_one(*addr, backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses")))
}

fn bind_one(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}
