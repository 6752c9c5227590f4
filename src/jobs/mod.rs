//! # Jobs
//! src/jobs/mod.rs
//!
//! Un [`Job`] es una conexión aceptada que viaja del listener a la cola y
//! de la cola a exactamente un worker. Nunca se comparte: se mueve.
//!
//! Con keep-alive el mismo job vuelve a la cola desde el poller cada vez
//! que la conexión ociosa tiene datos, llevando consigo los bytes leídos
//! de más en la petición anterior.

pub mod queue;

pub use queue::JobQueue;

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Instant;

/// Identificador de un listener dentro del proceso
pub type ListenerId = u64;

/// Stream de una conexión aceptada, en claro o TLS
pub enum Connection {
    /// TCP sin cifrar
    Plain(TcpStream),

    /// TLS terminado por rustls; el handshake ocurre en la primera lectura
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>),
}

impl Connection {
    /// Socket TCP subyacente
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Connection::Plain(s) => s,
            #[cfg(feature = "tls")]
            Connection::Tls(s) => s.get_ref(),
        }
    }

    /// ¿La conexión es TLS?
    pub fn is_secure(&self) -> bool {
        match self {
            Connection::Plain(_) => false,
            #[cfg(feature = "tls")]
            Connection::Tls(_) => true,
        }
    }

    /// ¿Hay texto en claro ya descifrado esperando ser leído?
    ///
    /// En TLS puede quedar una petición entera dentro de rustls sin que el
    /// socket vuelva a estar legible.
    pub fn has_buffered_plaintext(&mut self) -> bool {
        match self {
            Connection::Plain(_) => false,
            #[cfg(feature = "tls")]
            Connection::Tls(s) => s
                .conn
                .process_new_packets()
                .map(|state| state.plaintext_bytes_to_read() > 0)
                .unwrap_or(false),
        }
    }

    /// Cierra la conexión; en TLS envía antes el close_notify
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(s) => s.shutdown(Shutdown::Both),
            #[cfg(feature = "tls")]
            Connection::Tls(s) => {
                s.conn.send_close_notify();
                // Si el peer ya cerró, el flush falla y no importa
                let _ = s.flush();
                s.get_ref().shutdown(Shutdown::Both)
            }
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Connection::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Connection::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Connection::Tls(s) => s.flush(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_secure() { "tls" } else { "plain" };
        f.debug_struct("Connection")
            .field("kind", &kind)
            .field("peer", &self.tcp().peer_addr().ok())
            .finish()
    }
}

/// Una unidad de trabajo: la conexión más su origen
#[derive(Debug)]
pub struct Job {
    /// Conexión a atender
    pub connection: Connection,

    /// Dirección del cliente
    pub peer: SocketAddr,

    /// Listener que la aceptó
    pub listener: ListenerId,

    /// Momento en que el job entró a la cola (accept o conexión reactivada)
    pub accepted_at: Instant,

    /// Bytes leídos que todavía no pertenecen a ninguna petición
    pub buffer: Vec<u8>,

    /// Peticiones ya atendidas en esta conexión
    pub requests: usize,
}

impl Job {
    pub fn new(connection: Connection, peer: SocketAddr, listener: ListenerId) -> Self {
        Self {
            connection,
            peer,
            listener,
            accepted_at: Instant::now(),
            buffer: Vec::new(),
            requests: 0,
        }
    }

    /// ¿Se puede leer otra petición sin esperar al socket?
    pub fn has_pending_input(&mut self) -> bool {
        !self.buffer.is_empty() || self.connection.has_buffered_plaintext()
    }

    /// Marca el job como recién encolado
    pub fn touch(&mut self) {
        self.accepted_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn plain_job() -> (Job, TcpStream) {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        let (stream, peer) = server.accept().unwrap();
        (Job::new(Connection::Plain(stream), peer, 7), client)
    }

    #[test]
    fn test_new_job_has_no_pending_input() {
        let (mut job, _client) = plain_job();
        assert_eq!(job.listener, 7);
        assert_eq!(job.requests, 0);
        assert!(!job.connection.is_secure());
        assert!(!job.has_pending_input());
    }

    #[test]
    fn test_leftover_bytes_are_pending_input() {
        let (mut job, _client) = plain_job();
        job.buffer.extend_from_slice(b"GET /next HTTP/1.1\r\n\r\n");
        assert!(job.has_pending_input());
    }
}
