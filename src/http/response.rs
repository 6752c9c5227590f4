//! # Construcción de Respuestas HTTP
//! src/http/response.rs
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: application/json\r\n
//! Content-Length: 13\r\n
//! Connection: close\r\n
//! \r\n
//! {"ok": true}
//! ```
//!
//! `Content-Length` y `Connection` los fija siempre el servidor: el worker
//! decide si la conexión queda abierta (`keep-alive`) o se cierra.

use super::StatusCode;
use std::io::{self, Write};

/// Respuesta HTTP completa
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    /// En orden de inserción; un nombre repetido reemplaza el valor
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Respuesta vacía con el código indicado
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Agrega (o reemplaza) un header
    ///
    /// ```
    /// use http_appserver::http::{Response, StatusCode};
    ///
    /// let response = Response::new(StatusCode::Ok)
    ///     .with_header("X-Worker", "worker-1")
    ///     .with_header("x-worker", "worker-2");
    /// assert_eq!(response.header("X-Worker"), Some("worker-2"));
    /// ```
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Versión mutable de [`Response::with_header`]
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Body de texto
    pub fn with_body(self, body: &str) -> Self {
        self.with_body_bytes(body.as_bytes().to_vec())
    }

    /// Body binario
    pub fn with_body_bytes(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// 200 con `Content-Type: text/plain`
    pub fn text(body: &str) -> Self {
        Self::new(StatusCode::Ok)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body)
    }

    /// 200 con `Content-Type: application/json`
    pub fn json(body: &str) -> Self {
        Self::new(StatusCode::Ok)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    /// Error con body `{"error": "..."}`
    pub fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(&body)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Serializa la respuesta completa con `Connection: close`
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode(false)
    }

    /// Serializa la respuesta; `Content-Length` y `Connection` los pone el servidor
    pub fn encode(&self, keep_alive: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
                continue;
            }
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        let connection = if keep_alive { "keep-alive" } else { "close" };
        out.extend_from_slice(format!("Connection: {connection}\r\n\r\n").as_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Escribe la respuesta con `Connection: close` y hace flush
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.write_with(writer, false)
    }

    /// Escribe la respuesta indicando si la conexión sigue abierta
    pub fn write_with<W: Write + ?Sized>(&self, writer: &mut W, keep_alive: bool) -> io::Result<()> {
        writer.write_all(&self.encode(keep_alive))?;
        writer.flush()
    }
}
