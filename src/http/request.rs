//! # Lectura de Requests HTTP
//! src/http/request.rs
//!
//! Lee una petición HTTP/1.0 o HTTP/1.1 desde una conexión aceptada.
//!
//! ```text
//! GET /path?param1=value1 HTTP/1.1\r\n
//! Host: example.com:8080\r\n
//! \r\n
//! ```
//!
//! La cabecera se acota a `MaxRequestSize`; el body solo se lee si llega
//! `Content-Length`, y también cuenta contra ese límite.

use std::collections::HashMap;
use std::io::Read;
use thiserror::Error;

/// Métodos HTTP reconocidos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    OPTIONS,
}

impl Method {
    fn parse(s: &str) -> Result<Self, ParseError> {
        match s {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "OPTIONS" => Ok(Method::OPTIONS),
            _ => Err(ParseError::UnsupportedMethod(s.to_string())),
        }
    }

    /// Nombre del método
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
        }
    }
}

/// Errores al leer una petición
#[derive(Debug, Error)]
pub enum ParseError {
    /// El cliente cerró sin enviar nada
    #[error("empty request")]
    EmptyRequest,

    /// La conexión terminó antes del fin de la cabecera
    #[error("incomplete HTTP request")]
    IncompleteRequest,

    /// Primera línea mal formada
    #[error("invalid request line")]
    InvalidRequestLine,

    /// Método fuera de [`Method`]
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Versión distinta de HTTP/1.0 y HTTP/1.1
    #[error("invalid HTTP version: {0}")]
    InvalidHttpVersion(String),

    /// Cabecera sin ':'
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Se superó el tamaño máximo
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    /// Error de E/S (incluye timeouts de lectura)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Petición HTTP parseada
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: String,
    query_params: HashMap<String, String>,
    /// Nombres en minúsculas
    headers: HashMap<String, String>,
    version: String,
    body: Vec<u8>,
}

const HEAD_END: &[u8] = b"\r\n\r\n";

impl Request {
    /// Lee una petición completa de `reader`
    ///
    /// # Ejemplo
    /// ```
    /// use http_appserver::http::Request;
    ///
    /// let raw = b"GET /hello?name=ana HTTP/1.1\r\nHost: Example.com:8080\r\n\r\n";
    /// let request = Request::read_from(&mut &raw[..], 1024).unwrap();
    ///
    /// assert_eq!(request.path(), "/hello");
    /// assert_eq!(request.query_param("name"), Some("ana"));
    /// assert_eq!(request.host(), "example.com");
    /// ```
    pub fn read_from<R: Read + ?Sized>(reader: &mut R, max_size: usize) -> Result<Self, ParseError> {
        Self::read_buffered(reader, &mut Vec::new(), max_size)
    }

    /// Lee una petición empezando por los bytes ya presentes en `buffer`
    ///
    /// Lo que se lea de más (una petición siguiente en la misma conexión)
    /// queda en `buffer` para la próxima llamada.
    pub fn read_buffered<R: Read + ?Sized>(
        reader: &mut R,
        buffer: &mut Vec<u8>,
        max_size: usize,
    ) -> Result<Self, ParseError> {
        let mut chunk = [0u8; 1024];

        let head_len = loop {
            if let Some(pos) = find(buffer, HEAD_END) {
                break pos;
            }
            if buffer.len() > max_size {
                return Err(ParseError::TooLarge(max_size));
            }

            let n = reader.read(&mut chunk)?;
            if n == 0 {
                return Err(if buffer.is_empty() {
                    ParseError::EmptyRequest
                } else {
                    ParseError::IncompleteRequest
                });
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        if head_len > max_size {
            return Err(ParseError::TooLarge(max_size));
        }

        let head = std::str::from_utf8(&buffer[..head_len]).map_err(|_| ParseError::InvalidRequestLine)?;
        let mut request = Self::parse_head(head)?;

        let content_length = match request.header("content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidHeader(format!("content-length: {v}")))?,
            None => 0,
        };
        if content_length > max_size.saturating_sub(head_len) {
            return Err(ParseError::TooLarge(max_size));
        }

        let mut body = buffer.split_off(head_len + HEAD_END.len());
        buffer.clear();

        if body.len() < content_length {
            let start = body.len();
            body.resize(content_length, 0);
            reader
                .read_exact(&mut body[start..])
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => ParseError::IncompleteRequest,
                    _ => ParseError::Io(e),
                })?;
        } else {
            *buffer = body.split_off(content_length);
        }
        request.body = body;

        Ok(request)
    }

    /// ¿El cliente acepta que la conexión siga abierta?
    ///
    /// HTTP/1.1 por defecto sí, salvo `Connection: close`; HTTP/1.0 solo
    /// con `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.header("connection")
                .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
        };

        if self.version == "HTTP/1.1" {
            !has_token("close")
        } else {
            has_token("keep-alive")
        }
    }

    /// Parsea request line y cabeceras
    fn parse_head(head: &str) -> Result<Self, ParseError> {
        let mut lines = head.split("\r\n");
        let request_line = lines.next().ok_or(ParseError::EmptyRequest)?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::InvalidRequestLine);
        }

        let method = Method::parse(parts[0])?;

        let version = parts[2].to_string();
        if version != "HTTP/1.0" && version != "HTTP/1.1" {
            return Err(ParseError::InvalidHttpVersion(version));
        }

        let (path, query) = match parts[1].split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (parts[1].to_string(), String::new()),
        };

        let mut headers = HashMap::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(Self {
            method,
            query_params: parse_query_string(&query),
            path,
            query,
            headers,
            version,
            body: Vec::new(),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string sin decodificar (sin el '?')
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Cabecera por nombre (sin distinguir mayúsculas)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Host de la petición en minúsculas y sin puerto ("" si no vino)
    pub fn host(&self) -> String {
        let raw = self.header("host").unwrap_or("");
        let host = match raw.strip_prefix('[') {
            // IPv6 literal: [::1]:8080
            Some(rest) => rest.split(']').next().unwrap_or(rest),
            None => raw.split(':').next().unwrap_or(raw),
        };
        host.to_ascii_lowercase()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `a=1&b=hola+mundo&flag` → {a: 1, b: "hola mundo", flag: ""}
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|param| match param.split_once('=') {
            Some((k, v)) => (k.to_string(), url_decode(v)),
            None => (param.to_string(), String::new()),
        })
        .collect()
}

/// Decodifica `+` y secuencias `%XX`
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(raw: &[u8]) -> Result<Request, ParseError> {
        Request::read_from(&mut &raw[..], 4096)
    }

    #[test]
    fn test_parse_simple_get() {
        let request = read(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.path(), "/");
        assert_eq!(request.version(), "HTTP/1.0");
        assert_eq!(request.host(), "");
    }

    #[test]
    fn test_query_params_decoded() {
        let request = read(b"GET /echo?msg=hola%20mundo&x=a+b&flag HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.query(), "msg=hola%20mundo&x=a+b&flag");
        assert_eq!(request.query_param("msg"), Some("hola mundo"));
        assert_eq!(request.query_param("x"), Some("a b"));
        assert_eq!(request.query_param("flag"), Some(""));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let request = read(b"GET / HTTP/1.1\r\nX-Custom: Value\r\n\r\n").unwrap();
        assert_eq!(request.header("x-custom"), Some("Value"));
        assert_eq!(request.header("X-CUSTOM"), Some("Value"));
    }

    #[test]
    fn test_host_strips_port() {
        let request = read(b"GET / HTTP/1.1\r\nHost: WWW.Example.com:8080\r\n\r\n").unwrap();
        assert_eq!(request.host(), "www.example.com");

        let request = read(b"GET / HTTP/1.1\r\nHost: [::1]:8080\r\n\r\n").unwrap();
        assert_eq!(request.host(), "::1");
    }

    #[test]
    fn test_body_with_content_length() {
        let request = read(b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").unwrap();
        assert_eq!(request.body(), b"hello");
    }

    #[test]
    fn test_truncated_body() {
        let err = read(b"POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello").unwrap_err();
        assert!(matches!(err, ParseError::IncompleteRequest));
    }

    #[test]
    fn test_empty_and_incomplete() {
        assert!(matches!(read(b"").unwrap_err(), ParseError::EmptyRequest));
        assert!(matches!(read(b"GET / HTTP/1.1\r\n").unwrap_err(), ParseError::IncompleteRequest));
    }

    #[test]
    fn test_too_large() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(200));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let err = Request::read_from(&mut &raw[..], 64).unwrap_err();
        assert!(matches!(err, ParseError::TooLarge(64)));
    }

    #[test]
    fn test_pipelined_requests_share_buffer() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\n\r\n";
        let mut reader = &raw[..];
        let mut buffer = Vec::new();

        let first = Request::read_buffered(&mut reader, &mut buffer, 4096).unwrap();
        assert_eq!(first.path(), "/a");
        assert_eq!(first.body(), b"abc");
        assert_eq!(buffer, b"GET /b HTTP/1.1\r\n\r\n");

        let second = Request::read_buffered(&mut reader, &mut buffer, 4096).unwrap();
        assert_eq!(second.path(), "/b");
        assert!(buffer.is_empty());

        let third = Request::read_buffered(&mut reader, &mut buffer, 4096);
        assert!(matches!(third, Err(ParseError::EmptyRequest)));
    }

    #[test]
    fn test_keep_alive_by_version() {
        assert!(read(b"GET / HTTP/1.1\r\n\r\n").unwrap().keep_alive());
        assert!(!read(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap().keep_alive());
        assert!(!read(b"GET / HTTP/1.0\r\n\r\n").unwrap().keep_alive());
        assert!(read(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap().keep_alive());
    }

    #[test]
    fn test_content_length_near_usize_max() {
        let raw = format!("POST /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX);
        let err = Request::read_from(&mut raw.as_bytes(), 4096).unwrap_err();
        assert!(matches!(err, ParseError::TooLarge(4096)));
    }

    #[test]
    fn test_invalid_method_and_version() {
        assert!(matches!(
            read(b"BREW / HTTP/1.1\r\n\r\n").unwrap_err(),
            ParseError::UnsupportedMethod(_)
        ));
        assert!(matches!(
            read(b"GET / HTTP/2.0\r\n\r\n").unwrap_err(),
            ParseError::InvalidHttpVersion(_)
        ));
        assert!(matches!(read(b"GET /\r\n\r\n").unwrap_err(), ParseError::InvalidRequestLine));
    }

    #[test]
    fn test_invalid_header() {
        let err = read(b"GET / HTTP/1.1\r\nnocolon\r\n\r\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidHeader(_)));
    }
}
