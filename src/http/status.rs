//! # Códigos de Estado HTTP
//! src/http/status.rs
//!
//! Los códigos que el núcleo y los componentes incluidos necesitan emitir.

/// Códigos de estado soportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 200 OK
    Ok = 200,

    /// 204 No Content
    NoContent = 204,

    /// 400 Bad Request - petición malformada
    BadRequest = 400,

    /// 404 Not Found - ningún componente atendió la URL
    NotFound = 404,

    /// 405 Method Not Allowed
    MethodNotAllowed = 405,

    /// 408 Request Timeout - el cliente no terminó de enviar la cabecera
    RequestTimeout = 408,

    /// 431 Request Header Fields Too Large - se superó MaxRequestSize
    RequestHeaderFieldsTooLarge = 431,

    /// 500 Internal Server Error
    InternalServerError = 500,

    /// 501 Not Implemented - método desconocido
    NotImplemented = 501,

    /// 503 Service Unavailable - el servidor se está deteniendo
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// Valor numérico
    ///
    /// ```
    /// use http_appserver::http::StatusCode;
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Texto de razón estándar
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// ¿2xx?
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// ¿5xx?
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.as_u16())
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}
