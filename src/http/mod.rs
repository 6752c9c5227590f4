//! # Módulo HTTP
//! src/http/mod.rs
//!
//! Lo mínimo que un worker necesita para atender una conexión: leer la
//! petición, dejar que el dispatcher elija componente y escribir la
//! respuesta. Una petición por conexión, sin keep-alive.

pub mod request;
pub mod response;
pub mod status;

pub use request::{Method, ParseError, Request};
pub use response::Response;
pub use status::StatusCode;
