//! # Errores del Servidor
//! src/error.rs
//!
//! Un único tipo de error para todo el crate. Los errores de configuración
//! son fatales: abortan la construcción antes de arrancar nada.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errores que pueden ocurrir al configurar o arrancar el servidor
#[derive(Error, Debug)]
pub enum ServerError {
    /// MapUrl / VMapUrl con menos parámetros de los requeridos
    #[error("invalid number of parameters ({count}) in {directive}")]
    InvalidParamCount {
        /// Directiva afectada ("MapUrl" o "VMapUrl")
        directive: &'static str,
        /// Número de parámetros recibidos
        count: usize,
    },

    /// Listen / SslListen sin parámetros
    #[error("empty {0}-entry")]
    EmptyListen(&'static str),

    /// Puerto no numérico
    #[error("invalid port {0}")]
    InvalidPort(String),

    /// Listener TLS sin certificado resoluble
    #[error("Ssl-certificate not configured")]
    SslCertificateMissing,

    /// Identificador de componente malformado
    #[error("invalid component identifier '{0}'")]
    InvalidCompident(String),

    /// Patrón de URL o vhost que no compila
    #[error("invalid url pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Patrón tal cual aparece en la configuración
        pattern: String,
        /// Error del compilador de regex
        #[source]
        source: regex::Error,
    },

    /// Valor de configuración que no se puede interpretar
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Clave de configuración
        key: String,
        /// Valor recibido
        value: String,
    },

    /// Línea del archivo de configuración mal formada
    #[error("syntax error in configuration line {line}: {reason}")]
    ConfigSyntax {
        /// Número de línea (1-based)
        line: usize,
        /// Descripción del problema
        reason: String,
    },

    /// No se pudo leer el archivo de configuración
    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        /// Ruta del archivo
        path: PathBuf,
        /// Error de E/S subyacente
        #[source]
        source: io::Error,
    },

    /// Dirección de escucha que no se puede resolver
    #[error("cannot resolve listen address {0}")]
    Address(String),

    /// Se agotaron los reintentos de bind
    #[error("failed to bind {addr} after {attempts} attempts: {source}")]
    Bind {
        /// Dirección solicitada
        addr: String,
        /// Intentos realizados
        attempts: u32,
        /// Último error
        #[source]
        source: io::Error,
    },

    /// Error al preparar certificados o la configuración TLS
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// No se pudo crear un thread
    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        /// Qué thread se intentaba crear
        what: String,
        /// Error del sistema
        #[source]
        source: io::Error,
    },

    /// fork() o setsid() fallaron
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),

    /// Error al inicializar el logging
    #[error("logging setup failed: {0}")]
    Logging(String),

    /// Cualquier otro error de E/S
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Alias de resultado usado en todo el crate
pub type Result<T> = std::result::Result<T, ServerError>;
