//! # Logging
//! src/logging.rs
//!
//! Inicializa `tracing-subscriber` con un filtro tipo `EnvFilter` y salida
//! en texto o JSON.

use crate::error::{Result, ServerError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Instala el subscriber global
///
/// `filter` acepta la sintaxis de `EnvFilter` (ej: "info",
/// "http_appserver=debug,warn").
pub fn init(filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| ServerError::Logging(format!("invalid log level: {e}")))?;

    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_thread_names(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| ServerError::Logging(e.to_string()))
}
