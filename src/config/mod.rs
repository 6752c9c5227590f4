//! # Configuración del Servidor
//! src/config/mod.rs
//!
//! Dos niveles de configuración:
//!
//! - [`Config`]: argumentos CLI y variables de entorno (dónde está el archivo
//!   de configuración, modo daemon, logging).
//! - [`ConfigFile`] + [`Settings`]: el archivo de configuración del servidor
//!   con sus directivas (`MinThreads`, `Listen`, `MapUrl`, ...).
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./http_appserver -c ./appserver.conf --log-level debug
//! ./http_appserver -c /etc/appserver.conf --daemon --pidfile /run/appserver.pid
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! APPSERVER_CONF=./appserver.conf APPSERVER_LOG=debug ./http_appserver
//! ```

pub mod file;
pub mod settings;

pub use file::{ConfigEntry, ConfigFile};
pub use settings::Settings;

use clap::Parser;
use std::path::PathBuf;

/// Archivo de configuración por defecto
pub const DEFAULT_CONFIG_PATH: &str = "/etc/appserver.conf";

/// Archivo de PID por defecto en modo daemon
pub const DEFAULT_PID_PATH: &str = "/var/run/appserver.pid";

/// Argumentos de línea de comandos
#[derive(Debug, Clone, Parser)]
#[command(name = "http_appserver")]
#[command(about = "Servidor de aplicaciones HTTP con pool elástico de workers")]
#[command(version)]
pub struct Config {
    /// Archivo de configuración del servidor
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "APPSERVER_CONF")]
    pub config: PathBuf,

    /// Desacoplarse de la terminal (doble fork)
    #[arg(short, long, env = "APPSERVER_DAEMON")]
    pub daemon: bool,

    /// Archivo de PID (solo en modo daemon)
    #[arg(long, default_value = DEFAULT_PID_PATH, env = "APPSERVER_PIDFILE")]
    pub pidfile: PathBuf,

    /// Filtro de logging (ej: "info", "http_appserver=debug")
    #[arg(long = "log-level", default_value = "info", env = "APPSERVER_LOG")]
    pub log_level: String,

    /// Emitir logs en formato JSON
    #[arg(long = "log-json", env = "APPSERVER_LOG_JSON")]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            daemon: false,
            pidfile: PathBuf::from(DEFAULT_PID_PATH),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}
