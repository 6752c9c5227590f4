//! # Parámetros Tipados
//! src/config/settings.rs
//!
//! Valores numéricos que el núcleo lee de la configuración, con sus
//! defaults. Las directivas con estructura propia (Listen, MapUrl, ...) se
//! procesan en el supervisor y en el dispatcher.

use super::file::ConfigFile;
use crate::dispatcher::DEFAULT_MAX_URL_MAP_CACHE;
use crate::error::{Result, ServerError};
use std::time::Duration;

/// Workers iniciales por defecto
pub const DEFAULT_MIN_THREADS: usize = 5;

/// Techo de workers por defecto
pub const DEFAULT_MAX_THREADS: usize = 100;

/// Pausa (ms) tras cada worker creado por demanda
pub const DEFAULT_THREAD_START_DELAY_MS: u64 = 10;

/// Intervalo (ms) del timer de mantenimiento
pub const DEFAULT_TIMER_SLEEP_MS: u64 = 10;

/// Capacidad de la cola de jobs
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Segundos de inactividad antes de expirar una sesión
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

/// Backlog del socket de escucha
pub const DEFAULT_LISTEN_BACKLOG: i32 = 64;

/// Reintentos de bind cuando la dirección está en uso
pub const DEFAULT_LISTEN_RETRY: u32 = 5;

/// Segundos tras los que el mantenimiento reporta una petición
pub const DEFAULT_MAX_REQUEST_TIME_SECS: u64 = 600;

/// Timeout (ms) de lectura/escritura en conexiones aceptadas
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 10_000;

/// Tamaño máximo de la cabecera de una petición
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Milisegundos que una conexión keep-alive puede quedar ociosa
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: u64 = 15_000;

/// Peticiones por conexión keep-alive
pub const DEFAULT_KEEP_ALIVE_MAX: usize = 1000;

/// Parámetros del servidor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Workers que se crean al arrancar
    pub min_threads: usize,

    /// Máximo de workers vivos
    pub max_threads: usize,

    /// Pausa tras crear un worker por demanda
    pub thread_start_delay: Duration,

    /// Intervalo del timer
    pub timer_sleep: Duration,

    /// Capacidad de la cola (0 = sin límite)
    pub queue_size: usize,

    /// Expiración de sesiones
    pub session_timeout: Duration,

    /// Backlog de listen()
    pub listen_backlog: i32,

    /// Reintentos de bind
    pub listen_retry: u32,

    /// Umbral para reportar peticiones largas
    pub max_request_time: Duration,

    /// Timeout de lectura del socket
    pub socket_read_timeout: Duration,

    /// Timeout de escritura del socket
    pub socket_write_timeout: Duration,

    /// Tamaño máximo de la cabecera HTTP
    pub max_request_size: usize,

    /// Tiempo ocioso máximo de una conexión keep-alive
    pub keep_alive_timeout: Duration,

    /// Peticiones por conexión (0 o 1 = sin keep-alive)
    pub keep_alive_max: usize,

    /// Capacidad de la caché de resoluciones (0 = sin caché)
    pub max_url_map_cache: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_threads: DEFAULT_MIN_THREADS,
            max_threads: DEFAULT_MAX_THREADS,
            thread_start_delay: Duration::from_millis(DEFAULT_THREAD_START_DELAY_MS),
            timer_sleep: Duration::from_millis(DEFAULT_TIMER_SLEEP_MS),
            queue_size: DEFAULT_QUEUE_SIZE,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            listen_retry: DEFAULT_LISTEN_RETRY,
            max_request_time: Duration::from_secs(DEFAULT_MAX_REQUEST_TIME_SECS),
            socket_read_timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            socket_write_timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            keep_alive_timeout: Duration::from_millis(DEFAULT_KEEP_ALIVE_TIMEOUT_MS),
            keep_alive_max: DEFAULT_KEEP_ALIVE_MAX,
            max_url_map_cache: DEFAULT_MAX_URL_MAP_CACHE,
        }
    }
}

impl Settings {
    /// Lee los parámetros de la configuración, usando defaults donde falten
    pub fn from_config(config: &ConfigFile) -> Result<Self> {
        let d = Self::default();

        Ok(Self {
            min_threads: config.get_value("MinThreads", d.min_threads)?,
            max_threads: config.get_value("MaxThreads", d.max_threads)?,
            thread_start_delay: millis(config, "ThreadStartDelay", d.thread_start_delay)?,
            timer_sleep: positive_millis(config, "TimerSleep", d.timer_sleep)?,
            queue_size: config.get_value("QueueSize", d.queue_size)?,
            session_timeout: secs(config, "SessionTimeout", d.session_timeout)?,
            listen_backlog: config.get_value("ListenBacklog", d.listen_backlog)?,
            listen_retry: config.get_value("ListenRetry", d.listen_retry)?,
            max_request_time: secs(config, "MaxRequestTime", d.max_request_time)?,
            socket_read_timeout: millis(config, "SocketReadTimeout", d.socket_read_timeout)?,
            socket_write_timeout: millis(config, "SocketWriteTimeout", d.socket_write_timeout)?,
            max_request_size: config.get_value("MaxRequestSize", d.max_request_size)?,
            keep_alive_timeout: millis(config, "KeepAliveTimeout", d.keep_alive_timeout)?,
            keep_alive_max: config.get_value("KeepAliveMax", d.keep_alive_max)?,
            max_url_map_cache: config.get_value("MaxUrlMapCache", d.max_url_map_cache)?,
        })
    }
}

fn millis(config: &ConfigFile, key: &str, default: Duration) -> Result<Duration> {
    let ms = config.get_value(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

/// Como `millis`, pero 0 es un error
fn positive_millis(config: &ConfigFile, key: &str, default: Duration) -> Result<Duration> {
    let value = millis(config, key, default)?;
    if value.is_zero() {
        return Err(ServerError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn secs(config: &ConfigFile, key: &str, default: Duration) -> Result<Duration> {
    let s = config.get_value(key, default.as_secs())?;
    Ok(Duration::from_secs(s))
}
