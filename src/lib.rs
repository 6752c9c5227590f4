//! # HTTP Application Server
//! src/lib.rs
//!
//! Núcleo de concurrencia y despacho de un servidor de aplicaciones HTTP:
//! listeners que aceptan conexiones, una cola acotada, un pool elástico de
//! workers, una tabla ordenada de mapeos URL → componente y un protocolo de
//! apagado capaz de detener varias instancias del mismo proceso a la vez.
//!
//! ## Arquitectura
//!
//! - `config`: CLI, archivo de configuración y parámetros tipados
//! - `dispatcher`: tabla ordenada (vhost, patrón) → componente
//! - `jobs`: conexiones aceptadas y la cola acotada con demanda ociosa
//! - `listener`: sockets de escucha, planos y TLS
//! - `worker`: threads que atienden los jobs
//! - `poller`: espera de conexiones keep-alive ociosas
//! - `supervisor`: orquestación de una instancia y escalado del pool
//! - `shutdown`: coordinador de apagado compartido entre instancias
//! - `daemon`: doble fork y pidfile
//! - `component`, `session`, `http`, `metrics`: colaboradores del núcleo
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use http_appserver::component::ComponentRegistry;
//! use http_appserver::config::ConfigFile;
//! use http_appserver::shutdown::ShutdownCoordinator;
//! use http_appserver::supervisor::Supervisor;
//!
//! let config = ConfigFile::parse("Listen 127.0.0.1 8080\nMapUrl ^/status$ status\n")?;
//! let coordinator = ShutdownCoordinator::new();
//! let mut server = Supervisor::from_config(&config, ComponentRegistry::with_builtins(), coordinator.clone())?;
//!
//! // desde otro thread (por ejemplo, un handler de señales):
//! // coordinator.request_shutdown();
//! server.run()?;
//! # Ok::<(), http_appserver::error::ServerError>(())
//! ```

pub mod component;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod jobs;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use error::{Result, ServerError};
