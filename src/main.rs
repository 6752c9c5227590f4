//! # HTTP Application Server - Entry Point
//! src/main.rs
//!
//! 1. Lee CLI y variables de entorno
//! 2. Inicializa el logging
//! 3. Carga el archivo de configuración
//! 4. Opcionalmente se desacopla (doble fork) y escribe el pidfile
//! 5. Instala SIGINT/SIGTERM → apagado ordenado
//! 6. Corre el supervisor hasta el drenado completo

use clap::Parser;
use http_appserver::component::ComponentRegistry;
use http_appserver::config::{Config, ConfigFile};
use http_appserver::daemon::{self, Detached, LibcFork};
use http_appserver::error::{Result, ServerError};
use http_appserver::logging;
use http_appserver::shutdown::ShutdownCoordinator;
use http_appserver::supervisor::Supervisor;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread;

fn main() {
    let config = Config::parse();

    if let Err(e) = logging::init(&config.log_level, config.log_json) {
        eprintln!("Error fatal: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(&config) {
        tracing::error!(error = %e, "error fatal");
        eprintln!("Error fatal: {e}");
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<()> {
    let file = ConfigFile::load(&config.config)?;
    let coordinator = ShutdownCoordinator::new();

    if config.daemon {
        match daemon::detach(&LibcFork, coordinator.listeners())? {
            Detached::Original { child } | Detached::Intermediate { child } => {
                tracing::debug!(child, "proceso padre termina");
                std::process::exit(0);
            }
            Detached::Survivor => daemon::write_pidfile(&config.pidfile, daemon::current_pid())?,
        }
    }

    install_signal_handler(coordinator.clone())?;

    let mut supervisor = Supervisor::from_config(&file, ComponentRegistry::with_builtins(), coordinator)?;
    tracing::info!(config = %config.config.display(), "configuración cargada");

    let result = supervisor.run();

    if config.daemon {
        daemon::remove_pidfile(&config.pidfile)?;
    }
    result
}

/// Thread que convierte SIGINT/SIGTERM en un pedido de apagado
fn install_signal_handler(coordinator: ShutdownCoordinator) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                tracing::info!(signal, "señal recibida");
                coordinator.request_shutdown();
            }
        })
        .map_err(|source| ServerError::Spawn {
            what: "signals".to_string(),
            source,
        })?;

    Ok(())
}
