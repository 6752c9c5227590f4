//! # Timer de Mantenimiento
//! src/supervisor/timer.rs
//!
//! Un thread por instancia. En cada tick barre las sesiones vencidas y
//! corre el mantenimiento de workers. La espera se hace sobre la condición
//! del coordinador, así que el apagado lo despierta de inmediato.

use crate::error::{Result, ServerError};
use crate::metrics::Metrics;
use crate::session::SessionStore;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::WorkerSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Parámetros y dependencias del timer
pub struct TimerTask {
    pub interval: Duration,
    pub session_timeout: Duration,
    pub max_request_time: Duration,
    pub sessions: Arc<SessionStore>,
    pub workers: Arc<WorkerSet>,
    pub metrics: Arc<Metrics>,
    pub coordinator: ShutdownCoordinator,
}

impl TimerTask {
    /// Un tick de mantenimiento
    pub fn tick(&self) {
        let expired = self.sessions.sweep_expired(self.session_timeout);
        if expired > 0 {
            self.metrics.record_sessions_expired(expired);
            tracing::debug!(expired, "sesiones expiradas");
        }

        self.workers.maintenance(self.max_request_time, &self.metrics);
    }

    /// Corre hasta que el coordinador pida el apagado
    pub fn run(&self) {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "timer iniciado");

        while !self.coordinator.wait_timer_tick(self.interval) {
            self.tick();
        }

        tracing::debug!("timer terminado");
    }

    /// Lanza el thread del timer
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || self.run())
            .map_err(|source| ServerError::Spawn {
                what: "timer".to_string(),
                source,
            })
    }
}
