//! # Poller de conexiones keep-alive
//! src/poller/mod.rs
//!
//! Cuando un worker termina una petición y la conexión queda abierta, no
//! se queda bloqueado leyendo: le entrega el job al poller y vuelve a la
//! cola. El poller espera en un solo thread a que alguna conexión ociosa
//! tenga datos y la reencola como un job nuevo.
//!
//! ```text
//! worker ──add_idle──► KeepAlivePoller ──legible──► JobQueue ──► worker
//!                            │
//!                            └── sin datos tras KeepAliveTimeout → cerrar
//! ```
//!
//! Al detenerse cierra todas las conexiones ociosas y rechaza las nuevas,
//! que el worker cierra él mismo.

use crate::jobs::{Job, JobQueue};
use parking_lot::Mutex;
use polling::{Event, Poller};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Jobs entregados por los workers, pendientes de registrar
#[derive(Default)]
struct Incoming {
    jobs: Vec<Job>,
    stopped: bool,
}

/// Conexión ociosa registrada en el poller
struct Idle {
    job: Job,
    deadline: Instant,
}

/// Espera datos en las conexiones keep-alive ociosas
pub struct KeepAlivePoller {
    poller: Poller,
    incoming: Mutex<Incoming>,
    queue: Arc<JobQueue>,
    timeout: Duration,
    idle: AtomicUsize,
}

impl KeepAlivePoller {
    pub fn new(queue: Arc<JobQueue>, timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            incoming: Mutex::new(Incoming::default()),
            queue,
            timeout,
            idle: AtomicUsize::new(0),
        })
    }

    /// Entrega una conexión ociosa
    ///
    /// Devuelve el job si el poller ya se detuvo; cerrarlo queda a cargo
    /// de quien llama.
    pub fn add_idle(&self, job: Job) -> Result<(), Job> {
        {
            let mut incoming = self.incoming.lock();
            if incoming.stopped {
                return Err(job);
            }
            incoming.jobs.push(job);
        }
        self.wake();
        Ok(())
    }

    /// Conexiones esperando datos
    pub fn idle_count(&self) -> usize {
        self.idle.load(Ordering::Relaxed) + self.incoming.lock().jobs.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.incoming.lock().stopped
    }

    /// Pide al thread del poller que termine
    pub fn stop(&self) {
        self.incoming.lock().stopped = true;
        self.wake();
    }

    fn wake(&self) {
        if let Err(e) = self.poller.notify() {
            tracing::error!(error = %e, "no se pudo despertar al poller");
        }
    }

    /// Lanza el thread del poller
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let poller = Arc::clone(self);
        thread::Builder::new().name("poller".to_string()).spawn(move || poller.run())
    }

    /// Loop del poller hasta `stop`
    pub fn run(&self) {
        tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "poller iniciado");

        let mut idle: HashMap<usize, Idle> = HashMap::new();
        let mut next_key = 0usize;
        let mut events: Vec<Event> = Vec::new();

        loop {
            let incoming = {
                let mut incoming = self.incoming.lock();
                if incoming.stopped {
                    break;
                }
                std::mem::take(&mut incoming.jobs)
            };

            for job in incoming {
                let key = next_key;
                next_key = next_key.wrapping_add(1);
                self.register(&mut idle, key, job);
            }

            self.expire(&mut idle);
            self.idle.store(idle.len(), Ordering::Relaxed);

            let now = Instant::now();
            let wait = idle.values().map(|i| i.deadline.saturating_duration_since(now)).min();

            events.clear();
            if let Err(e) = self.poller.wait(&mut events, wait) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                tracing::error!(error = %e, "error esperando conexiones ociosas");
                break;
            }

            for event in &events {
                if let Some(ready) = idle.remove(&event.key) {
                    self.requeue(ready.job);
                }
            }
        }

        let idle_closed = idle.len();
        let pending_closed = self.close_all(idle);
        self.idle.store(0, Ordering::Relaxed);
        tracing::debug!(closed = idle_closed + pending_closed, "poller detenido");
    }

    fn register(&self, idle: &mut HashMap<usize, Idle>, key: usize, mut job: Job) {
        // El socket queda registrado solo mientras el job vive en `idle`
        match self.poller.add(job.connection.tcp(), Event::readable(key)) {
            Ok(()) => {
                idle.insert(
                    key,
                    Idle {
                        job,
                        deadline: Instant::now() + self.timeout,
                    },
                );
            }
            Err(e) => {
                tracing::debug!(peer = %job.peer, error = %e, "no se pudo registrar la conexión ociosa");
                let _ = job.connection.close();
            }
        }
    }

    /// Cierra las conexiones sin actividad desde hace `timeout`
    fn expire(&self, idle: &mut HashMap<usize, Idle>) {
        let now = Instant::now();
        let expired: Vec<usize> = idle
            .iter()
            .filter(|(_, i)| i.deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(mut expired) = idle.remove(&key) {
                let _ = self.poller.delete(expired.job.connection.tcp());
                tracing::trace!(peer = %expired.job.peer, "keep-alive expirado");
                let _ = expired.job.connection.close();
            }
        }
    }

    /// Conexión con datos: vuelve a la cola
    fn requeue(&self, mut job: Job) {
        let _ = self.poller.delete(job.connection.tcp());
        job.touch();
        if let Err(mut job) = self.queue.enqueue(job) {
            let _ = job.connection.close();
        }
    }

    /// Cierra todo lo que quedó ocioso o pendiente; devuelve cuántas pendientes había
    fn close_all(&self, idle: HashMap<usize, Idle>) -> usize {
        for (_, mut i) in idle {
            let _ = self.poller.delete(i.job.connection.tcp());
            let _ = i.job.connection.close();
        }

        let pending = std::mem::take(&mut self.incoming.lock().jobs);
        let count = pending.len();
        for mut job in pending {
            let _ = job.connection.close();
        }
        count
    }
}

impl std::fmt::Debug for KeepAlivePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepAlivePoller")
            .field("timeout", &self.timeout)
            .field("idle", &self.idle_count())
            .finish()
    }
}
