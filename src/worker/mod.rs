//! # Workers
//! src/worker/mod.rs
//!
//! Threads que consumen la cola de jobs:
//!
//! ```text
//! loop {
//!     job = queue.dequeue()      // None = cola cerrada y vacía → salir
//!     loop {
//!         request = leer cabecera
//!         for target in dispatcher.lookup(host, path) {
//!             componente.call() → Reply | Declined
//!         }
//!         escribir respuesta (404 si nadie respondió)
//!         keep-alive y ya hay otra petición → seguir
//!         keep-alive sin datos → poller.add_idle(job)
//!         si no → cerrar
//!     }
//! }
//! ```
//!
//! El [`WorkerSet`] lleva la cuenta de workers vivos (la lee el loop de
//! escalado y la espera de drenado) y qué está haciendo cada uno, para que
//! `maintenance` reporte peticiones que se eternizan.

use crate::component::{Call, ComponentRegistry, Outcome, StatsSource};
use crate::dispatcher::Dispatcher;
use crate::error::{Result, ServerError};
use crate::http::{ParseError, Request, Response, StatusCode};
use crate::jobs::Job;
use crate::metrics::{Metrics, PoolStats};
use crate::poller::KeepAlivePoller;
use crate::session::SessionStore;
use crate::shutdown::InstanceControl;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Identificador de worker dentro de su instancia
pub type WorkerId = usize;

/// Qué está haciendo un worker ocupado
#[derive(Debug, Clone)]
struct Busy {
    since: Instant,
    request: String,
    reported: bool,
}

/// Workers de una instancia
#[derive(Debug, Default)]
pub struct WorkerSet {
    live: AtomicUsize,
    next_id: AtomicUsize,
    busy: Mutex<HashMap<WorkerId, Busy>>,
}

/// Decrementa el contador al terminar el thread, también si hace panic
struct LiveGuard {
    set: Arc<WorkerSet>,
    id: WorkerId,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.set.busy.lock().remove(&self.id);
        self.set.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers vivos
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Workers atendiendo una petición
    pub fn busy_count(&self) -> usize {
        self.busy.lock().len()
    }

    /// Lanza un worker
    ///
    /// El contador sube antes de crear el thread, así el loop de escalado
    /// nunca ve menos workers de los que hay.
    pub fn spawn(self: &Arc<Self>, ctx: Arc<WorkerContext>) -> Result<WorkerId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.fetch_add(1, Ordering::SeqCst);

        let guard = LiveGuard {
            set: Arc::clone(self),
            id,
        };

        thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                let _guard = guard;
                run(id, &ctx);
            })
            .map_err(|source| ServerError::Spawn {
                what: format!("worker-{id}"),
                source,
            })?;

        Ok(id)
    }

    fn begin(&self, id: WorkerId, request: String) {
        self.busy.lock().insert(
            id,
            Busy {
                since: Instant::now(),
                request,
                reported: false,
            },
        );
    }

    fn end(&self, id: WorkerId) {
        self.busy.lock().remove(&id);
    }

    /// Reporta (una sola vez) cada petición que lleva más de `max_request_time`
    ///
    /// Devuelve cuántas se reportaron en esta pasada. No interrumpe nada.
    pub fn maintenance(&self, max_request_time: Duration, metrics: &Metrics) -> usize {
        let mut reported = 0;

        for (id, busy) in self.busy.lock().iter_mut() {
            let elapsed = busy.since.elapsed();
            if busy.reported || elapsed < max_request_time {
                continue;
            }

            busy.reported = true;
            reported += 1;
            metrics.record_overlong();
            tracing::warn!(
                worker = id,
                request = %busy.request,
                elapsed_ms = elapsed.as_millis() as u64,
                "petición excede MaxRequestTime"
            );
        }
        reported
    }
}

/// Lo que comparten todos los workers de una instancia
pub struct WorkerContext {
    pub control: Arc<InstanceControl>,
    pub dispatcher: Arc<Dispatcher>,
    pub components: Arc<ComponentRegistry>,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<Metrics>,
    pub workers: Arc<WorkerSet>,
    pub poller: Arc<KeepAlivePoller>,
    pub max_request_size: usize,

    /// Peticiones por conexión; 0 o 1 deshabilitan keep-alive
    pub keep_alive_max: usize,
}

impl StatsSource for WorkerContext {
    fn pool_stats(&self) -> PoolStats {
        let queue = self.control.queue();
        let limits = self.control.limits();
        PoolStats {
            live_workers: self.workers.live_count(),
            idle_workers: queue.waiting_worker_count(),
            queued_jobs: queue.len(),
            queue_capacity: queue.capacity(),
            idle_connections: self.poller.idle_count(),
            min_threads: limits.min,
            max_threads: limits.max,
            metrics: self.metrics.snapshot(),
        }
    }
}

impl WorkerContext {
    /// Resuelve la petición recorriendo los mapeos en orden
    ///
    /// Un componente desconocido o que declina pasa al siguiente mapeo.
    pub fn dispatch(&self, request: &Request) -> Response {
        let host = request.host();

        let targets = self.dispatcher.lookup(&host, request.path());
        for target in targets.iter() {
            let Some(component) = self.components.get(&target.component) else {
                tracing::debug!(component = %target.component, "componente no encontrado");
                continue;
            };

            let call = Call {
                request,
                target,
                sessions: &self.sessions,
                stats: self,
            };

            match panic::catch_unwind(AssertUnwindSafe(|| component.call(&call))) {
                Ok(Outcome::Reply(response)) => return response,
                Ok(Outcome::Declined) => {
                    tracing::trace!(component = %target.component, "componente declinó");
                }
                Err(_) => {
                    tracing::error!(component = %target.component, path = request.path(), "panic en componente");
                    self.metrics.record_error();
                    return Response::error(StatusCode::InternalServerError, "internal server error");
                }
            }
        }

        self.metrics.record_not_found();
        Response::error(StatusCode::NotFound, "not found")
    }

    /// Atiende un job: una o varias peticiones de la misma conexión
    ///
    /// Termina cerrando la conexión o entregándola ociosa al poller.
    fn handle(&self, id: WorkerId, mut job: Job) {
        loop {
            let request = match Request::read_buffered(&mut job.connection, &mut job.buffer, self.max_request_size) {
                Ok(request) => request,
                Err(ParseError::EmptyRequest) => {
                    tracing::trace!(peer = %job.peer, requests = job.requests, "conexión cerrada sin petición");
                    let _ = job.connection.close();
                    return;
                }
                Err(e) => {
                    tracing::debug!(peer = %job.peer, error = %e, "petición inválida");
                    self.metrics.record_error();
                    if let Some(status) = error_status(&e) {
                        let _ = Response::error(status, &e.to_string()).write_to(&mut job.connection);
                    }
                    let _ = job.connection.close();
                    return;
                }
            };
            job.requests += 1;

            self.workers.begin(id, format!("{} {}", request.method().as_str(), request.path()));
            let response = self.dispatch(&request);
            self.workers.end(id);

            let keep_alive = self.keep_alive_max > 1
                && job.requests < self.keep_alive_max
                && request.keep_alive()
                && !self.poller.is_stopped();

            tracing::debug!(
                peer = %job.peer,
                method = request.method().as_str(),
                path = request.path(),
                status = response.status().as_u16(),
                keep_alive,
                "petición atendida"
            );

            match response.write_with(&mut job.connection, keep_alive) {
                Ok(()) => self.metrics.record_completed(job.accepted_at.elapsed()),
                Err(e) => {
                    tracing::debug!(peer = %job.peer, error = %e, "error al escribir la respuesta");
                    self.metrics.record_error();
                    let _ = job.connection.close();
                    return;
                }
            }

            if !keep_alive {
                let _ = job.connection.close();
                return;
            }

            if job.has_pending_input() {
                job.touch();
                continue;
            }

            if let Err(mut job) = self.poller.add_idle(job) {
                let _ = job.connection.close();
            }
            return;
        }
    }
}

/// Respuesta para una petición que no se pudo leer (None = no responder)
fn error_status(e: &ParseError) -> Option<StatusCode> {
    match e {
        ParseError::TooLarge(_) => Some(StatusCode::RequestHeaderFieldsTooLarge),
        ParseError::UnsupportedMethod(_) => Some(StatusCode::NotImplemented),
        ParseError::Io(io) if matches!(io.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
            Some(StatusCode::RequestTimeout)
        }
        ParseError::Io(_) => None,
        _ => Some(StatusCode::BadRequest),
    }
}

/// Loop principal de un worker
fn run(id: WorkerId, ctx: &WorkerContext) {
    tracing::debug!(worker = id, "worker iniciado");

    while let Some(job) = ctx.control.queue().dequeue() {
        let peer = job.peer;
        if panic::catch_unwind(AssertUnwindSafe(|| ctx.handle(id, job))).is_err() {
            ctx.workers.end(id);
            ctx.metrics.record_error();
            tracing::error!(worker = id, peer = %peer, "panic atendiendo un job");
        }
    }

    tracing::debug!(worker = id, "worker terminado");
}
