//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Contadores del núcleo, actualizados desde listeners, workers, el timer
//! y el loop de escalado. Los contadores son atómicos; solo la ventana de
//! latencias usa un mutex.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Latencias que se guardan para calcular percentiles
const LATENCY_WINDOW: usize = 10_000;

/// Métricas de una instancia del servidor
#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,

    /// Conexiones aceptadas por los listeners
    accepted: AtomicU64,

    /// Peticiones respondidas
    completed: AtomicU64,

    /// Respuestas 404 (sin mapeo o todos los componentes declinaron)
    not_found: AtomicU64,

    /// Conexiones que terminaron en error (lectura, parseo, escritura)
    errors: AtomicU64,

    /// Workers creados por el loop de escalado
    workers_spawned: AtomicU64,

    /// Veces que se pidió crecer con el pool en el máximo
    saturation_events: AtomicU64,

    /// Peticiones reportadas por superar MaxRequestTime
    overlong_requests: AtomicU64,

    /// Sesiones expiradas por el timer
    sessions_expired: AtomicU64,

    /// Últimas latencias en microsegundos
    latencies: Mutex<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            accepted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            workers_spawned: AtomicU64::new(0),
            saturation_events: AtomicU64::new(0),
            overlong_requests: AtomicU64::new(0),
            sessions_expired: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Registra una petición respondida y su latencia
    pub fn record_completed(&self, latency: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);

        let mut latencies = self.latencies.lock();
        if latencies.len() >= LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency.as_micros() as u64);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saturation(&self) {
        self.saturation_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlong(&self) {
        self.overlong_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_expired(&self, count: usize) {
        self.sessions_expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copia consistente de los contadores
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, p99, avg) = {
            let latencies = self.latencies.lock();
            percentiles(latencies.iter().copied())
        };

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            saturation_events: self.saturation_events.load(Ordering::Relaxed),
            overlong_requests: self.overlong_requests.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            latency_p50_us: p50,
            latency_p95_us: p95,
            latency_p99_us: p99,
            latency_avg_us: avg,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// (p50, p95, p99, promedio)
fn percentiles(values: impl Iterator<Item = u64>) -> (u64, u64, u64, u64) {
    let mut sorted: Vec<u64> = values.collect();
    if sorted.is_empty() {
        return (0, 0, 0, 0);
    }
    sorted.sort_unstable();

    let len = sorted.len();
    let avg = sorted.iter().sum::<u64>() / len as u64;
    (sorted[len * 50 / 100], sorted[len * 95 / 100], sorted[len * 99 / 100], avg)
}

/// Snapshot serializable de los contadores
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub accepted: u64,
    pub completed: u64,
    pub not_found: u64,
    pub errors: u64,
    pub workers_spawned: u64,
    pub saturation_events: u64,
    pub overlong_requests: u64,
    pub sessions_expired: u64,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_avg_us: u64,
}

/// Estado del pool más los contadores (lo que sirve el componente `status`)
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub live_workers: usize,
    pub idle_workers: usize,
    pub queued_jobs: usize,
    pub queue_capacity: usize,
    /// Conexiones keep-alive esperando en el poller
    pub idle_connections: usize,
    pub min_threads: usize,
    pub max_threads: usize,
    pub metrics: MetricsSnapshot,
}
