//! # Coordinador de Apagado
//! src/shutdown/mod.rs
//!
//! Un solo objeto compartido por todas las instancias del servidor que
//! deben detenerse juntas: una bandera de stop, la condición que despierta
//! a los timers y el registro de instancias vivas.
//!
//! ## Protocolo
//!
//! ```text
//! request_shutdown()
//!   1. stop = true (solo la primera llamada hace algo)
//!   2. despertar a todos los timers
//!   3. por cada instancia: min = max = 0 y señal de demanda ociosa
//! ```
//!
//! Cada supervisor, al despertar y ver la bandera, sale de su loop y drena.

use crate::jobs::JobQueue;
use crate::listener::ListenerRegistry;
use crate::supervisor::ThreadLimits;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Lo que el coordinador necesita de una instancia para detenerla
#[derive(Debug)]
pub struct InstanceControl {
    id: u64,
    queue: Arc<JobQueue>,
    limits: Mutex<ThreadLimits>,
}

impl InstanceControl {
    pub fn new(queue: Arc<JobQueue>, limits: ThreadLimits) -> Self {
        Self {
            id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            queue,
            limits: Mutex::new(limits),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Copia de los límites actuales
    pub fn limits(&self) -> ThreadLimits {
        *self.limits.lock()
    }

    /// Modifica los límites bajo el lock
    pub fn update_limits<R>(&self, f: impl FnOnce(&mut ThreadLimits) -> R) -> R {
        f(&mut self.limits.lock())
    }

    /// Bloquea el crecimiento y despierta al loop de escalado
    pub fn halt(&self) {
        self.limits.lock().halt();
        self.queue.signal_idle_demand();
    }
}

struct Inner {
    stop: AtomicBool,
    instances: Mutex<Vec<Arc<InstanceControl>>>,
    timer_lock: Mutex<()>,
    timer_wake: Condvar,
    listeners: ListenerRegistry,
}

/// Coordinador compartido; clonar comparte el mismo estado
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stop: AtomicBool::new(false),
                instances: Mutex::new(Vec::new()),
                timer_lock: Mutex::new(()),
                timer_wake: Condvar::new(),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    /// Pide el apagado de todas las instancias registradas
    ///
    /// Segura desde cualquier thread. Devuelve `true` solo en la llamada
    /// que hizo la transición.
    ///
    /// ```
    /// use http_appserver::shutdown::ShutdownCoordinator;
    ///
    /// let coordinator = ShutdownCoordinator::new();
    /// assert!(coordinator.request_shutdown());
    /// assert!(!coordinator.request_shutdown());
    /// assert!(coordinator.is_stopping());
    /// ```
    pub fn request_shutdown(&self) -> bool {
        if self
            .inner
            .stop
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        tracing::info!("apagado solicitado");

        {
            let _guard = self.inner.timer_lock.lock();
            self.inner.timer_wake.notify_all();
        }

        for instance in self.inner.instances.lock().iter() {
            instance.halt();
        }
        true
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Registra una instancia
    ///
    /// Si el apagado ya estaba en curso, la instancia se detiene de inmediato.
    pub fn register(&self, instance: Arc<InstanceControl>) {
        self.inner.instances.lock().push(Arc::clone(&instance));

        if self.is_stopping() {
            instance.halt();
        }
    }

    pub fn deregister(&self, id: u64) {
        self.inner.instances.lock().retain(|i| i.id() != id);
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.lock().len()
    }

    /// Espera un tick del timer
    ///
    /// Devuelve `true` si hay que terminar; el apagado corta la espera.
    pub fn wait_timer_tick(&self, interval: Duration) -> bool {
        let mut guard = self.inner.timer_lock.lock();
        if self.is_stopping() {
            return true;
        }
        self.inner.timer_wake.wait_for(&mut guard, interval);
        self.is_stopping()
    }

    /// Registro de listeners del proceso
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("stopping", &self.is_stopping())
            .field("instances", &self.instance_count())
            .finish()
    }
}
