//! # Registro de Listeners del Proceso
//! src/listener/registry.rs
//!
//! Todos los listeners vivos del proceso, sin importar a qué supervisor
//! pertenecen. Existe para poder soltarlos de forma explícita en el hijo
//! intermedio de la daemonización.

use super::Listener;
use crate::jobs::ListenerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Registro compartido (clonar comparte el mismo mapa)
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<ListenerId, Arc<Listener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, listener: Arc<Listener>) {
        self.inner.lock().insert(listener.id(), listener);
    }

    pub fn remove(&self, id: ListenerId) -> Option<Arc<Listener>> {
        self.inner.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Vacía el registro marcando cada listener como detenido
    ///
    /// No se despierta a nadie: en el hijo de un fork no hay threads de
    /// accept. El socket se cierra al soltar la última referencia.
    pub fn release_all(&self) -> usize {
        let drained: Vec<_> = self.inner.lock().drain().map(|(_, l)| l).collect();
        let count = drained.len();

        for listener in drained {
            listener.mark_stopped();
            tracing::debug!(listener = listener.id(), addr = %listener.local_addr(), "listener liberado");
        }
        count
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry").field("len", &self.len()).finish()
    }
}
