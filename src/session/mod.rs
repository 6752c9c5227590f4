//! # Sesiones
//! src/session/mod.rs
//!
//! Almacén de sesiones en memoria. Los componentes lo usan por id de
//! sesión; el timer de cada instancia barre las que llevan más de
//! `SessionTimeout` sin acceso.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Session {
    values: HashMap<String, String>,
    last_access: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            values: HashMap::new(),
            last_access: now,
        }
    }
}

/// Sesiones de una instancia del servidor
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea la sesión si no existe y renueva su último acceso
    pub fn touch(&self, id: &str) {
        let now = Instant::now();
        self.sessions
            .lock()
            .entry(id.to_string())
            .and_modify(|s| s.last_access = now)
            .or_insert_with(|| Session::new(now));
    }

    /// Guarda un valor (crea la sesión si hace falta)
    pub fn set(&self, id: &str, key: &str, value: impl Into<String>) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(id.to_string()).or_insert_with(|| Session::new(now));
        session.last_access = now;
        session.values.insert(key.to_string(), value.into());
    }

    /// Lee un valor y renueva el acceso
    pub fn get(&self, id: &str, key: &str) -> Option<String> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id)?;
        session.last_access = Instant::now();
        session.values.get(key).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elimina las sesiones sin acceso en `timeout`; devuelve cuántas
    pub fn sweep_expired(&self, timeout: Duration) -> usize {
        self.sweep_expired_at(Instant::now(), timeout)
    }

    fn sweep_expired_at(&self, now: Instant, timeout: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| now.saturating_duration_since(s.last_access) < timeout);
        before - sessions.len()
    }
}
