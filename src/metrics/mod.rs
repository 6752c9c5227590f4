//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Contadores del servidor:
//! - Conexiones aceptadas y peticiones completadas (con latencias)
//! - 404 y errores de conexión
//! - Crecimiento del pool y eventos de saturación
//! - Peticiones largas y sesiones expiradas

pub mod collector;

pub use collector::{Metrics, MetricsSnapshot, PoolStats};
