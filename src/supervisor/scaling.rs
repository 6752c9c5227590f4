//! # Política de Escalado
//! src/supervisor/scaling.rs
//!
//! Límites del pool y la decisión de crecer, sin threads de por medio.
//!
//! - `min ≥ listeners + 1`: cada listener tiene garantizado un worker libre
//!   además de los que atienden tráfico.
//! - `max ≥ min`.
//!
//! Las violaciones se corrigen hacia arriba; nunca se rechazan.

/// Límites de workers de una instancia
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadLimits {
    pub min: usize,
    pub max: usize,
}

/// Ajustes hechos por [`ThreadLimits::clamp`], para loguearlos
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClampReport {
    /// Nuevo mínimo, si se subió
    pub min_raised_to: Option<usize>,

    /// Nuevo máximo, si se subió
    pub max_raised_to: Option<usize>,
}

impl ThreadLimits {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    /// Fija el mínimo respetando los listeners
    ///
    /// Devuelve el valor efectivo si hubo que corregir.
    ///
    /// ```
    /// use http_appserver::supervisor::ThreadLimits;
    ///
    /// let mut limits = ThreadLimits::new(5, 100);
    /// assert_eq!(limits.set_min(1, 1), Some(2));
    /// assert_eq!(limits.set_min(3, 1), None);
    /// assert_eq!(limits.min, 3);
    /// ```
    pub fn set_min(&mut self, n: usize, listeners: usize) -> Option<usize> {
        if n <= listeners {
            self.min = listeners + 1;
            Some(self.min)
        } else {
            self.min = n;
            None
        }
    }

    pub fn set_max(&mut self, n: usize) {
        self.max = n;
    }

    /// Aplica ambos invariantes
    pub fn clamp(&mut self, listeners: usize) -> ClampReport {
        let mut report = ClampReport::default();

        if self.min <= listeners {
            self.min = listeners + 1;
            report.min_raised_to = Some(self.min);
        }
        if self.max < self.min {
            self.max = self.min;
            report.max_raised_to = Some(self.max);
        }
        report
    }

    /// Límites de drenado: no se crea ningún worker más
    pub fn halt(&mut self) {
        self.min = 0;
        self.max = 0;
    }
}

/// Qué hacer ante una señal de demanda ociosa
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Crear exactamente un worker
    Spawn,

    /// El pool ya está en el máximo
    Saturated,
}

/// Decide si crecer a partir de los workers vivos y el techo
pub fn decide(live: usize, limits: ThreadLimits) -> ScaleDecision {
    if live < limits.max {
        ScaleDecision::Spawn
    } else {
        ScaleDecision::Saturated
    }
}

/// Recuerda si el pool ya estaba saturado, para avisar una sola vez por racha
#[derive(Debug, Default)]
pub struct SaturationEdge {
    saturated: bool,
}

impl SaturationEdge {
    /// Registra una decisión; `true` solo al entrar en saturación
    pub fn observe(&mut self, decision: ScaleDecision) -> bool {
        let was = self.saturated;
        self.saturated = decision == ScaleDecision::Saturated;
        self.saturated && !was
    }
}
