//! # Componentes
//! src/component/mod.rs
//!
//! Un componente atiende las peticiones que el dispatcher le asigna. El
//! núcleo no sabe nada de lo que hace: solo lo busca por identificador,
//! lo llama y escribe su respuesta.
//!
//! Un componente puede **declinar** la petición; el worker entonces prueba
//! el siguiente mapeo que coincida con la URL.
//!
//! ## Ejemplo
//!
//! ```
//! use http_appserver::component::{ComponentRegistry, Outcome};
//! use http_appserver::http::Response;
//!
//! let mut registry = ComponentRegistry::with_builtins();
//! registry.register("hello@greet", |_call: &http_appserver::component::Call<'_>| {
//!     Outcome::Reply(Response::text("hello"))
//! });
//! assert!(registry.get("hello@greet").is_some());
//! assert!(registry.get("status").is_some());
//! ```

pub mod builtin;

use crate::dispatcher::{Compident, MappedTarget};
use crate::http::{Request, Response};
use crate::metrics::PoolStats;
use crate::session::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Resultado de llamar a un componente
#[derive(Debug)]
pub enum Outcome {
    /// Respuesta a enviar al cliente
    Reply(Response),

    /// El componente no atiende esta petición
    Declined,
}

/// Fuente del estado del pool para componentes de diagnóstico
pub trait StatsSource {
    fn pool_stats(&self) -> PoolStats;
}

/// Todo lo que un componente recibe en una llamada
pub struct Call<'a> {
    pub request: &'a Request,
    pub target: &'a MappedTarget,
    pub sessions: &'a SessionStore,
    pub stats: &'a dyn StatsSource,
}

/// Unidad que atiende peticiones
pub trait Component: Send + Sync {
    fn call(&self, call: &Call<'_>) -> Outcome;
}

impl<F> Component for F
where
    F: Fn(&Call<'_>) -> Outcome + Send + Sync,
{
    fn call(&self, call: &Call<'_>) -> Outcome {
        self(call)
    }
}

/// Componentes disponibles, por identificador
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
    /// Registro vacío
    pub fn new() -> Self {
        Self::default()
    }

    /// Registro con `status` y `echo`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("status", builtin::status);
        registry.register("echo", builtin::echo);
        registry
    }

    /// Registra (o reemplaza) un componente
    pub fn register<C: Component + 'static>(&mut self, id: &str, component: C) -> &mut Self {
        self.components.insert(id.to_string(), Arc::new(component));
        self
    }

    /// Busca por identificador completo y, si no está, por nombre solo
    ///
    /// Así `status@cualquier-lib` encuentra el `status` incluido.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Component>> {
        if let Some(c) = self.components.get(id) {
            return Some(Arc::clone(c));
        }

        let ci = Compident::parse(id).ok()?;
        ci.library()?;
        self.components.get(ci.name()).cloned()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.components.keys().collect();
        ids.sort();
        f.debug_struct("ComponentRegistry").field("components", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;

    struct Fixed;

    impl Component for Fixed {
        fn call(&self, _call: &Call<'_>) -> Outcome {
            Outcome::Declined
        }
    }

    #[test]
    fn test_lookup_full_id_then_name() {
        let mut registry = ComponentRegistry::new();
        registry.register("index", Fixed);
        registry.register("index@site", |_: &Call<'_>| Outcome::Reply(Response::new(StatusCode::Ok)));

        assert!(registry.get("index@site").is_some());
        assert!(registry.get("index@other").is_some(), "cae al nombre sin librería");
        assert!(registry.get("missing").is_none());
        assert!(registry.get("missing@lib").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_builtins_present() {
        let registry = ComponentRegistry::with_builtins();
        assert!(registry.get("status").is_some());
        assert!(registry.get("echo@anything").is_some());
        assert!(!registry.is_empty());
    }
}
