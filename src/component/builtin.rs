//! # Componentes Incluidos
//! src/component/builtin.rs
//!
//! - `status`: estado del pool y contadores en JSON.
//! - `echo`: devuelve lo que el dispatcher resolvió para la petición.

use super::{Call, Outcome};
use crate::http::{Response, StatusCode};
use serde_json::json;

/// Estado del pool
///
/// ```json
/// {"live_workers": 5, "idle_workers": 4, "queued_jobs": 0, ..., "metrics": {...}}
/// ```
pub fn status(call: &Call<'_>) -> Outcome {
    match serde_json::to_string(&call.stats.pool_stats()) {
        Ok(body) => Outcome::Reply(Response::json(&body)),
        Err(e) => Outcome::Reply(Response::error(StatusCode::InternalServerError, &e.to_string())),
    }
}

/// Eco del mapeo resuelto
///
/// Con `?decline` el componente declina y el worker prueba el siguiente
/// mapeo.
pub fn echo(call: &Call<'_>) -> Outcome {
    if call.request.query_param("decline").is_some() {
        return Outcome::Declined;
    }

    let body = json!({
        "method": call.request.method().as_str(),
        "path": call.request.path(),
        "query": call.request.query(),
        "host": call.request.host(),
        "component": call.target.component,
        "path_info": call.target.path_info,
        "args": call.target.args,
        "body": String::from_utf8_lossy(call.request.body()),
    });
    Outcome::Reply(Response::json(&body.to_string()))
}
