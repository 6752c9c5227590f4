//! # Dispatcher de URLs
//! src/dispatcher/mod.rs
//!
//! Tabla ordenada que mapea (virtual host, patrón de URL) → componente.
//!
//! ## Arquitectura
//!
//! ```text
//! (host, path) → Dispatcher → MappedTarget → Componente
//! ```
//!
//! Las entradas se recorren en orden de registro y **la primera que
//! coincide gana**; no hay ningún tipo de puntuación por especificidad.
//! La tabla se construye al configurar y después solo se lee, por eso se
//! comparte entre workers con un `Arc` sin locks.
//!
//! Las resoluciones se guardan en una [`UrlMapCache`] acotada
//! (`MaxUrlMapCache`) con su propio lock.
//!
//! Los patrones (y los vhosts) son expresiones regulares. El identificador
//! de componente y el path-info pueden referirse a grupos capturados de la
//! URL con `$1`, `$2`, ...

pub mod cache;

pub use cache::{UrlMapCache, DEFAULT_MAX_URL_MAP_CACHE};

use crate::config::ConfigFile;
use crate::error::{Result, ServerError};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::Arc;

/// Identificador de componente: `nombre` o `nombre@librería`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Compident {
    name: String,
    library: Option<String>,
}

impl Compident {
    /// Parsea un identificador
    ///
    /// Falla si el nombre está vacío o si hay un `@` sin librería.
    ///
    /// # Ejemplo
    /// ```
    /// use http_appserver::dispatcher::Compident;
    ///
    /// let ci = Compident::parse("index@site").unwrap();
    /// assert_eq!(ci.name(), "index");
    /// assert_eq!(ci.library(), Some("site"));
    /// assert!(Compident::parse("@site").is_err());
    /// ```
    pub fn parse(id: &str) -> Result<Self> {
        let (name, library) = match id.split_once('@') {
            Some((name, lib)) => (name, Some(lib)),
            None => (id, None),
        };

        if name.is_empty() || library.is_some_and(str::is_empty) {
            return Err(ServerError::InvalidCompident(id.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            library: library.map(str::to_string),
        })
    }

    /// Nombre del componente
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Librería que lo contiene, si se indicó
    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }
}

impl fmt::Display for Compident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.library {
            Some(lib) => write!(f, "{}@{}", self.name, lib),
            None => f.write_str(&self.name),
        }
    }
}

/// Destino de una entrada: componente, path-info y argumentos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTarget {
    component: String,
    path_info: Option<String>,
    args: Vec<String>,
}

impl MapTarget {
    /// Crea un destino validando el identificador de componente
    pub fn parse(component: &str) -> Result<Self> {
        Compident::parse(component)?;
        Ok(Self {
            component: component.to_string(),
            path_info: None,
            args: Vec::new(),
        })
    }

    /// Fija el path-info (puede contener `$n`)
    pub fn with_path_info(mut self, path_info: impl Into<String>) -> Self {
        self.path_info = Some(path_info.into());
        self
    }

    /// Fija la lista de argumentos
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Identificador tal como se configuró
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Path-info configurado
    pub fn path_info(&self) -> Option<&str> {
        self.path_info.as_deref()
    }

    /// Argumentos configurados
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Una entrada de la tabla. Inmutable una vez registrada.
#[derive(Debug, Clone)]
pub struct UrlMapEntry {
    vhost: String,
    vhost_regex: Option<Regex>,
    pattern: String,
    url_regex: Regex,
    target: MapTarget,
}

impl UrlMapEntry {
    fn new(vhost: &str, pattern: &str, target: MapTarget) -> Result<Self> {
        let vhost_regex = if vhost.is_empty() {
            None
        } else {
            Some(compile(vhost, true)?)
        };

        Ok(Self {
            vhost: vhost.to_string(),
            vhost_regex,
            pattern: pattern.to_string(),
            url_regex: compile(pattern, false)?,
            target,
        })
    }

    /// Virtual host ("" = cualquiera)
    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// Patrón de URL
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Destino configurado
    pub fn target(&self) -> &MapTarget {
        &self.target
    }

    fn matches_host(&self, host: &str) -> bool {
        self.vhost_regex.as_ref().map_or(true, |re| re.is_match(host))
    }

    /// Intenta resolver la URL contra esta entrada
    fn resolve(&self, index: usize, host: &str, path: &str) -> Option<MappedTarget> {
        if !self.matches_host(host) {
            return None;
        }

        let caps = self.url_regex.captures(path)?;

        let mut component = String::new();
        caps.expand(&self.target.component, &mut component);

        let path_info = match &self.target.path_info {
            Some(template) => {
                let mut expanded = String::new();
                caps.expand(template, &mut expanded);
                expanded
            }
            None => path.to_string(),
        };

        Some(MappedTarget {
            index,
            component,
            path_info,
            args: self.target.args.clone(),
        })
    }
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| ServerError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Resultado de resolver una URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedTarget {
    /// Posición de la entrada en la tabla
    pub index: usize,

    /// Identificador de componente, con `$n` ya expandidos
    pub component: String,

    /// Path-info (el path de la petición si no se configuró otro)
    pub path_info: String,

    /// Argumentos configurados
    pub args: Vec<String>,
}

/// Tabla ordenada de mapeos
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    entries: Vec<UrlMapEntry>,
    cache: UrlMapCache,
}

impl Dispatcher {
    /// Crea un dispatcher vacío
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega una entrada al final de la tabla
    ///
    /// # Ejemplo
    /// ```
    /// use http_appserver::dispatcher::{Dispatcher, MapTarget};
    ///
    /// let mut dispatcher = Dispatcher::new();
    /// dispatcher.add_entry("", "^/hello$", MapTarget::parse("hello@greet").unwrap()).unwrap();
    ///
    /// let target = dispatcher.resolve("localhost", "/hello").unwrap();
    /// assert_eq!(target.component, "hello@greet");
    /// ```
    pub fn add_entry(&mut self, vhost: &str, pattern: &str, target: MapTarget) -> Result<()> {
        let entry = UrlMapEntry::new(vhost, pattern, target)?;
        self.entries.push(entry);
        self.cache.clear();
        Ok(())
    }

    /// Atajo para un mapeo sin vhost, path-info ni argumentos
    pub fn map_url(&mut self, pattern: &str, component: &str) -> Result<()> {
        self.add_entry("", pattern, MapTarget::parse(component)?)
    }

    /// Primera entrada que coincide con host y path
    pub fn resolve(&self, host: &str, path: &str) -> Option<MappedTarget> {
        self.matches(host, path).next()
    }

    /// Todas las entradas que coinciden, en orden de registro
    ///
    /// El worker avanza a la siguiente cuando un componente declina.
    pub fn matches<'a>(&'a self, host: &'a str, path: &'a str) -> impl Iterator<Item = MappedTarget> + 'a {
        self.entries
            .iter()
            .enumerate()
            .filter_map(move |(index, entry)| entry.resolve(index, host, path))
    }

    /// Como [`Dispatcher::matches`], pasando por la caché
    pub fn lookup(&self, host: &str, path: &str) -> Arc<[MappedTarget]> {
        self.cache
            .get_or_insert_with(host, path, || self.matches(host, path).collect())
    }

    /// Cambia la capacidad de la caché (0 = sin caché); la vacía
    pub fn set_cache_limit(&mut self, max: usize) {
        self.cache = UrlMapCache::new(max);
    }

    pub fn cache(&self) -> &UrlMapCache {
        &self.cache
    }

    /// Entradas registradas
    pub fn entries(&self) -> &[UrlMapEntry] {
        &self.entries
    }

    /// Número de entradas
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// ¿Tabla vacía?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Carga las directivas `MapUrl` y `VMapUrl` en el dispatcher, en orden
///
/// ```text
/// MapUrl  <pattern> <component> [pathinfo] [args...]
/// VMapUrl <vhost> <pattern> <component> [pathinfo] [args...]
/// ```
pub fn configure_dispatcher(dispatcher: &mut Dispatcher, config: &ConfigFile) -> Result<()> {
    for entry in config.entries() {
        let (directive, vhost, rest) = match entry.key.as_str() {
            "MapUrl" => {
                if entry.params.len() < 2 {
                    return Err(ServerError::InvalidParamCount {
                        directive: "MapUrl",
                        count: entry.params.len(),
                    });
                }
                ("MapUrl", "", &entry.params[..])
            }
            "VMapUrl" => {
                if entry.params.len() < 3 {
                    return Err(ServerError::InvalidParamCount {
                        directive: "VMapUrl",
                        count: entry.params.len(),
                    });
                }
                ("VMapUrl", entry.params[0].as_str(), &entry.params[1..])
            }
            _ => continue,
        };

        let pattern = &rest[0];
        let mut target = MapTarget::parse(&rest[1])?;
        if let Some(path_info) = rest.get(2) {
            target = target.with_path_info(path_info.as_str());
        }
        if rest.len() > 3 {
            target = target.with_args(rest[3..].iter().cloned());
        }

        tracing::debug!(directive, vhost, pattern = %pattern, component = %target.component(), "mapeo registrado");
        dispatcher.add_entry(vhost, pattern, target)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher_from(text: &str) -> Result<Dispatcher> {
        let config = ConfigFile::parse(text).unwrap();
        let mut dispatcher = Dispatcher::new();
        configure_dispatcher(&mut dispatcher, &config)?;
        Ok(dispatcher)
    }

    // ==================== Compident ====================

    #[test]
    fn test_compident_plain_name() {
        let ci = Compident::parse("index").unwrap();
        assert_eq!(ci.name(), "index");
        assert_eq!(ci.library(), None);
        assert_eq!(ci.to_string(), "index");
    }

    #[test]
    fn test_compident_malformed() {
        assert!(Compident::parse("").is_err());
        assert!(Compident::parse("@lib").is_err());
        assert!(Compident::parse("comp@").is_err());
    }

    // ==================== Resolución ====================

    #[test]
    fn test_first_match_wins() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/api", "first").unwrap();
        dispatcher.map_url("^/api/users$", "second").unwrap();

        let target = dispatcher.resolve("", "/api/users").unwrap();
        assert_eq!(target.component, "first");
        assert_eq!(target.index, 0);
    }

    #[test]
    fn test_lookup_cached_and_invalidated() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/a", "first").unwrap();

        assert_eq!(dispatcher.lookup("h", "/a/x").len(), 1);
        assert_eq!(dispatcher.cache().len(), 1);
        assert_eq!(dispatcher.lookup("h", "/a/x")[0].component, "first");

        dispatcher.map_url("^/a", "second").unwrap();
        assert!(dispatcher.cache().is_empty());

        let targets = dispatcher.lookup("h", "/a/x");
        let names: Vec<_> = targets.iter().map(|t| t.component.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_cache_limit() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/", "echo").unwrap();
        dispatcher.set_cache_limit(0);
        dispatcher.lookup("h", "/x");
        assert!(dispatcher.cache().is_empty());
        assert_eq!(dispatcher.cache().max(), 0);
    }

    #[test]
    fn test_no_match() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/api$", "api").unwrap();
        assert!(dispatcher.resolve("", "/other").is_none());
    }

    #[test]
    fn test_matches_in_registration_order() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/a", "one").unwrap();
        dispatcher.map_url("^/b", "skip").unwrap();
        dispatcher.map_url(".*", "two").unwrap();

        let all: Vec<_> = dispatcher.matches("", "/a/x").map(|t| t.component).collect();
        assert_eq!(all, vec!["one", "two"]);
    }

    #[test]
    fn test_empty_vhost_matches_any_host() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/", "any").unwrap();
        assert!(dispatcher.resolve("example.com", "/").is_some());
        assert!(dispatcher.resolve("", "/").is_some());
    }

    #[test]
    fn test_vhost_filters_and_ignores_case() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .add_entry("^example\\.com$", "^/", MapTarget::parse("site").unwrap())
            .unwrap();
        dispatcher.map_url("^/", "fallback").unwrap();

        assert_eq!(dispatcher.resolve("Example.COM", "/x").unwrap().component, "site");
        assert_eq!(dispatcher.resolve("other.org", "/x").unwrap().component, "fallback");
    }

    #[test]
    fn test_backreferences_expand() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .add_entry(
                "",
                "^/app/([a-z]+)/(.*)$",
                MapTarget::parse("$1@app").unwrap().with_path_info("/$2"),
            )
            .unwrap();

        let target = dispatcher.resolve("", "/app/users/42").unwrap();
        assert_eq!(target.component, "users@app");
        assert_eq!(target.path_info, "/42");
    }

    #[test]
    fn test_path_info_defaults_to_path() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.map_url("^/x", "x").unwrap();
        assert_eq!(dispatcher.resolve("", "/x/y").unwrap().path_info, "/x/y");
    }

    #[test]
    fn test_invalid_pattern() {
        let mut dispatcher = Dispatcher::new();
        let err = dispatcher.map_url("^/(unclosed", "x").unwrap_err();
        assert!(matches!(err, ServerError::InvalidPattern { .. }));
        assert!(dispatcher.is_empty());
    }

    // ==================== Configuración ====================

    #[test]
    fn test_mapurl_too_few_params() {
        let err = dispatcher_from("MapUrl /hello\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid number of parameters (1) in MapUrl");
    }

    #[test]
    fn test_vmapurl_too_few_params() {
        let err = dispatcher_from("VMapUrl example.com /api\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid number of parameters (2) in VMapUrl");
    }

    #[test]
    fn test_vmapurl_full_entry() {
        let dispatcher =
            dispatcher_from("VMapUrl example.com /api svc pathinfo extra1 extra2\n").unwrap();

        assert_eq!(dispatcher.len(), 1);
        let entry = &dispatcher.entries()[0];
        assert_eq!(entry.vhost(), "example.com");
        assert_eq!(entry.pattern(), "/api");
        assert_eq!(entry.target().component(), "svc");
        assert_eq!(entry.target().path_info(), Some("pathinfo"));
        assert_eq!(entry.target().args(), ["extra1", "extra2"]);
    }

    #[test]
    fn test_mapurl_with_pathinfo_only() {
        let dispatcher = dispatcher_from("MapUrl ^/doc doc@site /index.html\n").unwrap();
        let entry = &dispatcher.entries()[0];
        assert_eq!(entry.vhost(), "");
        assert_eq!(entry.target().path_info(), Some("/index.html"));
        assert!(entry.target().args().is_empty());
    }

    #[test]
    fn test_configure_keeps_order_across_directives() {
        let dispatcher = dispatcher_from(
            "MapUrl ^/a a\nListen 0.0.0.0 80\nVMapUrl host ^/b b\nMapUrl ^/c c\n",
        )
        .unwrap();

        let comps: Vec<_> = dispatcher
            .entries()
            .iter()
            .map(|e| e.target().component().to_string())
            .collect();
        assert_eq!(comps, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_configure_rejects_malformed_component() {
        let err = dispatcher_from("MapUrl ^/a @lib\n").unwrap_err();
        assert!(matches!(err, ServerError::InvalidCompident(_)));
    }
}
