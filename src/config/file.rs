//! # Archivo de Configuración
//! src/config/file.rs
//!
//! Lee el archivo de configuración del servidor: una lista ordenada de
//! entradas `Clave param1 param2 ...`, una por línea.
//!
//! ```text
//! # comentario
//! MinThreads 5
//! Listen 0.0.0.0 8000
//! MapUrl ^/hello$ "hello world@greet"
//! ```
//!
//! El orden de las entradas se conserva: el dispatcher depende de él.

use crate::error::{Result, ServerError};
use std::path::Path;
use std::str::FromStr;

/// Una entrada del archivo de configuración
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    /// Nombre de la directiva (ej: "MapUrl")
    pub key: String,

    /// Parámetros en el orden en que aparecen
    pub params: Vec<String>,

    /// Línea de origen (0 si la entrada se agregó por código)
    pub line: usize,
}

/// Configuración completa: entradas en orden de aparición
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    entries: Vec<ConfigEntry>,
}

impl ConfigFile {
    /// Crea una configuración vacía
    pub fn new() -> Self {
        Self::default()
    }

    /// Lee y parsea un archivo de configuración
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parsea el texto de configuración
    ///
    /// # Ejemplo
    /// ```
    /// use http_appserver::config::ConfigFile;
    ///
    /// let config = ConfigFile::parse("MaxThreads 20\nListen 127.0.0.1 8080\n").unwrap();
    /// assert_eq!(config.get("MaxThreads"), Some("20"));
    /// assert_eq!(config.values("Listen").count(), 1);
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let mut tokens = tokenize(raw).map_err(|reason| ServerError::ConfigSyntax { line, reason })?;

            if tokens.is_empty() {
                continue;
            }

            let key = tokens.remove(0);
            entries.push(ConfigEntry {
                key,
                params: tokens,
                line,
            });
        }

        Ok(Self { entries })
    }

    /// Agrega una entrada al final
    pub fn push<K, I, P>(&mut self, key: K, params: I) -> &mut Self
    where
        K: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.entries.push(ConfigEntry {
            key: key.into(),
            params: params.into_iter().map(Into::into).collect(),
            line: 0,
        });
        self
    }

    /// Todas las entradas, en orden
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Entradas con la clave indicada, en orden
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ConfigEntry> + 'a {
        self.entries.iter().filter(move |e| e.key == key)
    }

    /// Primer parámetro de la primera entrada con esa clave
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .and_then(|e| e.params.first())
            .map(String::as_str)
    }

    /// Valor tipado con default si la clave no existe
    ///
    /// Un valor presente pero no parseable es un error fatal.
    pub fn get_value<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ServerError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

/// Divide una línea en tokens respetando comillas dobles y escapes
fn tokenize(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| "dangling escape".to_string())?;
                current.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                in_token = true;
            }
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '#' if !quoted && !in_token => break,
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return Err("unterminated quote".to_string());
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
