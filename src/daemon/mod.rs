//! # Daemonización
//! src/daemon/mod.rs
//!
//! Doble fork para desacoplarse de la terminal:
//!
//! ```text
//! original ──fork──► hijo intermedio ──setsid, fork──► sobreviviente (servidor)
//!    │                    │
//!    exit                 exit
//! ```
//!
//! El hijo intermedio suelta todos los listeners del registro del proceso
//! antes del segundo fork: los descriptores se duplican con cada fork y no
//! debe quedar ningún socket de escucha vivo fuera del servidor.
//!
//! La primitiva de fork está detrás del trait [`Fork`] para poder probar
//! la secuencia sin crear procesos.

use crate::error::{Result, ServerError};
use crate::listener::ListenerRegistry;
use std::io;
use std::path::Path;

/// Resultado de un fork, visto desde el proceso que continúa
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// Proceso padre, con el pid del hijo
    Parent(i32),

    /// Proceso hijo
    Child,
}

/// Operaciones de proceso que usa [`detach`]
pub trait Fork {
    fn fork(&self) -> io::Result<ForkResult>;
    fn setsid(&self) -> io::Result<()>;
}

/// `fork(2)` y `setsid(2)` reales
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcFork;

impl Fork for LibcFork {
    fn fork(&self) -> io::Result<ForkResult> {
        // SAFETY: se llama antes de crear threads; el hijo solo continúa
        // con la secuencia de detach y el arranque normal del servidor.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(ForkResult::Child),
            pid => Ok(ForkResult::Parent(pid)),
        }
    }

    fn setsid(&self) -> io::Result<()> {
        // SAFETY: setsid no recibe punteros ni toca memoria del proceso
        if unsafe { libc::setsid() } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Qué proceso lógico es el que volvió de [`detach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// Proceso que arrancó el servidor; debe terminar
    Original { child: i32 },

    /// Hijo intermedio; debe terminar
    Intermediate { child: i32 },

    /// Nieto desacoplado; sigue como servidor
    Survivor,
}

impl Detached {
    pub fn is_survivor(&self) -> bool {
        matches!(self, Detached::Survivor)
    }
}

/// Ejecuta el doble fork
pub fn detach(fork: &dyn Fork, listeners: &ListenerRegistry) -> Result<Detached> {
    if let ForkResult::Parent(child) = fork.fork().map_err(ServerError::Fork)? {
        return Ok(Detached::Original { child });
    }

    let released = listeners.release_all();
    if released > 0 {
        tracing::debug!(released, "listeners liberados en el hijo intermedio");
    }

    fork.setsid().map_err(ServerError::Fork)?;

    match fork.fork().map_err(ServerError::Fork)? {
        ForkResult::Parent(child) => Ok(Detached::Intermediate { child }),
        ForkResult::Child => Ok(Detached::Survivor),
    }
}

/// ¿El proceso corre con uid efectivo 0?
pub fn is_privileged() -> bool {
    // SAFETY: geteuid no falla ni recibe argumentos
    unsafe { libc::geteuid() == 0 }
}

/// Pid del proceso actual
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Escribe el pid en el archivo indicado
pub fn write_pidfile(path: &Path, pid: u32) -> Result<()> {
    std::fs::write(path, format!("{pid}\n"))?;
    tracing::debug!(path = %path.display(), pid, "pidfile escrito");
    Ok(())
}

/// Borra el pidfile; que no exista no es un error
pub fn remove_pidfile(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
