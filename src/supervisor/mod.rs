//! # Supervisor
//! src/supervisor/mod.rs
//!
//! Orquesta una instancia del servidor: sus listeners, el dispatcher, la
//! cola de jobs, el pool de workers y el timer.
//!
//! ## Arquitectura
//!
//! ```text
//!  Listener ─┐                          ┌─ Worker
//!  Listener ─┼─► JobQueue (acotada) ────┼─ Worker
//!  Listener ─┘        │                 └─ Worker ... (min..max)
//!                     │ demanda ociosa
//!                     ▼
//!              loop de escalado (run)  ──► +1 worker, pausa ThreadStartDelay
//! ```
//!
//! El pool solo crece: ningún worker se retira antes del apagado. Las
//! conexiones keep-alive ociosas esperan en el [`KeepAlivePoller`], que las
//! devuelve a la cola cuando llega otra petición.
//!
//! ## Apagado
//!
//! Cuando el [`ShutdownCoordinator`] pide el apagado, `run` sale del loop,
//! detiene los listeners, detiene el poller (cierra las conexiones
//! ociosas), cierra la cola (los workers drenan lo pendiente y terminan),
//! detiene el timer y espera a que no quede ningún worker.

pub mod scaling;
pub mod timer;

pub use scaling::{decide, ClampReport, SaturationEdge, ScaleDecision, ThreadLimits};
pub use timer::TimerTask;

use crate::component::ComponentRegistry;
use crate::config::{ConfigFile, Settings};
use crate::daemon;
use crate::dispatcher::{configure_dispatcher, Dispatcher};
use crate::error::{Result, ServerError};
use crate::jobs::JobQueue;
use crate::listener::{BindOptions, Listener, ListenerEndpoint};
use crate::metrics::Metrics;
use crate::poller::KeepAlivePoller;
use crate::session::SessionStore;
use crate::shutdown::{InstanceControl, ShutdownCoordinator};
use crate::worker::{WorkerContext, WorkerSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Intervalo de sondeo mientras se espera que terminen los workers
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Threads auxiliares de una instancia en marcha
#[derive(Default)]
struct Threads {
    accept: Vec<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

/// Una instancia del servidor
pub struct Supervisor {
    settings: Settings,
    dispatcher: Arc<Dispatcher>,
    components: Arc<ComponentRegistry>,
    listeners: Vec<Arc<Listener>>,
    sessions: Arc<SessionStore>,
    metrics: Arc<Metrics>,
    workers: Arc<WorkerSet>,
    control: Arc<InstanceControl>,
    coordinator: ShutdownCoordinator,
    privileged: bool,
}

impl Supervisor {
    /// Instancia sin listeners ni mapeos
    pub fn new(settings: Settings, components: ComponentRegistry, coordinator: ShutdownCoordinator) -> Self {
        let queue = Arc::new(JobQueue::new(settings.queue_size));
        let limits = ThreadLimits::new(settings.min_threads, settings.max_threads);
        let mut dispatcher = Dispatcher::new();
        dispatcher.set_cache_limit(settings.max_url_map_cache);

        Self {
            dispatcher: Arc::new(dispatcher),
            components: Arc::new(components),
            listeners: Vec::new(),
            sessions: Arc::new(SessionStore::new()),
            metrics: Arc::new(Metrics::new()),
            workers: Arc::new(WorkerSet::new()),
            control: Arc::new(InstanceControl::new(queue, limits)),
            coordinator,
            privileged: daemon::is_privileged(),
            settings,
        }
    }

    /// Construye la instancia desde la configuración
    ///
    /// Orden: parámetros, `SetEnv`, mapeos, `Listen`, `SslListen`. Cualquier
    /// error es fatal y ningún listener queda abierto.
    pub fn from_config(
        config: &ConfigFile,
        components: ComponentRegistry,
        coordinator: ShutdownCoordinator,
    ) -> Result<Self> {
        let settings = Settings::from_config(config)?;
        let mut supervisor = Self::new(settings, components, coordinator);

        for entry in config.values("SetEnv") {
            match entry.params.as_slice() {
                [name, value, ..] => {
                    tracing::debug!(name = %name, value = %value, "SetEnv");
                    std::env::set_var(name, value);
                }
                _ => tracing::debug!(line = entry.line, "SetEnv incompleto, ignorado"),
            }
        }

        configure_dispatcher(supervisor.dispatcher_mut(), config)?;

        for entry in config.values("Listen") {
            let endpoint = ListenerEndpoint::from_listen(&entry.params)?;
            supervisor.add_listener(endpoint)?;
        }

        for entry in config.values("SslListen") {
            let endpoint = ListenerEndpoint::from_ssl_listen(&entry.params, config)?;
            supervisor.add_listener(endpoint)?;
        }

        Ok(supervisor)
    }

    /// Agrega un listener sin TLS
    pub fn listen(&mut self, ip: &str, port: u16) -> Result<()> {
        self.add_listener(ListenerEndpoint::plain(ip, port))
    }

    /// Agrega un listener TLS
    ///
    /// Sin soporte TLS compilado, el listener se omite y se loguea.
    pub fn ssl_listen(&mut self, ip: &str, port: u16, certificate: &str, key: &str) -> Result<()> {
        if certificate.is_empty() {
            return Err(ServerError::SslCertificateMissing);
        }

        let key = if key.is_empty() { certificate } else { key };
        self.add_listener(ListenerEndpoint {
            ip: ip.to_string(),
            port,
            tls: Some(crate::listener::TlsFiles {
                certificate: PathBuf::from(certificate),
                key: PathBuf::from(key),
            }),
        })
    }

    fn add_listener(&mut self, endpoint: ListenerEndpoint) -> Result<()> {
        if endpoint.is_secure() && !cfg!(feature = "tls") {
            tracing::error!(addr = %endpoint, "SslListen ignorado: compilado sin soporte TLS");
            return Ok(());
        }

        let listener = Arc::new(Listener::bind(endpoint, BindOptions::from(&self.settings))?);
        self.coordinator.listeners().insert(Arc::clone(&listener));
        self.listeners.push(listener);
        Ok(())
    }

    /// Fija el mínimo de workers (al menos un worker más que listeners)
    pub fn set_min_threads(&mut self, n: usize) {
        let listeners = self.listeners.len();
        if let Some(min) = self.control.update_limits(|l| l.set_min(n, listeners)) {
            tracing::warn!("at least one more worker than listeners needed - set MinThreads to {min}");
        }
    }

    pub fn set_max_threads(&mut self, n: usize) {
        self.control.update_limits(|l| l.set_max(n));
    }

    /// Tratar al proceso como privilegiado (o no) al elegir el listener implícito
    pub fn set_privileged(&mut self, privileged: bool) {
        self.privileged = privileged;
    }

    /// Dispatcher para agregar mapeos antes de `run`
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        Arc::make_mut(&mut self.dispatcher)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn limits(&self) -> ThreadLimits {
        self.control.limits()
    }

    pub fn listeners(&self) -> &[Arc<Listener>] {
        &self.listeners
    }

    /// Direcciones efectivas de los listeners
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        self.control.queue()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn workers(&self) -> &Arc<WorkerSet> {
        &self.workers
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    /// Listener implícito y ajuste de límites, antes de lanzar threads
    pub fn prepare(&mut self) -> Result<ThreadLimits> {
        if self.listeners.is_empty() {
            let endpoint = ListenerEndpoint::default_endpoint(self.privileged);
            tracing::info!(addr = %endpoint, "sin listeners configurados, usando el implícito");
            self.add_listener(endpoint)?;
        }

        let listeners = self.listeners.len();
        let report = self.control.update_limits(|l| l.clamp(listeners));

        if let Some(min) = report.min_raised_to {
            tracing::warn!("at least one more worker than listeners needed - set MinThreads to {min}");
        }
        if let Some(max) = report.max_raised_to {
            tracing::warn!("MaxThreads < MinThreads - set MaxThreads = MinThreads = {max}");
        }

        Ok(self.control.limits())
    }

    /// Corre la instancia hasta que el coordinador pida el apagado
    ///
    /// Devuelve cuando todos los workers terminaron. Una instancia se
    /// corre una sola vez.
    pub fn run(&mut self) -> Result<()> {
        let limits = self.prepare()?;

        let poller = KeepAlivePoller::new(Arc::clone(self.queue()), self.settings.keep_alive_timeout)?;
        let ctx = Arc::new(WorkerContext {
            control: Arc::clone(&self.control),
            dispatcher: Arc::clone(&self.dispatcher),
            components: Arc::clone(&self.components),
            sessions: Arc::clone(&self.sessions),
            metrics: Arc::clone(&self.metrics),
            workers: Arc::clone(&self.workers),
            poller: Arc::new(poller),
            max_request_size: self.settings.max_request_size,
            keep_alive_max: self.settings.keep_alive_max,
        });

        tracing::info!(
            min_threads = limits.min,
            max_threads = limits.max,
            listeners = self.listeners.len(),
            mappings = self.dispatcher.len(),
            keep_alive_max = self.settings.keep_alive_max,
            "iniciando instancia"
        );

        let mut threads = Threads::default();
        if let Err(e) = self.start_threads(&ctx, limits.min, &mut threads) {
            self.teardown(threads, &ctx.poller);
            return Err(e);
        }

        self.coordinator.register(Arc::clone(&self.control));
        self.scaling_loop(&ctx);
        self.teardown(threads, &ctx.poller);

        Ok(())
    }

    /// Workers iniciales, el poller, un thread de accept por listener y el timer
    fn start_threads(&self, ctx: &Arc<WorkerContext>, min_threads: usize, threads: &mut Threads) -> Result<()> {
        threads.poller = Some(ctx.poller.spawn().map_err(|source| ServerError::Spawn {
            what: "poller".to_string(),
            source,
        })?);

        for _ in 0..min_threads {
            self.workers.spawn(Arc::clone(ctx))?;
        }

        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            let queue = Arc::clone(self.queue());
            let metrics = Arc::clone(&self.metrics);

            let handle = thread::Builder::new()
                .name(format!("listener-{}", listener.id()))
                .spawn(move || listener.run_accept_loop(&queue, &metrics))
                .map_err(|source| ServerError::Spawn {
                    what: "listener".to_string(),
                    source,
                })?;
            threads.accept.push(handle);
        }

        let timer = TimerTask {
            interval: self.settings.timer_sleep,
            session_timeout: self.settings.session_timeout,
            max_request_time: self.settings.max_request_time,
            sessions: Arc::clone(&self.sessions),
            workers: Arc::clone(&self.workers),
            metrics: Arc::clone(&self.metrics),
            coordinator: self.coordinator.clone(),
        }
        .spawn()?;
        threads.timer = Some(timer);
        Ok(())
    }

    /// Crece el pool ante la demanda ociosa hasta que se pida el apagado
    fn scaling_loop(&self, ctx: &Arc<WorkerContext>) {
        let mut edge = SaturationEdge::default();
        loop {
            self.queue().wait_idle_demand();

            if self.coordinator.is_stopping() {
                break;
            }

            let live = self.workers.live_count();
            let decision = decide(live, self.control.limits());
            let entered_saturation = edge.observe(decision);
            match decision {
                ScaleDecision::Spawn => {
                    match self.workers.spawn(Arc::clone(ctx)) {
                        Ok(id) => {
                            self.metrics.record_worker_spawned();
                            tracing::info!(worker = id, live = live + 1, "create workerthread");
                        }
                        Err(e) => tracing::error!(error = %e, "no se pudo crear el worker"),
                    }
                    thread::sleep(self.settings.thread_start_delay);
                }
                ScaleDecision::Saturated => {
                    self.metrics.record_saturation();
                    if entered_saturation {
                        tracing::info!(live, "max worker-threadcount reached");
                    }
                }
            }
        }
    }

    /// Detiene listeners y poller, drena la cola, detiene el timer y espera a los workers
    fn teardown(&mut self, threads: Threads, poller: &KeepAlivePoller) {
        tracing::info!("deteniendo instancia");
        self.coordinator.deregister(self.control.id());

        for listener in self.listeners.drain(..) {
            self.coordinator.listeners().remove(listener.id());
            listener.stop();
        }
        for handle in threads.accept {
            if handle.join().is_err() {
                tracing::error!("thread de accept terminó con panic");
            }
        }

        poller.stop();
        if let Some(handle) = threads.poller {
            if handle.join().is_err() {
                tracing::error!("thread del poller terminó con panic");
            }
        }

        self.queue().close();

        if let Some(timer) = threads.timer {
            if timer.join().is_err() {
                tracing::error!("thread del timer terminó con panic");
            }
        }

        while self.workers.live_count() > 0 {
            thread::sleep(DRAIN_POLL_INTERVAL);
        }

        tracing::info!("instancia detenida");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for listener in self.listeners.drain(..) {
            self.coordinator.listeners().remove(listener.id());
            listener.mark_stopped();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("limits", &self.limits())
            .field("listeners", &self.local_addrs())
            .field("mappings", &self.dispatcher.len())
            .finish()
    }
}
