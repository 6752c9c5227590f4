//! Tests de integración del servidor
//! tests/server_test.rs
//!
//! Cada test levanta una o más instancias reales sobre 127.0.0.1 con puerto
//! efímero, les habla por TCP y las detiene con el coordinador.

use http_appserver::component::{Call, ComponentRegistry, Outcome};
use http_appserver::config::ConfigFile;
use http_appserver::http::Response;
use http_appserver::metrics::Metrics;
use http_appserver::shutdown::ShutdownCoordinator;
use http_appserver::supervisor::Supervisor;
use http_appserver::worker::WorkerSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Instancia corriendo en su propio thread
struct Running {
    addr: SocketAddr,
    coordinator: ShutdownCoordinator,
    workers: Arc<WorkerSet>,
    metrics: Arc<Metrics>,
    handle: JoinHandle<http_appserver::Result<()>>,
}

impl Running {
    fn start(config: &str, components: ComponentRegistry) -> Self {
        Self::start_with(config, components, ShutdownCoordinator::new())
    }

    fn start_with(config: &str, components: ComponentRegistry, coordinator: ShutdownCoordinator) -> Self {
        let config = ConfigFile::parse(config).unwrap();
        let mut supervisor = Supervisor::from_config(&config, components, coordinator.clone()).unwrap();

        let addr = supervisor.local_addrs()[0];
        let workers = Arc::clone(supervisor.workers());
        let metrics = Arc::clone(supervisor.metrics());
        let instances_before = coordinator.instance_count();

        let handle = thread::spawn(move || supervisor.run());

        wait_until("instancia registrada", || coordinator.instance_count() > instances_before);

        Self {
            addr,
            coordinator,
            workers,
            metrics,
            handle,
        }
    }

    fn stop(self) {
        self.coordinator.request_shutdown();
        self.handle.join().unwrap().unwrap();
        assert_eq!(self.workers.live_count(), 0);
    }
}

/// Puerta que bloquea componentes hasta que el test la abre
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn wait(&self) {
        let (lock, cvar) = &*self.0;
        let mut open = lock.lock();
        while !*open {
            cvar.wait(&mut open);
        }
    }

    fn open(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock() = true;
        cvar.notify_all();
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timeout esperando: {what}");
}

/// Envía una petición y devuelve la respuesta completa
fn send(addr: SocketAddr, path: &str, host: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

/// Lee una respuesta (cabecera + Content-Length) dejando la conexión abierta
fn read_response(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        assert_eq!(stream.read(&mut byte).unwrap(), 1, "conexión cerrada a mitad de respuesta");
        raw.push(byte[0]);
    }
    let head = String::from_utf8(raw).unwrap();
    let length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .and_then(|v| v.trim().parse().ok())
        .unwrap();
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();
    head + &String::from_utf8(body).unwrap()
}

/// ¿El servidor cerró la conexión? (EOF o reset)
fn closed_by_server(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(stream.read(&mut byte), Ok(0) | Err(_))
}

fn body(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
}

fn slow_components(gate: &Gate) -> ComponentRegistry {
    let mut components = ComponentRegistry::with_builtins();
    let gate = gate.clone();
    components.register("slow", move |_: &Call<'_>| {
        gate.wait();
        Outcome::Reply(Response::text("done"))
    });
    components
}

// ==================== Despacho ====================

#[test]
fn test_end_to_end_mapurl_echo() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 2\nMaxThreads 4\nMapUrl ^/hello/(.*)$ echo /$1 a b\n",
        ComponentRegistry::with_builtins(),
    );

    let response = send(server.addr, "/hello/world", "localhost");
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

    let json: serde_json::Value = serde_json::from_str(body(&response)).unwrap();
    assert_eq!(json["path_info"], "/world");
    assert_eq!(json["args"], serde_json::json!(["a", "b"]));

    server.stop();
}

#[test]
fn test_unmapped_url_is_404() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nMapUrl ^/hello$ echo\n",
        ComponentRegistry::with_builtins(),
    );

    let response = send(server.addr, "/nothing", "localhost");
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");
    assert_eq!(server.metrics.snapshot().not_found, 1);

    server.stop();
}

#[test]
fn test_vhost_routing_and_fall_through() {
    let server = Running::start(
        "Listen 127.0.0.1 0\n\
         VMapUrl ^api\\\\.example\\\\.com$ ^/ echo /api\n\
         MapUrl ^/ echo /default\n",
        ComponentRegistry::with_builtins(),
    );

    let api: serde_json::Value = serde_json::from_str(body(&send(server.addr, "/x", "api.example.com:8080"))).unwrap();
    assert_eq!(api["path_info"], "/api");

    let other: serde_json::Value = serde_json::from_str(body(&send(server.addr, "/x", "www.example.com"))).unwrap();
    assert_eq!(other["path_info"], "/default");

    // echo declina con ?decline en ambas entradas → 404
    let declined = send(server.addr, "/x?decline", "api.example.com");
    assert!(declined.starts_with("HTTP/1.1 404"), "{declined}");

    server.stop();
}

#[test]
fn test_status_component() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 3\nMaxThreads 6\nMapUrl ^/status$ status\n",
        ComponentRegistry::with_builtins(),
    );

    let json: serde_json::Value = serde_json::from_str(body(&send(server.addr, "/status", "localhost"))).unwrap();
    assert_eq!(json["min_threads"], 3);
    assert_eq!(json["max_threads"], 6);
    let live = json["live_workers"].as_u64().unwrap();
    assert!((3..=6).contains(&live), "live_workers = {live}");
    assert!(json["metrics"]["accepted"].as_u64().unwrap() >= 1);

    server.stop();
}

// ==================== Escalado ====================

#[test]
fn test_pool_grows_on_demand_up_to_max() {
    let gate = Gate::default();
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 2\nMaxThreads 4\nThreadStartDelay 0\nMapUrl ^/slow$ slow\n",
        slow_components(&gate),
    );
    assert_eq!(server.workers.live_count(), 2);

    let clients: Vec<_> = (0..6)
        .map(|_| {
            let addr = server.addr;
            thread::spawn(move || send(addr, "/slow", "localhost"))
        })
        .collect();

    wait_until("pool en el máximo", || server.workers.busy_count() == 4);
    assert_eq!(server.workers.live_count(), 4);

    wait_until("saturación registrada", || server.metrics.snapshot().saturation_events > 0);
    assert_eq!(server.workers.live_count(), 4, "nunca se supera MaxThreads");

    gate.open();
    for client in clients {
        assert!(client.join().unwrap().contains("done"));
    }

    let snap = server.metrics.snapshot();
    assert_eq!(snap.completed, 6, "ningún job se descarta");
    assert_eq!(snap.workers_spawned, 2);

    server.stop();
}

#[test]
fn test_saturated_pool_queues_instead_of_dropping() {
    let gate = Gate::default();
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 2\nMaxThreads 2\nMapUrl ^/slow$ slow\n",
        slow_components(&gate),
    );

    let clients: Vec<_> = (0..5)
        .map(|_| {
            let addr = server.addr;
            thread::spawn(move || send(addr, "/slow", "localhost"))
        })
        .collect();

    wait_until("workers ocupados", || server.workers.busy_count() == 2);
    wait_until("saturación registrada", || server.metrics.snapshot().saturation_events > 0);
    assert_eq!(server.workers.live_count(), 2);

    gate.open();
    for client in clients {
        assert!(client.join().unwrap().starts_with("HTTP/1.1 200 OK"));
    }
    assert_eq!(server.metrics.snapshot().workers_spawned, 0);

    server.stop();
}

// ==================== Apagado ====================

#[test]
fn test_one_shutdown_stops_every_instance() {
    let coordinator = ShutdownCoordinator::new();
    let first = Running::start_with(
        "Listen 127.0.0.1 0\nMapUrl ^/ echo\n",
        ComponentRegistry::with_builtins(),
        coordinator.clone(),
    );
    let second = Running::start_with(
        "Listen 127.0.0.1 0\nMapUrl ^/ echo\n",
        ComponentRegistry::with_builtins(),
        coordinator.clone(),
    );
    assert_eq!(coordinator.instance_count(), 2);
    assert_eq!(coordinator.listeners().len(), 2);

    assert!(send(first.addr, "/", "localhost").contains("200 OK"));
    assert!(send(second.addr, "/", "localhost").contains("200 OK"));

    coordinator.request_shutdown();
    first.handle.join().unwrap().unwrap();
    second.handle.join().unwrap().unwrap();

    assert_eq!(coordinator.instance_count(), 0);
    assert!(coordinator.listeners().is_empty());
    assert_eq!(first.workers.live_count(), 0);
    assert_eq!(second.workers.live_count(), 0);
    assert!(TcpStream::connect_timeout(&first.addr, Duration::from_millis(200)).is_err());
}

#[test]
fn test_in_flight_request_completes_before_run_returns() {
    let gate = Gate::default();
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 2\nMaxThreads 2\nMapUrl ^/slow$ slow\n",
        slow_components(&gate),
    );

    let client = {
        let addr = server.addr;
        thread::spawn(move || send(addr, "/slow", "localhost"))
    };
    wait_until("petición en curso", || server.workers.busy_count() == 1);

    server.coordinator.request_shutdown();
    thread::sleep(Duration::from_millis(100));
    assert!(!server.handle.is_finished(), "run no vuelve con trabajo en curso");
    assert_eq!(server.workers.busy_count(), 1);
    assert!(server.workers.live_count() >= 1);

    gate.open();
    let response = client.join().unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("done"));

    server.handle.join().unwrap().unwrap();
    assert_eq!(server.workers.live_count(), 0);
}

// ==================== Keep-alive ====================

#[test]
fn test_keep_alive_serves_several_requests_on_one_connection() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 2\nMaxThreads 2\nKeepAliveMax 10\nMapUrl ^/echo echo\n",
        ComponentRegistry::with_builtins(),
    );

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    // más peticiones que workers: cada una vuelve por el poller
    for i in 0..5 {
        stream
            .write_all(format!("GET /echo/{i} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .unwrap();
        let response = read_response(&mut stream);
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.contains("Connection: keep-alive"), "{response}");
        assert!(response.contains(&format!("\"path\":\"/echo/{i}\"")), "{response}");
    }

    // pipelining: dos peticiones en un solo write, la última pide cerrar
    stream
        .write_all(b"GET /echo/a HTTP/1.1\r\n\r\nGET /echo/b HTTP/1.1\r\nConnection: close\r\n\r\n")
        .unwrap();
    assert!(read_response(&mut stream).contains("/echo/a"));
    let last = read_response(&mut stream);
    assert!(last.contains("/echo/b"));
    assert!(last.contains("Connection: close"));
    assert!(closed_by_server(&mut stream));

    assert_eq!(server.metrics.snapshot().completed, 7);
    server.stop();
}

#[test]
fn test_idle_keep_alive_connection_times_out() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nKeepAliveTimeout 100\nMapUrl ^/echo echo\n",
        ComponentRegistry::with_builtins(),
    );

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(b"GET /echo HTTP/1.1\r\n\r\n").unwrap();
    assert!(read_response(&mut stream).contains("Connection: keep-alive"));

    let idle_since = Instant::now();
    assert!(closed_by_server(&mut stream));
    assert!(idle_since.elapsed() >= Duration::from_millis(50));

    server.stop();
}

#[test]
fn test_http10_without_keep_alive_closes() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nMapUrl ^/echo echo\n",
        ComponentRegistry::with_builtins(),
    );

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(b"GET /echo HTTP/1.0\r\n\r\n").unwrap();
    assert!(read_response(&mut stream).contains("Connection: close"));
    assert!(closed_by_server(&mut stream));

    server.stop();
}

#[test]
fn test_shutdown_closes_idle_keep_alive_connections() {
    let server = Running::start(
        "Listen 127.0.0.1 0\nMinThreads 2\nMapUrl ^/echo echo\n",
        ComponentRegistry::with_builtins(),
    );

    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(b"GET /echo HTTP/1.1\r\n\r\n").unwrap();
    assert!(read_response(&mut stream).contains("Connection: keep-alive"));

    // KeepAliveTimeout por defecto (15 s): solo el apagado la cierra
    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(closed_by_server(&mut stream));
}
