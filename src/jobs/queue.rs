//! # Cola de Jobs
//! src/jobs/queue.rs
//!
//! Cola FIFO acotada y thread-safe entre listeners (productores) y workers
//! (consumidores), con una señal de *demanda ociosa* para el supervisor.
//!
//! ## Semántica
//!
//! - `enqueue` bloquea mientras la cola está llena (backpressure, nunca se
//!   descarta un job). Capacidad 0 = sin límite.
//! - `dequeue` bloquea hasta que hay un job. Tras `close`, los workers
//!   vacían lo pendiente y después reciben `None`.
//! - Si al encolar no hay ningún worker esperando en `dequeue`, se levanta
//!   la demanda ociosa. Lo mismo al desencolar si quedan jobs y nadie más
//!   espera. La bandera queda puesta hasta que
//!   `wait_idle_demand` la consume, así que una señal nunca se pierde.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
#[cfg(test)]
use std::time::Duration;

use super::Job;

/// Estado protegido por el mutex de la cola
struct QueueState<T> {
    jobs: VecDeque<T>,

    /// Workers bloqueados en `dequeue`
    waiting: usize,

    /// Demanda ociosa pendiente de consumir
    demand: bool,

    /// Cerrada para drenar
    closed: bool,
}

/// Cola acotada con señal de demanda ociosa
pub struct JobQueue<T = Job> {
    state: Mutex<QueueState<T>>,

    /// Hay jobs o la cola se cerró
    not_empty: Condvar,

    /// Se liberó espacio o la cola se cerró
    not_full: Condvar,

    /// Se levantó la demanda ociosa
    idle_demand: Condvar,

    capacity: usize,
}

impl<T> std::fmt::Debug for JobQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JobQueue")
            .field("len", &state.jobs.len())
            .field("waiting", &state.waiting)
            .field("demand", &state.demand)
            .field("closed", &state.closed)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> JobQueue<T> {
    /// Crea una cola con la capacidad indicada (0 = sin límite)
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                waiting: 0,
                demand: false,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            idle_demand: Condvar::new(),
            capacity,
        }
    }

    /// Encola un job, bloqueando mientras la cola está llena
    ///
    /// Devuelve el job en `Err` si la cola está cerrada.
    ///
    /// # Ejemplo
    /// ```
    /// use http_appserver::jobs::JobQueue;
    ///
    /// let queue: JobQueue<u32> = JobQueue::new(10);
    /// queue.enqueue(1).unwrap();
    /// assert_eq!(queue.dequeue(), Some(1));
    ///
    /// queue.close();
    /// assert_eq!(queue.enqueue(2), Err(2));
    /// assert_eq!(queue.dequeue(), None);
    /// ```
    pub fn enqueue(&self, job: T) -> Result<(), T> {
        let mut state = self.state.lock();

        while !state.closed && self.capacity > 0 && state.jobs.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }

        if state.closed {
            return Err(job);
        }

        if state.waiting == 0 {
            state.demand = true;
            self.idle_demand.notify_all();
        }

        state.jobs.push_back(job);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Desencola el siguiente job, bloqueando hasta que haya uno
    ///
    /// `None` solo cuando la cola está cerrada y vacía.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.state.lock();
        state.waiting += 1;

        let job = loop {
            if let Some(job) = state.jobs.pop_front() {
                break Some(job);
            }
            if state.closed {
                break None;
            }
            self.not_empty.wait(&mut state);
        };

        state.waiting -= 1;
        if job.is_some() {
            self.not_full.notify_one();

            // backlog sin nadie esperando: hace falta otro worker
            if !state.jobs.is_empty() && state.waiting == 0 {
                state.demand = true;
                self.idle_demand.notify_all();
            }
        }
        job
    }

    /// Levanta la demanda ociosa sin encolar nada (usado al detener)
    pub fn signal_idle_demand(&self) {
        let mut state = self.state.lock();
        state.demand = true;
        self.idle_demand.notify_all();
    }

    /// Bloquea hasta que haya demanda ociosa y la consume
    pub fn wait_idle_demand(&self) {
        let mut state = self.state.lock();
        while !state.demand {
            self.idle_demand.wait(&mut state);
        }
        state.demand = false;
    }

    /// Como [`JobQueue::wait_idle_demand`] pero con límite de tiempo
    ///
    /// Devuelve `true` si consumió una señal.
    #[cfg(test)]
    pub(crate) fn wait_idle_demand_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.demand {
            self.idle_demand.wait_while_for(&mut state, |s| !s.demand, timeout);
        }
        std::mem::replace(&mut state.demand, false)
    }

    /// Workers ociosos esperando un job
    pub fn waiting_worker_count(&self) -> usize {
        self.state.lock().waiting
    }

    /// Jobs pendientes
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacidad configurada (0 = sin límite)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cierra la cola: no admite más jobs y despierta a todos los workers
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Espera activa corta hasta que se cumpla la condición
    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    // ==================== Orden y capacidad ====================

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new(10);
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }
        let out: Vec<_> = (0..5).filter_map(|_| queue.dequeue()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_enqueue_blocks_when_full() {
        let queue = Arc::new(JobQueue::new(1));
        queue.enqueue(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(2))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1, "el productor debe seguir bloqueado");

        assert_eq!(queue.dequeue(), Some(1));
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(queue.dequeue(), Some(2));
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let queue = JobQueue::new(0);
        for i in 0..5000 {
            queue.enqueue(i).unwrap();
        }
        assert_eq!(queue.len(), 5000);
        assert_eq!(queue.capacity(), 0);
    }

    #[test]
    fn test_debug_shows_state() {
        let queue = JobQueue::new(4);
        queue.enqueue("a").unwrap();
        let shown = format!("{queue:?}");
        assert!(shown.contains("len: 1"), "{shown}");
        assert!(shown.contains("capacity: 4"), "{shown}");
    }

    // ==================== Demanda ociosa ====================

    #[test]
    fn test_enqueue_without_waiters_raises_demand() {
        let queue = JobQueue::new(10);
        queue.enqueue(1).unwrap();
        assert!(queue.wait_idle_demand_timeout(Duration::from_millis(10)));
        // consumida
        assert!(!queue.wait_idle_demand_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_enqueue_with_waiting_worker_no_demand() {
        let queue = Arc::new(JobQueue::new(10));
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        assert!(eventually(|| queue.waiting_worker_count() == 1));
        queue.enqueue(7).unwrap();

        assert_eq!(worker.join().unwrap(), Some(7));
        assert!(!queue.wait_idle_demand_timeout(Duration::from_millis(10)));
        assert_eq!(queue.waiting_worker_count(), 0);
    }

    #[test]
    fn test_dequeue_with_backlog_raises_demand() {
        let queue = JobQueue::new(10);
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        assert!(queue.wait_idle_demand_timeout(Duration::from_millis(10)));

        assert_eq!(queue.dequeue(), Some(1));
        assert!(queue.wait_idle_demand_timeout(Duration::from_millis(10)));

        assert_eq!(queue.dequeue(), Some(2));
        assert!(!queue.wait_idle_demand_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_idle_demand_wakes_on_signal() {
        let queue = Arc::new(JobQueue::<u8>::new(10));
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_idle_demand())
        };

        thread::sleep(Duration::from_millis(20));
        queue.signal_idle_demand();
        waiter.join().unwrap();
    }

    // ==================== Drenado ====================

    #[test]
    fn test_close_drains_then_none() {
        let queue = JobQueue::new(10);
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.enqueue("c"), Err("c"));
        assert_eq!(queue.dequeue(), Some("a"));
        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_close_wakes_blocked_workers() {
        let queue = Arc::new(JobQueue::<u8>::new(10));
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.dequeue())
            })
            .collect();

        assert!(eventually(|| queue.waiting_worker_count() == 3));
        queue.close();

        for w in workers {
            assert_eq!(w.join().unwrap(), None);
        }
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let queue = Arc::new(JobQueue::new(1));
        queue.enqueue(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue(2))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(producer.join().unwrap(), Err(2));
    }

    #[test]
    fn test_no_job_lost_under_contention() {
        let queue = Arc::new(JobQueue::new(8));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(j) = queue.dequeue() {
                        got.push(j);
                    }
                    got
                })
            })
            .collect();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        queue.close();

        let mut all: Vec<_> = consumers.into_iter().flat_map(|c| c.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all.len(), 1000);
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}
