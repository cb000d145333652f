//! Bounded worker pool plus a single timer thread.
//!
//! Owned by the port registry: created with it, shut down with it. Status
//! polls, auto-hangup timers, download watchdogs and call completion all
//! run here, never on a serial reader thread.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::sync::lock;

type Job = Box<dyn FnOnce() + Send + 'static>;
type RepeatingJob = Arc<dyn Fn() -> bool + Send + Sync + 'static>;

/// Cancellation handle for a scheduled task
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    /// Prevent any future run. A run already in progress finishes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

enum TimerTask {
    Once(Job),
    Repeating { period: Duration, job: RepeatingJob },
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    handle: TaskHandle,
    task: TimerTask,
}

// Min-heap on (deadline, seq)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

enum TimerMsg {
    Schedule(TimerEntry),
    Shutdown,
}

pub struct Scheduler {
    jobs: Mutex<Option<Sender<Job>>>,
    timer: Mutex<Option<Sender<TimerMsg>>>,
    seq: Arc<AtomicU64>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (timer_tx, timer_rx) = crossbeam_channel::unbounded::<TimerMsg>();
        let seq = Arc::new(AtomicU64::new(0));
        let mut threads = Vec::new();

        for i in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("modem-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            log::error!("Scheduled job panicked");
                        }
                    }
                });
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => log::error!("Failed to start worker thread {i}: {e}"),
            }
        }

        let timer = TimerLoop {
            jobs: job_tx.clone(),
            rearm: timer_tx.clone(),
            seq: seq.clone(),
            heap: BinaryHeap::new(),
        };
        match thread::Builder::new()
            .name("modem-timer".to_string())
            .spawn(move || timer.run(timer_rx))
        {
            Ok(handle) => threads.push(handle),
            Err(e) => log::error!("Failed to start timer thread: {e}"),
        }

        Self {
            jobs: Mutex::new(Some(job_tx)),
            timer: Mutex::new(Some(timer_tx)),
            seq,
            threads: Mutex::new(threads),
        }
    }

    /// Run `job` on a worker as soon as one is free.
    ///
    /// Returns `false` once the scheduler has been shut down.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match lock(&self.jobs).as_ref() {
            Some(jobs) => jobs.send(Box::new(job)).is_ok(),
            None => {
                log::debug!("Scheduler shut down, job dropped");
                false
            }
        }
    }

    /// Run `job` once after `delay` unless cancelled first.
    pub fn schedule_once(&self, delay: Duration, job: impl FnOnce() + Send + 'static) -> TaskHandle {
        self.schedule(delay, TimerTask::Once(Box::new(job)))
    }

    /// Run `job` after `initial`, then again `period` after each run completes.
    ///
    /// Runs never overlap. A run returning `false` cancels the task.
    pub fn schedule_repeating(
        &self,
        initial: Duration,
        period: Duration,
        job: impl Fn() -> bool + Send + Sync + 'static,
    ) -> TaskHandle {
        self.schedule(
            initial,
            TimerTask::Repeating {
                period,
                job: Arc::new(job),
            },
        )
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TaskHandle {
        let handle = TaskHandle::default();
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            handle: handle.clone(),
            task,
        };
        let sent = lock(&self.timer)
            .as_ref()
            .is_some_and(|timer| timer.send(TimerMsg::Schedule(entry)).is_ok());
        if !sent {
            log::debug!("Scheduler shut down, timer dropped");
            handle.cancel();
        }
        handle
    }

    /// Stop accepting work, let queued jobs drain and join the threads.
    ///
    /// Pending timers are discarded. Safe to call more than once, and from
    /// a worker thread (that thread is simply not joined).
    pub fn shutdown(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            let _ = timer.send(TimerMsg::Shutdown);
        }
        lock(&self.jobs).take();

        let current = thread::current().id();
        let threads: Vec<_> = lock(&self.threads).drain(..).collect();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct TimerLoop {
    jobs: Sender<Job>,
    rearm: Sender<TimerMsg>,
    seq: Arc<AtomicU64>,
    heap: BinaryHeap<TimerEntry>,
}

impl TimerLoop {
    fn run(mut self, rx: crossbeam_channel::Receiver<TimerMsg>) {
        loop {
            let msg = match self.heap.peek() {
                Some(next) => rx.recv_deadline(next.deadline),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match msg {
                Ok(TimerMsg::Schedule(entry)) => self.heap.push(entry),
                Ok(TimerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            while self.heap.peek().is_some_and(|e| e.deadline <= now) {
                if let Some(entry) = self.heap.pop() {
                    self.dispatch(entry);
                }
            }
        }
        log::debug!("Timer thread stopped ({} timers discarded)", self.heap.len());
    }

    fn dispatch(&self, entry: TimerEntry) {
        if entry.handle.is_cancelled() {
            return;
        }
        let handle = entry.handle;
        let job: Job = match entry.task {
            TimerTask::Once(job) => Box::new(move || {
                if !handle.is_cancelled() {
                    job();
                }
            }),
            TimerTask::Repeating { period, job } => {
                let rearm = self.rearm.clone();
                let seq = self.seq.clone();
                Box::new(move || {
                    if handle.is_cancelled() {
                        return;
                    }
                    if !job() {
                        handle.cancel();
                    }
                    if handle.is_cancelled() {
                        return;
                    }
                    let next = TimerEntry {
                        deadline: Instant::now() + period,
                        seq: seq.fetch_add(1, Ordering::Relaxed),
                        handle,
                        task: TimerTask::Repeating { period, job },
                    };
                    let _ = rearm.send(TimerMsg::Schedule(next));
                })
            }
        };
        let _ = self.jobs.send(job);
    }
}
