/// One-shot tick timer running on its own thread
///
/// Only the most recently armed tick can fire. Re-arming or cancelling
/// makes any earlier tick stale, and stale ticks are dropped in `poll`.
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::playback::Schedule;

enum Request {
    Arm { id: u64, deadline: Instant },
    Disarm,
}

pub struct TickTimer {
    requests: Option<Sender<Request>>,
    fired: Receiver<u64>,
    armed: Option<u64>,
    next_id: u64,
    worker: Option<JoinHandle<()>>,
}

impl TickTimer {
    pub fn new() -> Self {
        let (request_tx, request_rx) = unbounded();
        let (fired_tx, fired_rx) = unbounded();

        let worker = thread::Builder::new()
            .name("gridseq-timer".to_string())
            .spawn(move || run(request_rx, fired_tx))
            .map_err(|e| log::error!("failed to spawn timer thread: {}", e))
            .ok();

        Self {
            requests: Some(request_tx),
            fired: fired_rx,
            armed: None,
            next_id: 0,
            worker,
        }
    }

    /// Arms a tick `delay` from now, replacing any pending one.
    pub fn schedule(&mut self, delay: Duration) {
        self.next_id += 1;
        let id = self.next_id;
        self.armed = Some(id);
        self.send(Request::Arm {
            id,
            deadline: Instant::now() + delay,
        });
    }

    pub fn cancel(&mut self) {
        self.armed = None;
        self.send(Request::Disarm);
    }

    pub fn apply(&mut self, schedule: Schedule) {
        match schedule {
            Schedule::TickIn(delay) => self.schedule(delay),
            Schedule::Cancel => self.cancel(),
            Schedule::Unchanged => {}
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// True if the armed tick has fired. Never blocks.
    pub fn poll(&mut self) -> bool {
        while let Ok(id) = self.fired.try_recv() {
            if self.take(id) {
                return true;
            }
        }
        false
    }

    /// Blocks up to `timeout` for the armed tick.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.fired.recv_deadline(deadline) {
                Ok(id) => {
                    if self.take(id) {
                        return true;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    fn take(&mut self, id: u64) -> bool {
        if self.armed == Some(id) {
            self.armed = None;
            true
        } else {
            log::trace!("dropping stale tick {}", id);
            false
        }
    }

    fn send(&self, request: Request) {
        if let Some(requests) = &self.requests {
            if requests.send(request).is_err() {
                log::warn!("timer thread is gone");
            }
        }
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        // closing the request channel ends the worker
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(requests: Receiver<Request>, fired: Sender<u64>) {
    let mut pending: Option<(u64, Instant)> = None;
    loop {
        let request = match pending {
            Some((id, deadline)) => match requests.recv_deadline(deadline) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    pending = None;
                    if fired.send(id).is_err() {
                        return;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match requests.recv() {
                Ok(request) => request,
                Err(_) => return,
            },
        };

        pending = match request {
            Request::Arm { id, deadline } => Some((id, deadline)),
            Request::Disarm => None,
        };
    }
}
