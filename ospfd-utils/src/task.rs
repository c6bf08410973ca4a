//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// Handle to a spawned asynchronous task.
///
/// Dropping the handle aborts the task unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// Handle to a one-shot timer created by [`TimeoutTask::new`].
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerInner,
}

/// Handle to a periodic timer created by [`IntervalTask::new`].
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerInner,
}

// State shared by both timer flavors.
#[derive(Debug)]
struct TimerInner {
    _task: Task<()>,
    control: mpsc::UnboundedSender<Option<Duration>>,
    deadline: Arc<Mutex<Instant>>,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Spawns a task that is restarted whenever it panics.
    ///
    /// Meant for receive loops exposed to untrusted input: a panic while
    /// handling one message must not take the whole instance down.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = tokio::spawn(
            async move {
                loop {
                    match Task::spawn(spawn_fn()).await {
                        Ok(_) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Keeps the task running after its handle is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a timer that calls `cb` once `timeout` expires.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) =
            mpsc::unbounded_channel::<Option<Duration>>();
        let deadline = Arc::new(Mutex::new(Instant::now() + timeout));
        let deadline_child = deadline.clone();

        let task = Task::spawn(
            async move {
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        msg = control_rx.recv() => {
                            let Some(new_timeout) = msg else {
                                break;
                            };
                            let next =
                                Instant::now() + new_timeout.unwrap_or(timeout);
                            sleep.as_mut().reset(next);
                            set_deadline(&deadline_child, next);
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimerInner {
                _task: task,
                control: control_tx,
                deadline,
            },
        }
    }

    /// Restarts the timer, optionally with a new timeout value.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        self.inner.reset(timeout);
    }

    /// Returns the time left before the timer expires.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            self.inner.remaining()
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a timer that calls `cb` every `interval`.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) =
            mpsc::unbounded_channel::<Option<Duration>>();
        let deadline = Arc::new(Mutex::new(Instant::now() + interval));
        let deadline_child = deadline.clone();

        let task = Task::spawn(
            async move {
                let mut ticker = if tick_on_start {
                    time::interval(interval)
                } else {
                    time::interval_at(Instant::now() + interval, interval)
                };

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            (cb)().await;
                            set_deadline(
                                &deadline_child,
                                Instant::now() + ticker.period(),
                            );
                        }
                        msg = control_rx.recv() => {
                            let Some(new_interval) = msg else {
                                break;
                            };
                            let period =
                                new_interval.unwrap_or(ticker.period());
                            let next = Instant::now() + period;
                            ticker = time::interval_at(next, period);
                            set_deadline(&deadline_child, next);
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: TimerInner {
                _task: task,
                control: control_tx,
                deadline,
            },
        }
    }

    /// Restarts the interval, optionally with a new period.
    pub fn reset(&mut self, interval: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        self.inner.reset(interval);
    }

    /// Returns the time left before the next tick.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            self.inner.remaining()
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl TimerInner =====

impl TimerInner {
    fn reset(&self, value: Option<Duration>) {
        if self.control.send(value).is_err() {
            error!("failed to reset timer");
        }
    }

    fn remaining(&self) -> Duration {
        let deadline =
            self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
        deadline.saturating_duration_since(Instant::now())
    }
}

// ===== helper functions =====

fn set_deadline(deadline: &Mutex<Instant>, next: Instant) {
    *deadline.lock().unwrap_or_else(PoisonError::into_inner) = next;
}
