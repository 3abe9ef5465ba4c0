//! Main-thread task queue for scene graph access.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use tracing::{debug, warn};

use super::graph::SceneGraph;
use super::{SCENE_TARGET, SceneError};

/// Work to run against the scene graph on the main thread.
pub type SceneTask = Box<dyn FnOnce(&mut dyn SceneGraph) + Send>;

/// Receiving half of the queue, handed to whichever thread owns the graph.
pub type SceneTaskReceiver = Receiver<SceneTask>;

const CALL_PENDING: u8 = 0;
const CALL_RUNNING: u8 = 1;
const CALL_ABANDONED: u8 = 2;

/// Creates a connected queue and receiver.
pub fn channel() -> (SceneQueue, SceneTaskReceiver) {
    let (sender, receiver) = mpsc::channel();
    (SceneQueue { sender }, receiver)
}

/// Cloneable handle used by handler threads to reach the scene graph.
#[derive(Clone)]
pub struct SceneQueue {
    sender: Sender<SceneTask>,
}

impl SceneQueue {
    /// Queues `task` without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::HostUnavailable`] when the host has gone.
    pub fn submit(&self, task: SceneTask) -> Result<(), SceneError> {
        self.sender
            .send(task)
            .map_err(|_| SceneError::HostUnavailable)
    }

    /// Runs `f` on the main thread and waits up to `timeout` for it to start.
    ///
    /// A call that times out is withdrawn: if the main thread reaches it
    /// later, `f` is skipped. A call that has already started is waited for.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::HostUnavailable`] or [`SceneError::TimedOut`]
    /// when the main thread does not answer.
    pub fn call<R, F>(&self, timeout: Duration, f: F) -> Result<R, SceneError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn SceneGraph) -> R + Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        let state = Arc::new(AtomicU8::new(CALL_PENDING));
        let task_state = Arc::clone(&state);
        self.submit(Box::new(move |graph| {
            if task_state
                .compare_exchange(CALL_PENDING, CALL_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!(target: SCENE_TARGET, "skipping scene call withdrawn by its caller");
                return;
            }
            if reply.send(f(graph)).is_err() {
                debug!(target: SCENE_TARGET, "scene call abandoned by its caller");
            }
        }))?;
        match result.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Disconnected) => Err(SceneError::HostUnavailable),
            Err(RecvTimeoutError::Timeout) => {
                let withdrawn = state
                    .compare_exchange(CALL_PENDING, CALL_ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if withdrawn {
                    return Err(SceneError::TimedOut);
                }
                result.recv().map_err(|_| SceneError::HostUnavailable)
            }
        }
    }
}

/// Owner of the scene graph; lives on the main thread.
pub struct SceneHost {
    graph: Box<dyn SceneGraph>,
    receiver: SceneTaskReceiver,
}

impl SceneHost {
    /// Binds `graph` to the receiving end of a queue.
    pub fn new(graph: Box<dyn SceneGraph>, receiver: SceneTaskReceiver) -> Self {
        Self { graph, receiver }
    }

    /// Read access for code already on the main thread.
    pub fn graph(&self) -> &dyn SceneGraph {
        self.graph.as_ref()
    }

    /// Runs every queued task without blocking. Returns how many ran, or
    /// `None` once every queue handle has been dropped.
    pub fn pump(&mut self) -> Option<usize> {
        let mut ran = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(task) => {
                    task(self.graph.as_mut());
                    ran += 1;
                }
                Err(TryRecvError::Empty) => return Some(ran),
                Err(TryRecvError::Disconnected) => return (ran > 0).then_some(ran),
            }
        }
    }

    /// Waits up to `wait` for a task, then drains the queue.
    pub fn pump_for(&mut self, wait: Duration) -> Option<usize> {
        match self.receiver.recv_timeout(wait) {
            Ok(task) => {
                task(self.graph.as_mut());
                Some(1 + self.pump().unwrap_or(0))
            }
            Err(RecvTimeoutError::Timeout) => Some(0),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Pumps until `stop` is raised or every queue handle is gone.
    pub fn run_until(&mut self, stop: &AtomicBool, tick: Duration) {
        while !stop.load(Ordering::SeqCst) {
            if self.pump_for(tick).is_none() {
                warn!(target: SCENE_TARGET, "scene queue closed");
                break;
            }
        }
    }
}
