//! Threading support for the display driver
//!
//! Two pieces live here:
//! - [`OwnerThread`], a dispatcher that runs procedures on the thread owning
//!   the window. The backend only accepts the final connection release from
//!   that thread, so teardown posts the release as a request and waits for the
//!   completion reply.
//! - The display critical section, a process-wide re-entrant lock held for
//!   the whole of initialization and teardown.
//!
//! # Design Notes
//!
//! The dispatcher is a plain named thread draining a `crossbeam` channel.
//! Each request carries its own reply sender; the caller blocks on the reply,
//! which makes the hand-off synchronous without sharing any state.
//!
//! The critical section is a `parking_lot::ReentrantMutex` so a failed
//! initialization can run teardown while still holding the lock.


use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard};

/// Error type for threading operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread spawn failed
    SpawnFailed(String),
    /// Thread join failed
    JoinFailed(String),
    /// The owner thread is no longer accepting requests
    Disconnected,
    /// The request was accepted but never completed
    Abandoned,
}

impl std::fmt::Display for ThreadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadError::SpawnFailed(s) => write!(f, "Thread spawn failed: {}", s),
            ThreadError::JoinFailed(s) => write!(f, "Thread join failed: {}", s),
            ThreadError::Disconnected => write!(f, "Owner thread is not running"),
            ThreadError::Abandoned => write!(f, "Owner thread dropped the request"),
        }
    }
}

impl std::error::Error for ThreadError {}

pub type Result<T> = std::result::Result<T, ThreadError>;

// ============================================================================
// Owner Thread
// ============================================================================

type Job = Box<dyn FnOnce() + Send + 'static>;

enum OwnerRequest {
    Run { job: Job, done: Sender<()> },
    Stop,
}

/// A thread that owns the window and executes procedures on request.
pub struct OwnerThread {
    requests: Sender<OwnerRequest>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
    name: String,
}

impl OwnerThread {
    /// Spawn the owner thread
    ///
    /// # Errors
    /// Returns `ThreadError::SpawnFailed` if the thread cannot be created
    pub fn spawn(name: &str) -> Result<Self> {
        let (requests, inbox) = channel::unbounded();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::serve(inbox))
            .map_err(|e| ThreadError::SpawnFailed(format!("{}: {}", name, e)))?;

        let thread_id = handle.thread().id();
        log::debug!("Owner thread '{}' started", name);

        Ok(Self {
            requests,
            thread_id,
            handle: Some(handle),
            name: name.to_string(),
        })
    }

    fn serve(inbox: Receiver<OwnerRequest>) {
        for request in inbox.iter() {
            match request {
                OwnerRequest::Run { job, done } => {
                    job();
                    // The caller may have given up waiting; nothing to do then.
                    let _ = done.send(());
                }
                OwnerRequest::Stop => break,
            }
        }
    }

    /// Id of the owner thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Thread name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is the owner thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `f` on the owner thread and wait for it to complete
    ///
    /// A call made from the owner thread itself runs inline, otherwise the
    /// request would wait on its own queue forever.
    ///
    /// # Errors
    /// Returns `ThreadError::Disconnected` if the owner thread has stopped and
    /// `ThreadError::Abandoned` if it dropped the request (the job panicked).
    pub fn call<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            f();
            return Ok(());
        }

        let (done, reply) = channel::bounded(1);
        self.requests
            .send(OwnerRequest::Run {
                job: Box::new(f),
                done,
            })
            .map_err(|_| ThreadError::Disconnected)?;

        reply.recv().map_err(|_| ThreadError::Abandoned)
    }

    /// Stop the owner thread and wait for it to exit
    ///
    /// # Errors
    /// Returns `ThreadError::JoinFailed` if the thread panicked
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // A send error means the thread is already gone; join reports why.
        let _ = self.requests.send(OwnerRequest::Stop);
        handle
            .join()
            .map_err(|_| ThreadError::JoinFailed(format!("{} panicked", self.name)))?;
        log::debug!("Owner thread '{}' stopped", self.name);
        Ok(())
    }
}

impl Drop for OwnerThread {
    fn drop(&mut self) {
        if self.is_current() {
            // Joining ourselves would deadlock; the loop ends once the sender drops.
            return;
        }
        if let Err(e) = self.shutdown() {
            log::warn!("{}", e);
        }
    }
}

impl std::fmt::Debug for OwnerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerThread")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

// ============================================================================
// Critical Section
// ============================================================================

static DISPLAY_CRITICAL: ReentrantMutex<()> = const_reentrant_mutex(());

/// Guard for the display critical section; leaving scope releases it.
pub type CriticalGuard = ReentrantMutexGuard<'static, ()>;

/// Enter the process-wide display critical section
///
/// Blocks while another thread holds it. The holding thread may enter again.
pub fn enter_critical() -> CriticalGuard {
    DISPLAY_CRITICAL.lock()
}

/// Whether some thread currently holds the display critical section.
pub fn critical_is_held() -> bool {
    DISPLAY_CRITICAL.is_locked()
}
