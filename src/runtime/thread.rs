//! Thread registration, context cookies and GC interaction modes.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

/// Cookie identifying the context a thread's external objects live in.
///
/// Captured when an external object context is created and compared when
/// releasing all external objects on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextCookie(pub(crate) u64);

/// GC interaction mode of a mutator thread.
///
/// Cooperative threads may hold managed references and cannot be suspended
/// mid-operation; preemptive threads may block outside the managed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    Cooperative,
    Preemptive,
}

thread_local! {
    static MODE: Cell<ThreadMode> = const { Cell::new(ThreadMode::Preemptive) };
}

/// The calling thread's current GC interaction mode.
pub fn current_mode() -> ThreadMode {
    MODE.with(|m| m.get())
}

/// Enter cooperative mode for the lifetime of the returned guard.
pub fn enter_cooperative() -> ModeGuard {
    ModeGuard::enter(ThreadMode::Cooperative)
}

/// Enter preemptive mode for the lifetime of the returned guard.
pub fn enter_preemptive() -> ModeGuard {
    ModeGuard::enter(ThreadMode::Preemptive)
}

/// Scoped GC-mode transition; restores the previous mode on drop.
pub struct ModeGuard {
    prev: ThreadMode,
}

impl ModeGuard {
    fn enter(mode: ThreadMode) -> Self {
        let prev = MODE.with(|m| m.replace(mode));
        ModeGuard { prev }
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        MODE.with(|m| m.set(self.prev));
    }
}

/// Threads known to the runtime, with their context cookies.
pub struct ThreadRegistry {
    cookies: Mutex<HashMap<ThreadId, ContextCookie>>,
    next_cookie: AtomicU64,
    shutting_down: AtomicBool,
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        Self {
            cookies: Mutex::new(HashMap::new()),
            next_cookie: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The calling thread's context cookie, registering the thread on first
    /// use.
    pub fn context_cookie(&self) -> ContextCookie {
        let id = std::thread::current().id();
        let mut cookies = self.cookies.lock();
        if let Some(cookie) = cookies.get(&id) {
            return *cookie;
        }
        let cookie = ContextCookie(self.next_cookie.fetch_add(1, Ordering::Relaxed));
        cookies.insert(id, cookie);
        cookie
    }

    /// Whether the calling thread has been registered.
    pub fn is_attached(&self) -> bool {
        let id = std::thread::current().id();
        self.cookies.lock().contains_key(&id)
    }

    /// Register the calling thread. Fails once the runtime is shutting down.
    pub fn try_attach(&self) -> bool {
        if self.shutting_down.load(Ordering::Acquire) {
            return false;
        }
        let _ = self.context_cookie();
        true
    }

    /// Refuse new thread registrations from here on.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}
