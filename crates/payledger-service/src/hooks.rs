//! Host instrumentation hooks.

/// Called by the service around its run loop.
///
/// Profilers and other process instrumentation attach here.
pub trait HostHooks: Send + Sync {
    /// Runs before the listener binds.
    fn start(&self) {}

    /// Runs after the server and workers have stopped.
    fn stop(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl HostHooks for NoopHooks {}
