//! Shared background-ticker helper used by the replay caches (C3), the
//! session manager's GC (C7), and the handshake pending-context sweeper (C8).

use std::thread::JoinHandle;
use std::time::Duration;

/// Spawn a daemon thread that calls `tick` every `interval` until the
/// process exits. The handle is returned so a caller that wants explicit
/// lifecycle control can join or drop it; most callers let it run for the
/// life of the process.
pub fn spawn_periodic<F>(interval: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    std::thread::spawn(move || loop {
        std::thread::sleep(interval);
        tick();
    })
}
