//! Synchronization primitives over `std::sync` that ignore poisoning.

use std::sync as std_sync;
use std::time::Duration;

/// Registry lock. A panic while holding it leaves the data as it was.
pub struct Mutex<T> {
  inner: std_sync::Mutex<T>,
}

impl<T> Mutex<T> {
  pub const fn new(value: T) -> Self {
    Self { inner: std_sync::Mutex::new(value) }
  }

  pub fn lock(&self) -> MutexGuard<'_, T> {
    MutexGuard { inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
  }
}

/// Held lock. [`Condvar`] takes it by value and hands it back on wakeup.
pub struct MutexGuard<'a, T> {
  inner: std_sync::MutexGuard<'a, T>,
}

impl<T> std::ops::Deref for MutexGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.inner
  }
}

impl<T> std::ops::DerefMut for MutexGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    &mut self.inner
  }
}

/// Wakes engine calls parked on the registry [`Mutex`].
pub struct Condvar {
  inner: std_sync::Condvar,
}

impl Condvar {
  pub const fn new() -> Self {
    Self { inner: std_sync::Condvar::new() }
  }

  /// Blocks until notified. Spurious wakeups are possible.
  pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    let inner =
      self.inner.wait(guard.inner).unwrap_or_else(|e| e.into_inner());
    MutexGuard { inner }
  }

  /// Blocks until notified or `timeout` elapses. Returns `true` on timeout.
  pub fn wait_timeout<'a, T>(
    &self,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
  ) -> (MutexGuard<'a, T>, bool) {
    let (inner, result) = self
      .inner
      .wait_timeout(guard.inner, timeout)
      .unwrap_or_else(|e| e.into_inner());
    (MutexGuard { inner }, result.timed_out())
  }

  pub fn notify_all(&self) {
    self.inner.notify_all();
  }
}

impl Default for Condvar {
  fn default() -> Self {
    Self::new()
  }
}
