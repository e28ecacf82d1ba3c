//! A value initialized at most once, on first access, from any CPU.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const POISONED: u8 = 3;

/// A lazily-initialized value safe to share across CPUs before any heap exists.
///
/// Unlike `std::sync::OnceLock`, losing the initialization race doesn't block
/// on a futex — the loser spins, which is the only option before interrupts
/// and a scheduler exist to put it to sleep.
pub struct LazyLock<T, F = fn() -> T> {
    state: AtomicU8,
    init: UnsafeCell<Option<F>>,
    value: UnsafeCell<core::mem::MaybeUninit<T>>,
}

unsafe impl<T: Sync + Send, F: Send> Sync for LazyLock<T, F> {}

impl<T, F: FnOnce() -> T> LazyLock<T, F> {
    /// Creates a `LazyLock` that will run `init` on first access.
    pub const fn new(init: F) -> Self {
        Self {
            state: AtomicU8::new(UNINIT),
            init: UnsafeCell::new(Some(init)),
            value: UnsafeCell::new(core::mem::MaybeUninit::uninit()),
        }
    }

    /// Returns a reference to the value, running the initializer on first call.
    ///
    /// Panics if a previous call's initializer panicked.
    pub fn get(&self) -> &T {
        loop {
            match self.state.compare_exchange(
                UNINIT,
                INITIALIZING,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let f = unsafe { (*self.init.get()).take() }.expect("init fn already taken");
                    let value = f();
                    unsafe { (*self.value.get()).write(value) };
                    self.state.store(READY, Ordering::Release);
                    return unsafe { (*self.value.get()).assume_init_ref() };
                }
                Err(READY) => return unsafe { (*self.value.get()).assume_init_ref() },
                Err(POISONED) => panic!("LazyLock initializer panicked"),
                Err(INITIALIZING) => core::hint::spin_loop(),
                Err(_) => unreachable!(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn initializes_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let lazy = LazyLock::new(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            42
        });
        assert_eq!(*lazy.get(), 42);
        assert_eq!(*lazy.get(), 42);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
