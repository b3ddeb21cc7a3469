//! Single-writer, many-reader handle swap.
//!
//! The writer builds a complete value off to the side and installs it in one
//! step; readers clone the current `Arc` and never observe a value that is
//! still being built.

use std::sync::{Arc, RwLock};

#[derive(Debug)]
pub struct SwapSlot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SwapSlot<T> {
    pub fn new(initial: T) -> Self {
        Self { current: RwLock::new(Arc::new(initial)) }
    }

    /// Current value. The read lock is held only for the `Arc` clone.
    pub fn load(&self) -> Arc<T> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install `next` and return the value it replaced.
    pub fn swap(&self, next: T) -> Arc<T> {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}

impl<T: Default> Default for SwapSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
