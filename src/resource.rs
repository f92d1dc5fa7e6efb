//! A shared bag of interchangeable resource tokens.

use crate::util::Backoff;
use crossbeam_deque::{Injector, Steal};
use std::fmt;

/// Thread-safe pool of opaque tokens gating concurrent task execution.
///
/// A token is either in the pool or checked out by whoever acquired it.
/// The pool does not track holders and does not cap `release`: returning a
/// token that never came from the pool grows it.
pub struct ResourcePool<T> {
    tokens: Injector<T>,
    capacity: usize,
}

impl<T> ResourcePool<T> {
    pub fn new<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let injector = Injector::new();
        let mut capacity = 0;
        for token in tokens {
            injector.push(token);
            capacity += 1;
        }

        Self {
            tokens: injector,
            capacity,
        }
    }

    /// Take a token, spinning until one is available.
    pub fn acquire(&self) -> T {
        let mut backoff = Backoff::new();
        loop {
            if let Some(token) = self.try_acquire() {
                return token;
            }
            backoff.snooze();
        }
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> Option<T> {
        loop {
            match self.tokens.steal() {
                Steal::Success(token) => return Some(token),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub fn release(&self, token: T) {
        self.tokens.push(token);
    }

    /// Tokens currently sitting in the pool.
    pub fn available(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens supplied at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("available", &self.available())
            .field("capacity", &self.capacity)
            .finish()
    }
}
