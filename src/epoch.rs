//! Epoch-based deferred reclamation.
//!
//! A reader enters a protected section with [`Epoch::protect`], which
//! publishes the global epoch it observed into a free slot. Retiring an
//! object goes through [`Epoch::defer`]: the action is tagged with the
//! current global epoch, and the global epoch advances. An action runs once
//! every protected slot holds an epoch greater than its tag, i.e. once every
//! reader that might have seen the retired object has left its section.
//!
//! A guard that is never dropped blocks every later action. There is no
//! timeout.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const MAX_SLOTS: usize = 128;

const FREE: u64 = u64::MAX;

type Action = Box<dyn FnOnce() + Send>;

pub struct Epoch {
    global: AtomicU64,
    slots: Box<[AtomicU64]>,
    deferred: Mutex<Vec<(u64, Action)>>,
    pending: AtomicUsize,
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch::new()
    }
}

impl Epoch {
    pub fn new() -> Epoch {
        Epoch {
            global: AtomicU64::new(0),
            slots: (0..MAX_SLOTS).map(|_| AtomicU64::new(FREE)).collect(),
            deferred: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Enters a protected section that lasts until the guard is dropped.
    /// Spins while all slots are taken.
    pub fn protect(&self) -> EpochGuard<'_> {
        loop {
            for (slot, cell) in self.slots.iter().enumerate() {
                if cell.load(Ordering::SeqCst) != FREE {
                    continue;
                }
                let observed = self.global.load(Ordering::SeqCst);
                if cell
                    .compare_exchange(FREE, observed, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return EpochGuard { epoch: self, slot };
                }
            }
            std::thread::yield_now();
        }
    }

    /// Runs `action` once no protected section that started before this call
    /// remains.
    pub fn defer(&self, action: impl FnOnce() + Send + 'static) {
        let tag = self.global.fetch_add(1, Ordering::SeqCst);
        {
            let mut deferred = self.deferred.lock().unwrap();
            deferred.push((tag, Box::new(action)));
            self.pending.fetch_add(1, Ordering::SeqCst);
        }
        self.try_drain();
    }

    /// Number of deferred actions not run yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Runs the actions that became safe, unless another thread is already
    /// doing so. Returns how many ran.
    pub fn try_drain(&self) -> usize {
        if self.pending() == 0 {
            return 0;
        }
        let ready = match self.deferred.try_lock() {
            Ok(mut deferred) => self.take_ready(&mut deferred),
            Err(_) => return 0,
        };
        Self::run(ready)
    }

    /// Like [`Epoch::try_drain`] but waits for the deferred list.
    pub fn drain(&self) -> usize {
        let ready = {
            let mut deferred = self.deferred.lock().unwrap();
            self.take_ready(&mut deferred)
        };
        Self::run(ready)
    }

    fn take_ready(&self, deferred: &mut Vec<(u64, Action)>) -> Vec<Action> {
        let safe = self.safe_epoch();
        let mut ready = Vec::new();
        let mut i = 0;
        while i < deferred.len() {
            if deferred[i].0 < safe {
                ready.push(deferred.swap_remove(i).1);
            } else {
                i += 1;
            }
        }
        self.pending.fetch_sub(ready.len(), Ordering::SeqCst);
        ready
    }

    fn run(ready: Vec<Action>) -> usize {
        let count = ready.len();
        for action in ready {
            action();
        }
        if count > 0 {
            trace!("ran {} deferred actions", count);
        }
        count
    }

    /// Smallest epoch still observed by a protected section.
    fn safe_epoch(&self) -> u64 {
        self.slots
            .iter()
            .map(|cell| cell.load(Ordering::SeqCst))
            .min()
            .unwrap_or(FREE)
    }
}

/// Protected section of an [`Epoch`].
pub struct EpochGuard<'a> {
    epoch: &'a Epoch,
    slot: usize,
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.epoch.slots[self.slot].store(FREE, Ordering::SeqCst);
        self.epoch.try_drain();
    }
}
