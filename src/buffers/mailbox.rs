//! Latest-value mailbox used on the reception side.
//!
//! One slot per registered frame key. A write replaces the slot's value, a
//! read hands out a copy without consuming it. The read count of each slot
//! detects both data-loss directions:
//!
//! | Situation                                  | Signal   |
//! |--------------------------------------------|----------|
//! | write over a value that was never read     | overrun  |
//! | read of a value that was already read      | underrun |

use std::collections::BTreeMap;

use crate::error::SimError;
use crate::simulation::observer::ObserverHandle;
use crate::simulation::types::FrameKey;

/// A stored value and how often it has been read since it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedFrame<F> {
    frame: F,
    read_count: u32,
}

impl<F> BufferedFrame<F> {
    pub fn new(frame: F) -> Self {
        BufferedFrame { frame, read_count: 0 }
    }

    /// Mark one more read and hand out the value.
    pub fn read(&mut self) -> &F {
        self.read_count = self.read_count.saturating_add(1);
        &self.frame
    }

    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    pub fn frame(&self) -> &F {
        &self.frame
    }
}

/// Outcome of a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The slot was empty or its previous value had been read.
    Stored,
    /// The previous value was never read and is lost.
    Overrun,
}

pub struct BufferedMailbox<F> {
    owner: String,
    slots: BTreeMap<FrameKey, Option<BufferedFrame<F>>>,
    observer: ObserverHandle,
}

impl<F: Clone> BufferedMailbox<F> {
    pub fn new(owner: &str, observer: ObserverHandle) -> Self {
        BufferedMailbox {
            owner: owner.to_string(),
            slots: BTreeMap::new(),
            observer,
        }
    }

    /// Declare that `key` will be received. Registering twice is harmless.
    pub fn register(&mut self, key: FrameKey) {
        self.slots.entry(key).or_insert(None);
    }

    pub fn is_registered(&self, key: &FrameKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn registered_keys(&self) -> impl Iterator<Item = &FrameKey> {
        self.slots.keys()
    }

    fn unregistered(&self, key: &FrameKey) -> SimError {
        SimError::UnregisteredFrame {
            component: self.owner.clone(),
            key: key.clone(),
        }
    }

    /// Store `frame` as the latest value of `key`.
    pub fn write(&mut self, key: &FrameKey, frame: F) -> Result<WriteOutcome, SimError> {
        let Some(slot) = self.slots.get_mut(key) else {
            return Err(self.unregistered(key));
        };
        let outcome = match slot {
            Some(previous) if previous.read_count() == 0 => WriteOutcome::Overrun,
            _ => WriteOutcome::Stored,
        };
        *slot = Some(BufferedFrame::new(frame));
        if outcome == WriteOutcome::Overrun {
            self.observer.overrun(key);
        }
        Ok(outcome)
    }

    /// Commit a whole reception cycle. Either every frame is stored or, if
    /// any key is unregistered, none is. Returns the number of overruns.
    pub fn write_batch<I>(&mut self, frames: I) -> Result<usize, SimError>
    where
        I: IntoIterator<Item = (FrameKey, F)>,
    {
        let frames: Vec<(FrameKey, F)> = frames.into_iter().collect();
        if let Some((key, _)) = frames.iter().find(|(key, _)| !self.is_registered(key)) {
            return Err(self.unregistered(key));
        }
        let mut overruns = 0;
        for (key, frame) in frames {
            if self.write(&key, frame)? == WriteOutcome::Overrun {
                overruns += 1;
            }
        }
        Ok(overruns)
    }

    /// Latest value of `key`, or `placeholder()` if nothing was written yet.
    ///
    /// Reading an empty slot does not count as a read.
    pub fn read_or_else(&mut self, key: &FrameKey, placeholder: impl FnOnce() -> F) -> Result<F, SimError> {
        let Some(slot) = self.slots.get_mut(key) else {
            return Err(self.unregistered(key));
        };
        let Some(buffered) = slot.as_mut() else {
            return Ok(placeholder());
        };
        let frame = buffered.read().clone();
        if buffered.read_count() > 1 {
            self.observer.underrun(key);
        }
        Ok(frame)
    }

    /// Read count of the current value of `key`, `None` if empty or unregistered.
    pub fn read_count(&self, key: &FrameKey) -> Option<u32> {
        self.slots.get(key).and_then(|slot| slot.as_ref()).map(BufferedFrame::read_count)
    }

    /// Peek at the current value without counting a read.
    pub fn peek(&self, key: &FrameKey) -> Option<&F> {
        self.slots.get(key).and_then(|slot| slot.as_ref()).map(BufferedFrame::frame)
    }
}
