//! Sticky command deadlines.
//!
//! Only the outermost caller may set a deadline. A nested operation that
//! tries to set its own gets `false` and must leave the deadline alone,
//! which [`CommandTimer`] takes care of.

/// Something holding a single command deadline.
pub trait CommandDeadline {
    /// Apply a deadline of `seconds`. Returns `false` and changes nothing
    /// when a deadline is already active or none can be applied.
    fn set_command_timeout(&mut self, seconds: u32) -> bool;

    /// Remove the active deadline.
    fn clear_command_timeout(&mut self);
}

/// Scoped deadline: clears on [`finish`](Self::finish) only what it set.
#[derive(Debug)]
#[must_use = "a started timer must be finished"]
pub struct CommandTimer {
    armed: bool,
}

impl CommandTimer {
    /// Try to set a deadline of `seconds` on `target`.
    pub fn start(target: &mut impl CommandDeadline, seconds: u32) -> Self {
        Self {
            armed: target.set_command_timeout(seconds),
        }
    }

    /// Whether this timer set the deadline.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Clear the deadline if this timer set it.
    pub fn finish(self, target: &mut impl CommandDeadline) {
        if self.armed {
            target.clear_command_timeout();
        }
    }
}
