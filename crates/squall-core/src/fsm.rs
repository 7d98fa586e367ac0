//! Generic table-driven state machine
//!
//! Reusable sequencing for anything with enum states and enum inputs: each
//! state may have an entry action, and a `(state, input)` table decides
//! transitions. Entry actions may hand back a follow-up input, which is
//! dispatched in order once the current transition completes - re-entrant
//! input is queued, never nested.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Action run when a state is entered. May return a follow-up input to feed
/// back into the machine.
pub type EntryAction<I> = Box<dyn FnMut() -> Option<I> + Send>;

/// Table-driven finite-state machine over `Copy` enum states and inputs.
///
/// Unknown `(state, input)` pairs leave the state unchanged and run nothing.
pub struct StateMachine<S, I> {
    current: S,
    transitions: HashMap<(S, I), S>,
    entry_actions: HashMap<S, EntryAction<I>>,
}

impl<S, I> StateMachine<S, I>
where
    S: Copy + Eq + Hash,
    I: Copy + Eq + Hash,
{
    /// Create a machine in `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            current: initial,
            transitions: HashMap::new(),
            entry_actions: HashMap::new(),
        }
    }

    /// Register a transition: `input` received in `from` moves to `to`.
    pub fn transition(mut self, from: S, input: I, to: S) -> Self {
        self.transitions.insert((from, input), to);
        self
    }

    /// Register the entry action for `state`.
    pub fn on_enter(mut self, state: S, action: impl FnMut() -> Option<I> + Send + 'static) -> Self {
        self.entry_actions.insert(state, Box::new(action));
        self
    }

    /// The current state.
    pub fn state(&self) -> S {
        self.current
    }

    /// Dispatch an input, then any follow-up inputs produced by entry
    /// actions, in arrival order. Returns the settled state.
    pub fn send_input(&mut self, input: I) -> S {
        let mut pending = VecDeque::new();
        pending.push_back(input);

        while let Some(input) = pending.pop_front() {
            let Some(&next) = self.transitions.get(&(self.current, input)) else {
                continue;
            };
            self.current = next;
            if let Some(action) = self.entry_actions.get_mut(&next) {
                if let Some(follow_up) = action() {
                    pending.push_back(follow_up);
                }
            }
        }

        self.current
    }
}
