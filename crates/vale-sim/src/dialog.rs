//! Interactive dialog (menu/quest) interpreter.
//!
//! A dialog is a graph of prompt steps joined by labeled answer edges.
//! Moving along an edge first evaluates the edge's named checkpoints
//! against a registry of predicates; a failing or unknown checkpoint
//! reports `false` and the step simply does not advance. Every transition
//! emits a [`DialogEvent`] to subscribed listeners so the host knows when
//! the interpreter finished and should be discarded.
//!
//! A session owns at most one live interpreter. Movement, combat, sleep or
//! freeze onset, and logout all clear it; enforcement lives with the
//! session, not here.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use vale_types::Character;

/// Identifier of one step inside a graph.
pub type StepId = u32;

// ---------------------------------------------------------------------------
// Step graph
// ---------------------------------------------------------------------------

/// A named checkpoint on an answer edge, with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Predicate name in the [`CheckpointRegistry`].
    pub name: String,
    /// Arguments passed to the predicate.
    pub args: Vec<String>,
}

impl Checkpoint {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// One labeled answer edge out of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Label the client sends back ("next", "back", "close", or a custom
    /// menu option).
    pub label: String,
    /// Checkpoints that must all pass before the edge is taken.
    pub checkpoints: Vec<Checkpoint>,
    /// Destination step. `None` terminates the dialog.
    pub next: Option<StepId>,
}

impl Answer {
    /// A plain "next" edge to `to`.
    pub fn next(to: StepId) -> Self {
        Self::labeled("next", Some(to))
    }

    /// A plain "back" edge to `to`.
    pub fn back(to: StepId) -> Self {
        Self::labeled("back", Some(to))
    }

    /// A "close" edge that terminates the dialog.
    pub fn close() -> Self {
        Self::labeled("close", None)
    }

    /// A custom edge.
    pub fn labeled(label: impl Into<String>, next: Option<StepId>) -> Self {
        Self {
            label: label.into(),
            checkpoints: Vec::new(),
            next,
        }
    }

    /// Adds a checkpoint to the edge.
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }
}

/// One prompt step. A step with no answers is terminal: any `move` on it
/// finishes the dialog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub prompt: String,
    pub answers: Vec<Answer>,
}

/// The loaded dialog definition: an entry step plus the step table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepGraph {
    entry: StepId,
    steps: FxHashMap<StepId, Step>,
}

impl StepGraph {
    /// Builds a graph from `steps`, entering at `entry`.
    pub fn new(entry: StepId, steps: Vec<Step>) -> Self {
        Self {
            entry,
            steps: steps.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    /// A straight-line dialog: each prompt links to the following one with
    /// a "next" edge; the final step is terminal.
    pub fn linear(prompts: &[&str]) -> Self {
        let steps = prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| {
                let id = i as StepId + 1;
                let answers = if i + 1 < prompts.len() {
                    vec![Answer::next(id + 1)]
                } else {
                    Vec::new()
                };
                Step {
                    id,
                    prompt: (*prompt).to_string(),
                    answers,
                }
            })
            .collect();
        Self::new(1, steps)
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn entry(&self) -> StepId {
        self.entry
    }
}

// ---------------------------------------------------------------------------
// Checkpoint registry
// ---------------------------------------------------------------------------

/// A checkpoint predicate. May mutate the character (the quest-complete
/// action does); must not panic and must not block.
pub type CheckpointFn = Arc<dyn Fn(&mut Character, &[String]) -> bool + Send + Sync>;

/// Name -> predicate table, registered ahead of time. Unknown names
/// evaluate to `false`.
#[derive(Default)]
pub struct CheckpointRegistry {
    predicates: FxHashMap<String, CheckpointFn>,
}

impl CheckpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the stock quest predicates:
    /// `quest_completed(name)` and the `complete_quest(name)` action.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("quest_completed", |c, args| {
            args.first().is_some_and(|name| c.has_completed_quest(name))
        });
        reg.register("complete_quest", |c, args| {
            args.first().is_some_and(|name| c.complete_quest(name))
        });
        reg
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&mut Character, &[String]) -> bool + Send + Sync + 'static,
    ) {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Evaluates one checkpoint. Unknown names report `false`.
    pub fn evaluate(&self, checkpoint: &Checkpoint, character: &mut Character) -> bool {
        match self.predicates.get(&checkpoint.name) {
            Some(predicate) => predicate(character, &checkpoint.args),
            None => false,
        }
    }

    /// Evaluates every checkpoint on an edge; all must pass.
    pub fn evaluate_all(&self, checkpoints: &[Checkpoint], character: &mut Character) -> bool {
        checkpoints.iter().all(|c| self.evaluate(c, character))
    }
}

// ---------------------------------------------------------------------------
// Dialog library
// ---------------------------------------------------------------------------

/// Resolves a definition key to its step graph. A missing definition is
/// "no dialog available", never a fault.
pub trait DialogLibrary: Send + Sync {
    fn step_graph(&self, key: &str) -> Option<StepGraph>;
}

/// Map-backed library for tests and static content.
#[derive(Default)]
pub struct MemoryDialogLibrary {
    graphs: FxHashMap<String, StepGraph>,
}

impl MemoryDialogLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, graph: StepGraph) {
        self.graphs.insert(key.into(), graph);
    }
}

impl DialogLibrary for MemoryDialogLibrary {
    fn step_graph(&self, key: &str) -> Option<StepGraph> {
        self.graphs.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Emitted on every interpreter transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogEvent {
    /// The dialog entered its first step.
    Started(StepId),
    /// The dialog moved along an edge.
    Moved { from: StepId, to: StepId },
    /// The dialog terminated; the interpreter should be discarded.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterpState {
    Uninitialized,
    Active(StepId),
    Finished,
}

/// A live dialog instance bound to one session.
pub struct Interpreter {
    graph: StepGraph,
    state: InterpState,
    listeners: Vec<Sender<DialogEvent>>,
    actor: Option<String>,
}

impl Interpreter {
    pub fn new(graph: StepGraph) -> Self {
        Self {
            graph,
            state: InterpState::Uninitialized,
            listeners: Vec::new(),
            actor: None,
        }
    }

    /// Binds the mundane whose script receives `on_response` for every
    /// answer given in this dialog.
    pub fn with_actor(mut self, key: impl Into<String>) -> Self {
        self.actor = Some(key.into());
        self
    }

    /// Script key of the acting mundane, if any.
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Subscribes to transition events.
    pub fn subscribe(&mut self) -> Receiver<DialogEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.listeners.push(tx);
        rx
    }

    fn emit(&self, event: DialogEvent) {
        for listener in &self.listeners {
            // A dropped receiver is not this interpreter's problem.
            let _ = listener.send(event);
        }
    }

    /// Enters the first step. A second `start` is a no-op returning the
    /// current step. An entry id missing from the graph finishes at once.
    pub fn start(&mut self) -> Option<&Step> {
        match self.state {
            InterpState::Uninitialized => {
                let entry = self.graph.entry();
                if self.graph.step(entry).is_some() {
                    self.state = InterpState::Active(entry);
                    self.emit(DialogEvent::Started(entry));
                    self.graph.step(entry)
                } else {
                    self.state = InterpState::Finished;
                    self.emit(DialogEvent::Finished);
                    None
                }
            }
            InterpState::Active(id) => self.graph.step(id),
            InterpState::Finished => None,
        }
    }

    /// The step the dialog is currently showing, if active.
    pub fn current_step(&self) -> Option<&Step> {
        match self.state {
            InterpState::Active(id) => self.graph.step(id),
            _ => None,
        }
    }

    /// True once the dialog terminated.
    pub fn finished(&self) -> bool {
        self.state == InterpState::Finished
    }

    /// Follows the answer edge labeled `label` from the current step.
    ///
    /// Returns the new step, or `None` once the dialog finished. A `move`
    /// on a terminal step (no answers) finishes the dialog; an unmatched
    /// label or a failing checkpoint leaves the current step in place.
    /// Calling after `finished` is a no-op.
    pub fn move_to(
        &mut self,
        label: &str,
        character: &mut Character,
        checkpoints: &CheckpointRegistry,
    ) -> Option<&Step> {
        let InterpState::Active(from) = self.state else {
            return None;
        };
        let Some(step) = self.graph.step(from) else {
            self.state = InterpState::Finished;
            self.emit(DialogEvent::Finished);
            return None;
        };

        if step.answers.is_empty() {
            // Terminal step: any answer dismisses the dialog.
            self.state = InterpState::Finished;
            self.emit(DialogEvent::Finished);
            return None;
        }

        let Some(answer) = step.answers.iter().find(|a| a.label == label) else {
            return self.graph.step(from);
        };

        if !checkpoints.evaluate_all(&answer.checkpoints, character) {
            return self.graph.step(from);
        }

        match answer.next {
            Some(to) if self.graph.step(to).is_some() => {
                self.state = InterpState::Active(to);
                self.emit(DialogEvent::Moved { from, to });
                self.graph.step(to)
            }
            _ => {
                // Explicit close, or an edge into a missing step.
                self.state = InterpState::Finished;
                self.emit(DialogEvent::Finished);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
