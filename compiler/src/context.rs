// context.rs — Explicit pulse context: current sequence, programmer, observers
//
// Holds what a front end works with between calls: the named sequence being
// edited, the programmer handle used to reach the board, parameter
// overrides, the end action, and observers notified of every change.
//
// Preconditions: `program`, `start` and `stop` need a programmer attached;
//   `program` also needs a sequence.
// Postconditions: observers see `Preprogram` and `Program` around every
//   programming attempt, whether it succeeds or not.
// Failure modes: `NoSequence`, `NoProgrammer`, evaluation and emission errors.
// Side effects: driver calls through the programmer; observer callbacks.

use std::fmt;
use std::path::Path;

use tracing::info;

use crate::document::read_pulse_file;
use crate::emit::{EndAction, Instruction, Programmer};
use crate::error::{Error, Result};
use crate::params::{ParamValue, Params};
use crate::sequence::Sequence;

/// Notifications delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sequence { name: String },
    Programmer,
    Preprogram,
    Program {
        instructions: usize,
        error: Option<String>,
    },
    Start,
    Stop,
}

type Observer = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct PulseContext {
    sequence: Option<(String, Sequence)>,
    programmer: Option<Programmer>,
    params: Params,
    end_action: EndAction,
    observers: Vec<Observer>,
}

impl fmt::Debug for PulseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseContext")
            .field("sequence", &self.name())
            .field("programmer", &self.programmer.as_ref().map(Programmer::id))
            .field("params", &self.params)
            .field("end_action", &self.end_action)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PulseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: impl Fn(&Event) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn set_sequence(&mut self, name: impl Into<String>, sequence: Sequence) {
        let name = name.into();
        info!(sequence = %name, "sequence attached");
        self.sequence = Some((name.clone(), sequence));
        self.notify(&Event::Sequence { name });
    }

    /// Load a document and attach it under its file stem.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let sequence = read_pulse_file(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string());
        self.set_sequence(name, sequence);
        Ok(())
    }

    pub fn sequence(&self) -> Option<&Sequence> {
        self.sequence.as_ref().map(|(_, s)| s)
    }

    pub fn name(&self) -> Option<&str> {
        self.sequence.as_ref().map(|(n, _)| n.as_str())
    }

    pub fn set_programmer(&mut self, programmer: Programmer) {
        self.programmer = Some(programmer);
        self.notify(&Event::Programmer);
    }

    pub fn programmer(&self) -> Option<&Programmer> {
        self.programmer.as_ref()
    }

    /// Store an override used by every later `program` call.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.insert(name, value);
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_end_action(&mut self, end_action: EndAction) {
        self.end_action = end_action;
    }

    /// Evaluate, merge and emit the current sequence.
    ///
    /// With `stopping`, a running sequence is stopped first; otherwise a
    /// running board makes emission fail.
    pub fn program(&self, stopping: bool) -> Result<Vec<Instruction>> {
        let (_, sequence) = self.sequence.as_ref().ok_or(Error::NoSequence)?;
        let programmer = self.programmer.as_ref().ok_or(Error::NoProgrammer)?;
        if stopping {
            self.stop()?;
        }

        self.notify(&Event::Preprogram);
        let result = self.compile(sequence, programmer);
        self.notify(&Event::Program {
            instructions: result.as_ref().map_or(0, Vec::len),
            error: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    pub fn start(&self) -> Result<()> {
        let programmer = self.programmer.as_ref().ok_or(Error::NoProgrammer)?;
        programmer.start()?;
        self.notify(&Event::Start);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let programmer = self.programmer.as_ref().ok_or(Error::NoProgrammer)?;
        programmer.stop()?;
        self.notify(&Event::Stop);
        Ok(())
    }

    fn compile(&self, sequence: &Sequence, programmer: &Programmer) -> Result<Vec<Instruction>> {
        let raw = sequence.eval(&self.params)?;
        Ok(programmer.emit(&raw.timeline(), self.end_action)?)
    }

    fn notify(&self, event: &Event) {
        for observer in &self.observers {
            observer(event);
        }
    }
}
