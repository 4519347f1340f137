// emit.rs — Instruction emission to a pulse-sequencer board
//
// Turns a merged timeline into device instructions, one per frame, and
// pushes them through a `Driver`. The last frame carries the end action.
// A `Board` serializes access: at most one `Programmer` holds programming
// mode, and programming is refused while a sequence runs.
//
// Preconditions: the timeline comes from `merge` (no zero-length frames).
// Postconditions: on success the driver holds exactly `timeline.len()`
//   instructions; on any failure the board is idle again.
// Failure modes: empty timeline, frame below `MIN_INSTRUCTION_NS`, board
//   busy or running, driver errors.
// Side effects: driver calls; `tracing` events.

use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::{DriverError, EmitError};
use crate::id::ProgrammerId;
use crate::merge::Timeline;
use crate::sequence::RawSequence;

/// Shortest instruction the device accepts.
pub const MIN_INSTRUCTION_NS: u64 = 5;

// ── Instructions ──

/// Device opcodes used by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Opcode {
    Continue,
    Loop,
    EndLoop,
    Branch,
}

impl Opcode {
    /// Numeric opcode in the device instruction set.
    pub fn code(self) -> u8 {
        match self {
            Opcode::Continue => 0,
            Opcode::Loop => 2,
            Opcode::EndLoop => 3,
            Opcode::Branch => 6,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Continue => "CONTINUE",
            Opcode::Loop => "LOOP",
            Opcode::EndLoop => "END_LOOP",
            Opcode::Branch => "BRANCH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instruction {
    /// Output pattern; bit `c` drives channel `c`.
    pub pattern: u32,
    pub opcode: Opcode,
    pub data: u32,
    /// Nanoseconds.
    pub duration: u64,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:024b}] inst: {} inst_data: {} dt: {}",
            self.pattern, self.opcode, self.data, self.duration
        )
    }
}

/// Control flow attached to the final instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndAction {
    Continue,
    /// Branch to the first instruction of the program.
    #[default]
    BranchToStart,
    Branch(u32),
    Loop(u32),
    EndLoop,
}

impl EndAction {
    /// Opcode and data word for the final instruction.
    pub fn resolve(self, start: u32) -> (Opcode, u32) {
        match self {
            EndAction::Continue => (Opcode::Continue, 0),
            EndAction::BranchToStart => (Opcode::Branch, start),
            EndAction::Branch(target) => (Opcode::Branch, target),
            EndAction::Loop(count) => (Opcode::Loop, count),
            EndAction::EndLoop => (Opcode::EndLoop, start),
        }
    }
}

impl FromStr for EndAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, arg) = match s.split_once(':') {
            Some((k, a)) => (k.trim(), Some(a.trim())),
            None => (s, None),
        };
        let number = |a: &str| {
            a.parse::<u32>()
                .map_err(|_| format!("{a:?} is not a valid instruction operand"))
        };
        match (kind.to_ascii_lowercase().as_str(), arg) {
            ("continue", None) => Ok(EndAction::Continue),
            ("branch", None) => Ok(EndAction::BranchToStart),
            ("branch", Some(a)) => number(a).map(EndAction::Branch),
            ("loop", Some(a)) => number(a).map(EndAction::Loop),
            ("end-loop" | "end_loop", None) => Ok(EndAction::EndLoop),
            _ => Err(format!(
                "unknown end action {s:?} (expected continue, branch, branch:N, loop:N or end-loop)"
            )),
        }
    }
}

impl fmt::Display for EndAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndAction::Continue => write!(f, "continue"),
            EndAction::BranchToStart => write!(f, "branch"),
            EndAction::Branch(target) => write!(f, "branch:{target}"),
            EndAction::Loop(count) => write!(f, "loop:{count}"),
            EndAction::EndLoop => write!(f, "end-loop"),
        }
    }
}

impl Serialize for EndAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Check every frame against the device minimum.
pub fn validate(timeline: &Timeline) -> Result<(), EmitError> {
    if timeline.is_empty() {
        return Err(EmitError::Empty);
    }
    match timeline
        .frames
        .iter()
        .position(|f| f.duration < MIN_INSTRUCTION_NS)
    {
        Some(index) => Err(EmitError::TooShort {
            index,
            duration: timeline.frames[index].duration,
            minimum: MIN_INSTRUCTION_NS,
        }),
        None => Ok(()),
    }
}

/// Instructions for `timeline` as they would be emitted to a board whose
/// first instruction lands at address 0.
pub fn plan(timeline: &Timeline, end: EndAction) -> Result<Vec<Instruction>, EmitError> {
    validate(timeline)?;
    let last = timeline.len() - 1;
    Ok(timeline
        .frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let (opcode, data) = if i == last {
                end.resolve(0)
            } else {
                (Opcode::Continue, 0)
            };
            Instruction {
                pattern: frame.mask,
                opcode,
                data,
                duration: frame.duration,
            }
        })
        .collect())
}

/// Merge `seq` and program it through `programmer`.
pub fn emit(
    seq: &RawSequence,
    end: EndAction,
    programmer: &Programmer,
) -> Result<Vec<Instruction>, EmitError> {
    programmer.emit(&seq.timeline(), end)
}

/// Write `program` as a listing to the first free `program_log_<n>` in `dir`.
pub fn write_program_log(dir: &Path, program: &[Instruction]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut n = 0;
    let path = loop {
        let candidate = dir.join(format!("program_log_{n}"));
        if !candidate.exists() {
            break candidate;
        }
        n += 1;
    };
    let mut file = std::fs::File::create(&path)?;
    for instruction in program {
        writeln!(file, "{instruction}")?;
    }
    debug!(path = %path.display(), "program log written");
    Ok(path)
}

// ── Driver seam ──

/// Device collaborator. Implementations talk to hardware; the core only
/// uses this trait, so emission can be tested without a board.
pub trait Driver: Send + Sync {
    fn enter_programming(&self) -> Result<(), DriverError>;

    /// Append one instruction and return its address.
    fn add_instruction(&self, instruction: &Instruction) -> Result<u32, DriverError>;

    fn exit_programming(&self) -> Result<(), DriverError>;

    /// Whether the device is executing a program, whoever started it.
    fn is_running(&self) -> bool;

    fn start(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    programming: bool,
    running: bool,
    pending: Vec<Instruction>,
    committed: Vec<Instruction>,
    programs: usize,
}

/// In-memory driver: records committed programs.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    state: Mutex<SimulatedState>,
    fail_after: Option<usize>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose `n+1`-th instruction of every program fails.
    pub fn failing_after(n: usize) -> Self {
        SimulatedDriver {
            fail_after: Some(n),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The most recently committed program.
    pub fn program(&self) -> Vec<Instruction> {
        self.lock().committed.clone()
    }

    /// Number of completed programming sessions.
    pub fn programs(&self) -> usize {
        self.lock().programs
    }

    pub fn is_programming(&self) -> bool {
        self.lock().programming
    }
}

impl Driver for SimulatedDriver {
    fn enter_programming(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.programming {
            return Err(DriverError("already programming".into()));
        }
        state.programming = true;
        state.pending.clear();
        Ok(())
    }

    fn add_instruction(&self, instruction: &Instruction) -> Result<u32, DriverError> {
        let mut state = self.lock();
        if !state.programming {
            return Err(DriverError("not in programming mode".into()));
        }
        if self.fail_after == Some(state.pending.len()) {
            return Err(DriverError(format!(
                "simulated failure at instruction {}",
                state.pending.len()
            )));
        }
        state.pending.push(*instruction);
        u32::try_from(state.pending.len() - 1)
            .map_err(|_| DriverError("instruction memory exhausted".into()))
    }

    fn exit_programming(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if !state.programming {
            return Err(DriverError("not in programming mode".into()));
        }
        state.programming = false;
        state.committed = std::mem::take(&mut state.pending);
        state.programs += 1;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.lock().running
    }

    fn start(&self) -> Result<(), DriverError> {
        self.lock().running = true;
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        self.lock().running = false;
        Ok(())
    }
}

// ── Board ownership ──

#[derive(Debug, Default)]
struct BoardState {
    programmer: Option<ProgrammerId>,
}

/// One physical board shared by every programmer in the process.
pub struct Board {
    driver: Arc<dyn Driver>,
    state: Mutex<BoardState>,
    next_id: AtomicU64,
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("driver", &"<dyn Driver>")
            .field("state", &*self.lock())
            .finish()
    }
}

impl Board {
    pub fn new(driver: Arc<dyn Driver>) -> Arc<Self> {
        Arc::new(Board {
            driver,
            state: Mutex::new(BoardState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// A board backed by a fresh `SimulatedDriver`.
    pub fn simulated() -> Arc<Self> {
        Self::new(Arc::new(SimulatedDriver::new()))
    }

    /// A new handle with its own identity.
    pub fn programmer(self: &Arc<Self>) -> Programmer {
        Programmer {
            board: Arc::clone(self),
            id: ProgrammerId(self.next_id.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn is_programming(&self) -> bool {
        self.lock().programmer.is_some()
    }

    /// Asks the driver; the device may have been started elsewhere.
    pub fn is_running(&self) -> bool {
        self.driver.is_running()
    }

    /// Stop the running sequence, if any.
    pub fn stop(&self) -> Result<(), EmitError> {
        let _state = self.lock();
        if self.driver.is_running() {
            self.driver.stop()?;
            info!("sequence stopped");
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A caller's handle on a board.
#[derive(Debug, Clone)]
pub struct Programmer {
    board: Arc<Board>,
    id: ProgrammerId,
}

impl Programmer {
    pub fn id(&self) -> ProgrammerId {
        self.id
    }

    pub fn board(&self) -> &Arc<Board> {
        &self.board
    }

    /// Enter programming mode. Fails fast when another programmer holds it
    /// or the board is running.
    pub fn begin(&self) -> Result<ProgrammingSession<'_>, EmitError> {
        let mut state = self.board.lock();
        if self.board.driver.is_running() {
            return Err(EmitError::Running);
        }
        if state.programmer.is_some() {
            return Err(EmitError::Busy);
        }
        self.board.driver.enter_programming()?;
        state.programmer = Some(self.id);
        debug!(programmer = self.id.0, "entered programming mode");
        Ok(ProgrammingSession {
            programmer: self,
            instructions: Vec::new(),
            start: None,
            open: true,
        })
    }

    /// Program `timeline`, one instruction per frame.
    ///
    /// Durations are checked before programming mode is entered. A
    /// single-frame timeline yields one instruction carrying `end`.
    pub fn emit(&self, timeline: &Timeline, end: EndAction) -> Result<Vec<Instruction>, EmitError> {
        validate(timeline)?;
        let mut session = self.begin()?;
        let last = timeline.len() - 1;
        for (i, frame) in timeline.frames.iter().enumerate() {
            let (opcode, data) = if i == last {
                end.resolve(session.start_address().unwrap_or(0))
            } else {
                (Opcode::Continue, 0)
            };
            session.add(Instruction {
                pattern: frame.mask,
                opcode,
                data,
                duration: frame.duration,
            })?;
        }
        let program = session.finish()?;
        info!(
            instructions = program.len(),
            length_ns = timeline.total_ns(),
            end = %end,
            "programming completed"
        );
        Ok(program)
    }

    /// Run the programmed sequence, leaving our own programming mode first.
    pub fn start(&self) -> Result<(), EmitError> {
        let mut state = self.board.lock();
        match state.programmer {
            Some(id) if id == self.id => {
                self.board.driver.exit_programming()?;
                state.programmer = None;
            }
            Some(_) => return Err(EmitError::Busy),
            None => {}
        }
        if self.board.driver.is_running() {
            return Err(EmitError::Running);
        }
        self.board.driver.start()?;
        info!(programmer = self.id.0, "sequence started");
        Ok(())
    }

    /// Stop the board's running sequence.
    pub fn stop(&self) -> Result<(), EmitError> {
        self.board.stop()
    }
}

/// Open programming mode. Dropping an unfinished session aborts it and
/// exits programming mode.
#[derive(Debug)]
pub struct ProgrammingSession<'a> {
    programmer: &'a Programmer,
    instructions: Vec<Instruction>,
    start: Option<u32>,
    open: bool,
}

impl ProgrammingSession<'_> {
    /// Append one instruction and return its address.
    pub fn add(&mut self, instruction: Instruction) -> Result<u32, EmitError> {
        if !self.open {
            return Err(EmitError::NotProgramming);
        }
        if instruction.duration < MIN_INSTRUCTION_NS {
            return Err(EmitError::TooShort {
                index: self.instructions.len(),
                duration: instruction.duration,
                minimum: MIN_INSTRUCTION_NS,
            });
        }
        let address = self.programmer.board.driver.add_instruction(&instruction)?;
        debug!(address, %instruction, "instruction added");
        self.instructions.push(instruction);
        self.start.get_or_insert(address);
        Ok(address)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Address of the first instruction added in this session.
    pub fn start_address(&self) -> Option<u32> {
        self.start
    }

    /// Exit programming mode and return the instructions added.
    pub fn finish(mut self) -> Result<Vec<Instruction>, EmitError> {
        self.close()?;
        Ok(std::mem::take(&mut self.instructions))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let board = &self.programmer.board;
        let mut state = board.lock();
        let result = board.driver.exit_programming();
        if state.programmer == Some(self.programmer.id) {
            state.programmer = None;
        }
        result
    }
}

impl Drop for ProgrammingSession<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        warn!(
            instructions = self.instructions.len(),
            "aborting programming, exiting programming mode"
        );
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to exit programming mode");
        }
    }
}
