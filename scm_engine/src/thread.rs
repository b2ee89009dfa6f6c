use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use scm_formats::instruction::VARIABLE_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ScriptResult};

/// Local slots that count up by the elapsed milliseconds of every tick the
/// thread runs.
pub const TIMER_SLOTS: [usize; 2] = [16, 17];

pub const DEFAULT_THREAD_NAME: &str = "noname";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    #[default]
    And,
    Or,
}

/// The condition register plus the pending AND/OR run opened by `andor`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionState {
    pub result: bool,
    pub pending: u8,
    pub mode: ConditionMode,
    pub accumulator: bool,
}

impl ConditionState {
    /// Opens a run of tests: `0` is a single test, `1..=7` ANDs `n + 1`
    /// tests, `21..=27` ORs `n - 19` tests.
    pub fn begin(&mut self, count: i32) -> ScriptResult<()> {
        let (pending, mode) = match count {
            0..=7 => (count + 1, ConditionMode::And),
            21..=27 => (count - 19, ConditionMode::Or),
            other => return Err(ScriptError::InvalidConditionCount(other)),
        };
        self.pending = pending as u8;
        self.mode = mode;
        self.accumulator = mode == ConditionMode::And;
        Ok(())
    }

    /// Records one test outcome, already adjusted for the negate flag.
    pub fn record(&mut self, value: bool) {
        if self.pending == 0 {
            self.result = value;
            return;
        }
        self.pending -= 1;
        self.accumulator = match self.mode {
            ConditionMode::And => self.accumulator && value,
            ConditionMode::Or => self.accumulator || value,
        };
        self.result = self.accumulator;
    }

    /// Reads the register for a branch and clears the whole run.
    pub fn consume(&mut self) -> bool {
        let result = self.result;
        *self = ConditionState::default();
        result
    }
}

/// One cooperatively scheduled script context.
#[derive(Debug, Clone)]
pub struct ScriptThread {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    pub(crate) base_address: u32,
    pub program_counter: u32,
    pub(crate) locals: Vec<u8>,
    pub condition: ConditionState,
    /// Machine clock value at which the thread may run again.
    pub(crate) wake_at: u64,
    pub(crate) yielded: bool,
    pub(crate) calls: Vec<u32>,
    pub(crate) max_call_depth: usize,
    pub(crate) is_mission: bool,
    pub death_arrest_check: bool,
    pub wasted_or_busted: bool,
    pub(crate) finished: bool,
}

impl ScriptThread {
    pub(crate) fn new(
        id: ThreadId,
        start: u32,
        is_mission: bool,
        bank_len: usize,
        max_call_depth: usize,
    ) -> Self {
        ScriptThread {
            id,
            name: DEFAULT_THREAD_NAME.to_string(),
            base_address: start,
            program_counter: start,
            locals: vec![0; bank_len],
            condition: ConditionState::default(),
            wake_at: 0,
            yielded: false,
            calls: Vec::with_capacity(max_call_depth),
            max_call_depth,
            is_mission,
            death_arrest_check: true,
            wasted_or_busted: false,
            finished: false,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn is_mission(&self) -> bool {
        self.is_mission
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn wake_at(&self) -> u64 {
        self.wake_at
    }

    pub fn call_depth(&self) -> usize {
        self.calls.len()
    }

    pub fn locals(&self) -> &[u8] {
        &self.locals
    }

    pub fn local_slots(&self) -> usize {
        self.locals.len() / VARIABLE_SIZE
    }

    pub fn read_local_i32(&self, index: usize) -> ScriptResult<i32> {
        self.local(index).map(LittleEndian::read_i32)
    }

    pub fn read_local_f32(&self, index: usize) -> ScriptResult<f32> {
        self.local(index).map(LittleEndian::read_f32)
    }

    pub fn write_local_i32(&mut self, index: usize, value: i32) -> ScriptResult<()> {
        LittleEndian::write_i32(self.local_mut(index)?, value);
        Ok(())
    }

    pub fn write_local_f32(&mut self, index: usize, value: f32) -> ScriptResult<()> {
        LittleEndian::write_f32(self.local_mut(index)?, value);
        Ok(())
    }

    /// Negative labels are offsets from the thread's base address.
    pub fn localize_label(&self, label: i32) -> u32 {
        if label < 0 {
            self.base_address.wrapping_add(label.unsigned_abs())
        } else {
            label as u32
        }
    }

    pub fn jump(&mut self, label: i32) {
        self.program_counter = self.localize_label(label);
    }

    pub fn push_call(&mut self, target: i32) -> ScriptResult<()> {
        if self.calls.len() >= self.max_call_depth {
            return Err(ScriptError::CallStackOverflow {
                depth: self.calls.len(),
            });
        }
        self.calls.push(self.program_counter);
        self.jump(target);
        Ok(())
    }

    pub fn pop_call(&mut self) -> ScriptResult<()> {
        self.program_counter = self.calls.pop().ok_or(ScriptError::CallStackUnderflow)?;
        Ok(())
    }

    /// Drops every pending return and resumes at the outermost one.
    pub(crate) fn unwind_calls(&mut self) {
        if let Some(&outermost) = self.calls.first() {
            self.program_counter = outermost;
        }
        self.calls.clear();
    }

    /// Suspends until `wake_at`; the current tick's run ends either way.
    pub(crate) fn sleep_until(&mut self, wake_at: u64) {
        self.wake_at = wake_at;
        self.yielded = true;
    }

    pub fn terminate(&mut self) {
        self.finished = true;
        self.yielded = true;
    }

    pub(crate) fn advance_timers(&mut self, elapsed_ms: u32) {
        for slot in TIMER_SLOTS {
            let range = slot * VARIABLE_SIZE..(slot + 1) * VARIABLE_SIZE;
            if let Some(bytes) = self.locals.get_mut(range) {
                let value = LittleEndian::read_i32(bytes).wrapping_add(elapsed_ms as i32);
                LittleEndian::write_i32(bytes, value);
            }
        }
    }

    fn local(&self, index: usize) -> ScriptResult<&[u8]> {
        let slots = self.local_slots();
        let start = index.saturating_mul(VARIABLE_SIZE);
        self.locals
            .get(start..start.saturating_add(VARIABLE_SIZE))
            .ok_or(ScriptError::LocalOutOfRange { index, slots })
    }

    fn local_mut(&mut self, index: usize) -> ScriptResult<&mut [u8]> {
        let slots = self.local_slots();
        let start = index.saturating_mul(VARIABLE_SIZE);
        self.locals
            .get_mut(start..start.saturating_add(VARIABLE_SIZE))
            .ok_or(ScriptError::LocalOutOfRange { index, slots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> ScriptThread {
        ScriptThread::new(ThreadId(1), 0x200, true, 32 * VARIABLE_SIZE, 2)
    }

    #[test]
    fn and_run_needs_every_test() {
        let mut state = ConditionState::default();
        state.begin(1).unwrap();
        state.record(true);
        assert!(state.result);
        state.record(false);
        assert!(!state.result);
        assert_eq!(state.pending, 0);
        assert!(!state.consume());
        assert_eq!(state, ConditionState::default());
    }

    #[test]
    fn or_run_needs_any_test() {
        let mut state = ConditionState::default();
        state.begin(22).unwrap();
        assert_eq!(state.pending, 3);
        state.record(false);
        state.record(true);
        state.record(false);
        assert!(state.consume());
    }

    #[test]
    fn tests_outside_a_run_overwrite() {
        let mut state = ConditionState::default();
        state.record(true);
        state.record(false);
        assert!(!state.result);
        assert_eq!(state.pending, 0);
    }

    #[test]
    fn out_of_range_counts_are_rejected() {
        let mut state = ConditionState::default();
        assert_eq!(state.begin(8), Err(ScriptError::InvalidConditionCount(8)));
        assert_eq!(state.begin(28), Err(ScriptError::InvalidConditionCount(28)));
        assert!(state.begin(-1).is_err());
    }

    #[test]
    fn negative_labels_are_relative_to_base() {
        let thread = thread();
        assert_eq!(thread.localize_label(-0x10), 0x210);
        assert_eq!(thread.localize_label(0x40), 0x40);
    }

    #[test]
    fn call_stack_is_bounded() {
        let mut thread = thread();
        thread.program_counter = 0x220;
        thread.push_call(0x300).unwrap();
        thread.push_call(0x400).unwrap();
        assert_eq!(
            thread.push_call(0x500),
            Err(ScriptError::CallStackOverflow { depth: 2 })
        );
        thread.pop_call().unwrap();
        assert_eq!(thread.program_counter, 0x300);
        thread.pop_call().unwrap();
        assert_eq!(thread.program_counter, 0x220);
        assert_eq!(thread.pop_call(), Err(ScriptError::CallStackUnderflow));
    }

    #[test]
    fn unwind_resumes_at_outermost_return() {
        let mut thread = thread();
        thread.program_counter = 0x220;
        thread.push_call(0x300).unwrap();
        thread.push_call(0x400).unwrap();
        thread.unwind_calls();
        assert_eq!(thread.program_counter, 0x220);
        assert_eq!(thread.call_depth(), 0);
    }

    #[test]
    fn timers_count_elapsed_time() {
        let mut thread = thread();
        thread.write_local_i32(16, -100).unwrap();
        thread.advance_timers(40);
        thread.advance_timers(40);
        assert_eq!(thread.read_local_i32(16).unwrap(), -20);
        assert_eq!(thread.read_local_i32(17).unwrap(), 80);
        assert_eq!(thread.read_local_i32(15).unwrap(), 0);
    }

    #[test]
    fn locals_are_bounds_checked() {
        let mut thread = thread();
        assert_eq!(
            thread.write_local_i32(32, 1),
            Err(ScriptError::LocalOutOfRange {
                index: 32,
                slots: 32
            })
        );
        thread.write_local_f32(31, 2.0).unwrap();
        assert_eq!(thread.read_local_f32(31).unwrap(), 2.0);
    }

    #[test]
    fn default_name_until_renamed() {
        let mut thread = thread();
        assert_eq!(thread.name(), "noname");
        thread.set_name("INTRO");
        assert_eq!(thread.name(), "INTRO");
    }
}
