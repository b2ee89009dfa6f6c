//! Typed access to an instruction's operands for native function bodies.

use scm_formats::{Parameter, ScriptProgram};

use crate::error::{ScriptError, ScriptResult};
use crate::globals::GlobalStore;
use crate::thread::ScriptThread;
use crate::world::{GameState, Host, ObjectHandle, ObjectKind, World};

/// A thread start requested by a running instruction. Applied once the
/// requesting instruction returns.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub address: u32,
    pub mission: bool,
    /// Raw slot values copied into the new thread's first locals.
    pub locals: Vec<u32>,
}

/// Machine state an instruction may touch besides its own thread.
pub(crate) struct MachineContext<'a> {
    pub program: &'a ScriptProgram,
    pub globals: &'a mut GlobalStore,
    pub host: &'a mut dyn Host,
    pub spawns: &'a mut Vec<SpawnRequest>,
    pub on_mission_flag: &'a mut Option<u16>,
    pub clock_ms: u64,
}

pub struct ScriptArguments<'a> {
    parameters: &'a [Parameter],
    thread: &'a mut ScriptThread,
    context: MachineContext<'a>,
    condition: Option<bool>,
}

impl<'a> ScriptArguments<'a> {
    pub(crate) fn new(
        parameters: &'a [Parameter],
        thread: &'a mut ScriptThread,
        context: MachineContext<'a>,
    ) -> Self {
        ScriptArguments {
            parameters,
            thread,
            context,
            condition: None,
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        self.parameters
    }

    /// Operand count, not counting a trailing end-of-list marker.
    pub fn len(&self) -> usize {
        self.parameters
            .iter()
            .take_while(|parameter| !matches!(parameter, Parameter::EndOfList))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parameter(&self, index: usize) -> ScriptResult<&Parameter> {
        self.parameters
            .get(index)
            .ok_or(ScriptError::MissingParameter { index })
    }

    pub fn int(&self, index: usize) -> ScriptResult<i32> {
        match *self.parameter(index)? {
            Parameter::Int8(v) => Ok(v as i32),
            Parameter::Int16(v) => Ok(v as i32),
            Parameter::Int32(v) => Ok(v),
            Parameter::Global(offset) => self.context.globals.read_i32(offset as usize),
            Parameter::Local(slot) => self.thread.read_local_i32(slot as usize),
            other => Err(type_error(index, "an integer", &other)),
        }
    }

    pub fn float(&self, index: usize) -> ScriptResult<f32> {
        let parameter = self.parameter(index)?;
        match *parameter {
            Parameter::Float16(_) => Ok(parameter.as_f32().unwrap_or_default()),
            Parameter::Global(offset) => self.context.globals.read_f32(offset as usize),
            Parameter::Local(slot) => self.thread.read_local_f32(slot as usize),
            other => Err(type_error(index, "a float", &other)),
        }
    }

    pub fn string(&self, index: usize) -> ScriptResult<String> {
        let parameter = self.parameter(index)?;
        parameter
            .as_text()
            .ok_or_else(|| type_error(index, "a string", parameter))
    }

    /// The slot's raw bits, whichever way the value was encoded.
    pub fn raw_value(&self, index: usize) -> ScriptResult<u32> {
        match *self.parameter(index)? {
            Parameter::Float16(_) => self.float(index).map(f32::to_bits),
            _ => self.int(index).map(|v| v as u32),
        }
    }

    /// A jump target, with negative labels resolved against the thread's base.
    pub fn label(&self, index: usize) -> ScriptResult<u32> {
        let label = self.int(index)?;
        Ok(self.thread.localize_label(label))
    }

    pub fn vec2(&self, first: usize) -> ScriptResult<[f32; 2]> {
        Ok([self.float(first)?, self.float(first + 1)?])
    }

    pub fn vec3(&self, first: usize) -> ScriptResult<[f32; 3]> {
        Ok([
            self.float(first)?,
            self.float(first + 1)?,
            self.float(first + 2)?,
        ])
    }

    pub fn set_int(&mut self, index: usize, value: i32) -> ScriptResult<()> {
        let parameter = *self.parameter(index)?;
        match parameter {
            Parameter::Global(offset) => self.context.globals.write_i32(offset as usize, value),
            Parameter::Local(slot) => self.thread.write_local_i32(slot as usize, value),
            _ => Err(ScriptError::NotAReference { index }),
        }
    }

    pub fn set_float(&mut self, index: usize, value: f32) -> ScriptResult<()> {
        let parameter = *self.parameter(index)?;
        match parameter {
            Parameter::Global(offset) => self.context.globals.write_f32(offset as usize, value),
            Parameter::Local(slot) => self.thread.write_local_f32(slot as usize, value),
            _ => Err(ScriptError::NotAReference { index }),
        }
    }

    pub fn set_object_handle(&mut self, index: usize, handle: ObjectHandle) -> ScriptResult<()> {
        self.set_int(index, handle.id as i32)
    }

    /// Byte offset named by a global reference operand.
    pub fn global_offset(&self, index: usize) -> ScriptResult<u16> {
        match *self.parameter(index)? {
            Parameter::Global(offset) => Ok(offset),
            _ => Err(ScriptError::NotAReference { index }),
        }
    }

    /// A model id. Negative values index the container's model table and are
    /// resolved by name through the world.
    pub fn model(&mut self, index: usize) -> ScriptResult<i32> {
        let value = self.int(index)?;
        if value >= 0 {
            return Ok(value);
        }
        let program = self.context.program;
        let name = program
            .model_name(value.unsigned_abs() as usize)
            .ok_or(ScriptError::BadModelIndex(value))?;
        self.context
            .host
            .world()
            .find_model(name)
            .ok_or_else(|| ScriptError::MissingModel(name.to_string()))
    }

    pub fn try_object(
        &mut self,
        index: usize,
        kind: ObjectKind,
    ) -> ScriptResult<Option<ObjectHandle>> {
        let id = self.int(index)?;
        if id < 0 {
            return Ok(None);
        }
        let id = id as u32;
        let exists = self.context.host.world().object_exists(kind, id);
        Ok(exists.then_some(ObjectHandle { kind, id }))
    }

    pub fn object(&mut self, index: usize, kind: ObjectKind) -> ScriptResult<ObjectHandle> {
        let id = self.int(index)?;
        self.try_object(index, kind)?
            .ok_or(ScriptError::MissingObject { kind, id })
    }

    /// The character a player slot controls. Players live in their own table,
    /// not in the character pool's id space.
    pub fn try_player(&mut self, index: usize) -> ScriptResult<Option<ObjectHandle>> {
        let slot = self.int(index)?;
        if slot < 0 {
            return Ok(None);
        }
        let character = self.context.host.game_state().player_character(slot as usize);
        Ok(character.map(|id| ObjectHandle {
            kind: ObjectKind::Character,
            id,
        }))
    }

    pub fn player(&mut self, index: usize) -> ScriptResult<ObjectHandle> {
        let slot = self.int(index)?;
        self.try_player(index)?
            .ok_or(ScriptError::MissingPlayer(slot))
    }

    /// Hands `handle` to the world for release when the mission ends. Objects
    /// created by non-mission threads are left alone.
    pub fn add_to_mission_cleanup(&mut self, handle: ObjectHandle) {
        if self.thread.is_mission() {
            self.context.host.world().add_mission_object(handle);
        }
    }

    /// Value for the condition register when the opcode is bound
    /// conditional but implemented as an action.
    pub fn set_condition(&mut self, value: bool) {
        self.condition = Some(value);
    }

    pub(crate) fn take_condition(&mut self) -> Option<bool> {
        self.condition.take()
    }

    pub fn thread(&self) -> &ScriptThread {
        &*self.thread
    }

    pub fn thread_mut(&mut self) -> &mut ScriptThread {
        &mut *self.thread
    }

    pub fn globals(&self) -> &GlobalStore {
        &*self.context.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalStore {
        &mut *self.context.globals
    }

    pub fn program(&self) -> &ScriptProgram {
        self.context.program
    }

    pub fn world(&mut self) -> &mut dyn World {
        self.context.host.world()
    }

    pub fn game_state(&mut self) -> &mut dyn GameState {
        self.context.host.game_state()
    }

    /// Milliseconds of simulated time since the machine started.
    pub fn clock_ms(&self) -> u64 {
        self.context.clock_ms
    }

    /// Schedules a new thread; it first runs later in the current tick.
    pub fn start_thread(&mut self, address: u32, mission: bool, locals: Vec<u32>) {
        self.context.spawns.push(SpawnRequest {
            address,
            mission,
            locals,
        });
    }

    pub fn on_mission_flag(&self) -> Option<u16> {
        *self.context.on_mission_flag
    }

    pub fn link_on_mission_flag(&mut self, offset: u16) {
        *self.context.on_mission_flag = Some(offset);
    }
}

fn type_error(index: usize, expected: &'static str, found: &Parameter) -> ScriptError {
    ScriptError::ParameterType {
        index,
        expected,
        found: format!("{found:?}"),
    }
}
