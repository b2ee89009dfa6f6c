//! Control flow, variables and thread management.

use log::info;

use crate::arguments::ScriptArguments;
use crate::error::{ScriptError, ScriptResult};
use crate::registry::ScriptModule;

pub const WAIT: u16 = 0x0001;
pub const GOTO: u16 = 0x0002;
pub const JUMP_IF_FALSE: u16 = 0x004D;
pub const TERMINATE_THIS_SCRIPT: u16 = 0x004E;
pub const START_NEW_SCRIPT: u16 = 0x004F;
pub const GOSUB: u16 = 0x0050;
pub const RETURN: u16 = 0x0051;
pub const ANDOR: u16 = 0x00D6;
pub const LAUNCH_MISSION: u16 = 0x00D7;
pub const MISSION_HAS_FINISHED: u16 = 0x00D8;
pub const SET_DEATHARREST_STATE: u16 = 0x0111;
pub const HAS_DEATHARREST_BEEN_EXECUTED: u16 = 0x0112;
pub const DECLARE_MISSION_FLAG: u16 = 0x0180;
pub const CALL: u16 = 0x02CD;
pub const SCRIPT_NAME: u16 = 0x03A4;
pub const LOAD_AND_LAUNCH_MISSION: u16 = 0x0417;

pub fn module() -> ScriptModule {
    let mut module = ScriptModule::new("vm");
    module
        .bind_action(WAIT, 1, "wait", "Sleep for a number of milliseconds", wait)
        .bind_action(GOTO, 1, "goto", "Jump", goto)
        .bind_action(0x0004, 2, "set_var_int", "Set global int", set_int)
        .bind_action(0x0005, 2, "set_var_float", "Set global float", set_float)
        .bind_action(0x0006, 2, "set_lvar_int", "Set local int", set_int)
        .bind_action(0x0008, 2, "add_val_to_int_var", "Add int to global", add_int)
        .bind_action(0x0009, 2, "add_val_to_float_var", "Add float to global", add_float)
        .bind_action(0x000C, 2, "sub_val_from_int_var", "Subtract int from global", sub_int)
        .bind_action(0x000D, 2, "sub_val_from_float_var", "Subtract float from global", sub_float)
        .bind_action(0x0015, 2, "div_float_var_by_val", "Divide global float", div_float)
        .bind_test(0x0018, 2, "is_int_var_greater_than_number", "", int_greater)
        .bind_test(0x0019, 2, "is_int_lvar_greater_than_number", "", int_greater)
        .bind_test(0x001A, 2, "is_number_greater_than_int_var", "", int_greater)
        .bind_test(0x001B, 2, "is_number_greater_than_int_lvar", "", int_greater)
        .bind_test(0x0020, 2, "is_float_var_greater_than_number", "", float_greater)
        .bind_test(0x0028, 2, "is_int_var_greater_or_equal_to_number", "", int_greater_or_equal)
        .bind_test(0x0029, 2, "is_int_lvar_greater_or_equal_to_number", "", int_greater_or_equal)
        .bind_test(0x002A, 2, "is_number_greater_or_equal_to_int_var", "", int_greater_or_equal)
        .bind_test(0x0038, 2, "is_int_var_equal_to_number", "", int_equal)
        .bind_test(0x0039, 2, "is_int_lvar_equal_to_number", "", int_equal)
        .bind_action(
            JUMP_IF_FALSE,
            1,
            "goto_if_false",
            "Jump if the condition is false",
            goto_if_false,
        )
        .bind_action(TERMINATE_THIS_SCRIPT, 0, "terminate_this_script", "End thread", terminate)
        .bind_action(
            START_NEW_SCRIPT,
            -1,
            "start_new_script",
            "Start a new thread",
            start_new_script,
        )
        .bind_action(GOSUB, 1, "gosub", "Call a subroutine", gosub)
        .bind_action(RETURN, 0, "return", "Return from a subroutine", return_from_gosub)
        .bind_action(0x0060, 2, "sub_int_var_from_int_var", "", sub_int)
        .bind_action(0x0061, 2, "sub_float_var_from_float_var", "", sub_float)
        .bind_action(0x0084, 2, "set_var_int_to_var_int", "", set_int)
        .bind_action(0x0086, 2, "set_var_float_to_var_float", "", set_float)
        .bind_action(ANDOR, 1, "andor", "Open an AND/OR run of tests", andor)
        .bind_action(LAUNCH_MISSION, 1, "launch_mission", "Start a mission thread", launch_mission)
        .bind_action(MISSION_HAS_FINISHED, 0, "mission_has_finished", "", mission_has_finished)
        .bind_action(SET_DEATHARREST_STATE, 1, "set_deatharrest_state", "", set_deatharrest_state)
        .bind_test(
            HAS_DEATHARREST_BEEN_EXECUTED,
            0,
            "has_deatharrest_been_executed",
            "",
            has_deatharrest_been_executed,
        )
        .bind_action(
            DECLARE_MISSION_FLAG,
            1,
            "declare_mission_flag",
            "Link the on-mission global",
            declare_mission_flag,
        )
        .bind_action(CALL, 2, "call", "Call a subroutine", gosub)
        .bind_action(SCRIPT_NAME, 1, "script_name", "Name the thread", script_name)
        .bind_action(
            LOAD_AND_LAUNCH_MISSION,
            1,
            "load_and_launch_mission",
            "Start mission by index",
            load_and_launch_mission,
        );
    module
}

fn wait(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    // wait 0 still yields until the next tick
    let delay = args.int(0)?.max(0) as u64;
    let wake_at = args.clock_ms() + delay;
    args.thread_mut().sleep_until(wake_at);
    Ok(())
}

fn goto(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let target = args.label(0)?;
    args.thread_mut().program_counter = target;
    Ok(())
}

fn set_int(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.int(1)?;
    args.set_int(0, value)
}

fn set_float(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.float(1)?;
    args.set_float(0, value)
}

fn add_int(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.int(0)?.wrapping_add(args.int(1)?);
    args.set_int(0, value)
}

fn add_float(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.float(0)? + args.float(1)?;
    args.set_float(0, value)
}

fn sub_int(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.int(0)?.wrapping_sub(args.int(1)?);
    args.set_int(0, value)
}

fn sub_float(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.float(0)? - args.float(1)?;
    args.set_float(0, value)
}

fn div_float(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let value = args.float(0)? / args.float(1)?;
    args.set_float(0, value)
}

// Operand order is part of the opcode, so "var > number" and
// "number > var" share one body.
fn int_greater(args: &mut ScriptArguments<'_>) -> ScriptResult<bool> {
    Ok(args.int(0)? > args.int(1)?)
}

fn float_greater(args: &mut ScriptArguments<'_>) -> ScriptResult<bool> {
    Ok(args.float(0)? > args.float(1)?)
}

fn int_greater_or_equal(args: &mut ScriptArguments<'_>) -> ScriptResult<bool> {
    Ok(args.int(0)? >= args.int(1)?)
}

fn int_equal(args: &mut ScriptArguments<'_>) -> ScriptResult<bool> {
    Ok(args.int(0)? == args.int(1)?)
}

fn goto_if_false(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let target = args.label(0)?;
    let thread = args.thread_mut();
    if !thread.condition.consume() {
        thread.program_counter = target;
    }
    Ok(())
}

fn terminate(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    args.thread_mut().terminate();
    Ok(())
}

/// The label comes first; any further operands seed the new thread's locals.
fn start_new_script(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let address = args.label(0)?;
    let locals = (1..args.len())
        .map(|index| args.raw_value(index))
        .collect::<ScriptResult<Vec<_>>>()?;
    args.start_thread(address, false, locals);
    Ok(())
}

fn gosub(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let target = args.int(0)?;
    args.thread_mut().push_call(target)
}

fn return_from_gosub(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    args.thread_mut().pop_call()
}

fn andor(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let count = args.int(0)?;
    args.thread_mut().condition.begin(count)
}

fn launch_mission(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let address = args.label(0)?;
    args.start_thread(address, true, Vec::new());
    Ok(())
}

fn mission_has_finished(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    args.world().release_mission_objects();
    if let Some(offset) = args.on_mission_flag() {
        args.globals_mut().write_i32(offset as usize, 0)?;
    }
    info!("mission in thread {} finished", args.thread().name());
    Ok(())
}

fn set_deatharrest_state(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let enabled = args.int(0)? != 0;
    args.thread_mut().death_arrest_check = enabled;
    Ok(())
}

fn has_deatharrest_been_executed(args: &mut ScriptArguments<'_>) -> ScriptResult<bool> {
    Ok(args.thread().wasted_or_busted)
}

fn declare_mission_flag(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let offset = args.global_offset(0)?;
    args.link_on_mission_flag(offset);
    Ok(())
}

fn script_name(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let name = args.string(0)?;
    args.thread_mut().set_name(&name);
    Ok(())
}

fn load_and_launch_mission(args: &mut ScriptArguments<'_>) -> ScriptResult<()> {
    let index = args.int(0)?;
    let offsets = args.program().mission_offsets();
    let address = usize::try_from(index)
        .ok()
        .and_then(|i| offsets.get(i).copied())
        .ok_or(ScriptError::BadMissionIndex {
            index,
            count: offsets.len(),
        })?;
    info!("launching mission {index} at {address:#x}");
    args.start_thread(address, true, Vec::new());
    Ok(())
}
