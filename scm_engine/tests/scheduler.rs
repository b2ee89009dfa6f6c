use std::sync::Arc;

use scm_engine::modules::vm::{
    ANDOR, GOSUB, GOTO, HAS_DEATHARREST_BEEN_EXECUTED, JUMP_IF_FALSE, RETURN, TERMINATE_THIS_SCRIPT,
    WAIT,
};
use scm_engine::{
    HeadlessWorld, Machine, MachineConfig, MachineSnapshot, OpcodeRegistry, SnapshotError,
};
use scm_formats::{
    BytecodeRevision, CodeAssembler, ContainerBuilder, Disassembly, Parameter, ScriptProgram,
};

const SET_INT: u16 = 0x0004;
const ADD_INT: u16 = 0x0008;
const COPY_INT: u16 = 0x0084;
const INT_EQUAL: u16 = 0x0038;

fn machine(bytes: Vec<u8>) -> Machine {
    let program = Arc::new(ScriptProgram::from_bytes(bytes).unwrap());
    Machine::new(program, OpcodeRegistry::core(), MachineConfig::default())
}

fn label(code: &mut CodeAssembler, at: u32, target: u32) {
    code.patch_i32(at + 3, target as i32).unwrap();
}

#[test]
fn wait_then_test_then_branch_scenario() {
    let mut globals = vec![0u8; 8];
    globals[0] = 5;
    let builder = ContainerBuilder::new(BytecodeRevision::Gta3)
        .globals(globals)
        .model("rd_Corner1");
    let mut code = CodeAssembler::new(builder.layout().code_offset);
    code.op(WAIT, &[Parameter::Int8(0)]).unwrap();
    code.op(INT_EQUAL, &[Parameter::Global(0), Parameter::Int8(5)]).unwrap();
    code.op(ANDOR, &[Parameter::Int8(1)]).unwrap();
    let branch = code.position();
    code.op(JUMP_IF_FALSE, &[Parameter::Int32(0)]).unwrap();
    let past_branch = code.position();
    code.op(SET_INT, &[Parameter::Global(4), Parameter::Int8(1)]).unwrap();
    code.op(WAIT, &[Parameter::Int16(1000)]).unwrap();
    let fail = code.position();
    code.op(SET_INT, &[Parameter::Global(0), Parameter::Int8(99)]).unwrap();
    code.op(TERMINATE_THIS_SCRIPT, &[]).unwrap();
    label(&mut code, branch, fail);

    let bytes = builder.main_code(code.into_bytes()).build().unwrap();
    let mut machine = machine(bytes);
    assert_eq!(machine.program().models(), &["rd_Corner1".to_string()]);

    let mut world = HeadlessWorld::with_player();
    let id = machine.start_main();

    // A wait always ends the thread's run for this tick, even for zero
    // milliseconds, so the test and branch execute on the second step.
    machine.step(16, &mut world);
    assert!(machine.thread(id).unwrap().program_counter < branch);

    machine.step(16, &mut world);
    let thread = machine.thread(id).expect("thread still waiting");
    assert!(thread.program_counter > past_branch);
    assert!(thread.program_counter < fail);
    assert_eq!(machine.globals().read_i32(0).unwrap(), 5);
    assert_eq!(machine.globals().read_i32(4).unwrap(), 1);
    assert!(machine.faults().is_empty());
}

#[test]
fn and_run_with_one_false_test_takes_branch() {
    let builder =
        ContainerBuilder::new(BytecodeRevision::ViceCity).globals(vec![5, 0, 0, 0, 0, 0, 0, 0]);
    let origin = builder.layout().code_offset;
    let mut code = CodeAssembler::new(origin);
    code.op(ANDOR, &[Parameter::Int8(1)]).unwrap();
    code.op(INT_EQUAL, &[Parameter::Global(0), Parameter::Int8(5)]).unwrap();
    code.op(INT_EQUAL, &[Parameter::Global(0), Parameter::Int8(6)]).unwrap();
    let branch = code.position();
    code.op(JUMP_IF_FALSE, &[Parameter::Int32(0)]).unwrap();
    code.op(SET_INT, &[Parameter::Global(4), Parameter::Int8(1)]).unwrap();
    let end = code.position();
    code.op(TERMINATE_THIS_SCRIPT, &[]).unwrap();
    label(&mut code, branch, end);

    let mut machine = machine(builder.main_code(code.into_bytes()).build().unwrap());
    machine.start_thread(origin, false);
    machine.step(16, &mut HeadlessWorld::new());
    assert_eq!(machine.globals().read_i32(4).unwrap(), 0);
    assert_eq!(machine.live_thread_count(), 0);
}

#[test]
fn faulting_thread_leaves_others_running() {
    let builder = ContainerBuilder::new(BytecodeRevision::Gta3).globals(vec![0; 8]);
    let origin = builder.layout().code_offset;
    let mut code = CodeAssembler::new(origin);

    let counter = code.position();
    code.op(ADD_INT, &[Parameter::Global(0), Parameter::Int8(1)]).unwrap();
    code.op(WAIT, &[Parameter::Int8(0)]).unwrap();
    code.op(GOTO, &[Parameter::Int32(counter as i32)]).unwrap();

    let broken = code.position();
    code.op(SET_INT, &[Parameter::Global(4), Parameter::Int8(3)]).unwrap();
    let mut bytes = code.into_bytes();
    bytes.extend_from_slice(&[0x99, 0x01, 0x00]);

    let mut machine = machine(builder.main_code(bytes).build().unwrap());
    let broken_id = machine.start_thread(broken, false);
    let counter_id = machine.start_thread(counter, false);
    let mut world = HeadlessWorld::new();

    machine.step(16, &mut world);
    let faults = machine.take_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].thread, broken_id);
    assert_eq!(faults[0].program_counter, broken + 7);
    assert!(faults[0].message.starts_with("illegal instruction 0199"), "{}", faults[0].message);

    for _ in 0..4 {
        machine.step(16, &mut world);
    }
    assert_eq!(machine.live_thread_count(), 1);
    assert!(machine.thread(counter_id).is_some());
    assert_eq!(machine.globals().read_i32(0).unwrap(), 5);
    // effects made before the fault stay
    assert_eq!(machine.globals().read_i32(4).unwrap(), 3);
    assert!(machine.take_faults().is_empty());
}

#[test]
fn locals_are_private_and_globals_shared() {
    let builder = ContainerBuilder::new(BytecodeRevision::Gta3).globals(vec![0; 16]);
    let origin = builder.layout().code_offset;
    let mut code = CodeAssembler::new(origin);

    let writer = code.position();
    code.op(0x0006, &[Parameter::Local(0), Parameter::Int8(42)]).unwrap();
    code.op(SET_INT, &[Parameter::Global(4), Parameter::Int8(42)]).unwrap();
    code.op(WAIT, &[Parameter::Int16(1000)]).unwrap();

    let reader = code.position();
    code.op(WAIT, &[Parameter::Int8(0)]).unwrap();
    code.op(COPY_INT, &[Parameter::Global(8), Parameter::Local(0)]).unwrap();
    code.op(COPY_INT, &[Parameter::Global(12), Parameter::Global(4)]).unwrap();
    code.op(WAIT, &[Parameter::Int16(1000)]).unwrap();

    let mut machine = machine(builder.main_code(code.into_bytes()).build().unwrap());
    let writer_id = machine.start_thread(writer, false);
    machine.start_thread(reader, false);
    let mut world = HeadlessWorld::new();
    machine.step(16, &mut world);
    machine.step(16, &mut world);

    assert_eq!(machine.thread(writer_id).unwrap().read_local_i32(0).unwrap(), 42);
    assert_eq!(machine.globals().read_i32(8).unwrap(), 0);
    assert_eq!(machine.globals().read_i32(12).unwrap(), 42);
}

#[test]
fn every_mission_entry_starts_at_its_canary() {
    let mut builder = ContainerBuilder::new(BytecodeRevision::SanAndreas)
        .globals(vec![0; 12])
        .reserve_missions(3)
        .main_code(vec![0x4E, 0x00]);
    let mut expected = Vec::new();
    for index in 0..3u16 {
        let start = builder.next_mission_offset();
        expected.push(start);
        let mut code = CodeAssembler::new(start);
        code.op(SET_INT, &[Parameter::Global(index * 4), Parameter::Int16(100 + index as i16)])
            .unwrap();
        code.op(TERMINATE_THIS_SCRIPT, &[]).unwrap();
        builder = builder.mission(code.into_bytes());
    }

    let mut machine = machine(builder.build().unwrap());
    assert_eq!(machine.program().mission_offsets(), expected.as_slice());

    let registry = OpcodeRegistry::core();
    for (index, &start) in expected.iter().enumerate() {
        let listing = Disassembly::mission(machine.program(), &registry, index).unwrap();
        let (first, instruction) = listing.iter().next().unwrap();
        assert_eq!(first, start);
        assert_eq!(instruction.opcode, SET_INT);
        machine.start_mission(index).unwrap();
    }
    assert!(machine.start_mission(3).is_err());

    machine.step(16, &mut HeadlessWorld::new());
    for index in 0..3 {
        assert_eq!(machine.globals().read_i32(index * 4).unwrap(), 100 + index as i32);
    }
    assert_eq!(machine.live_thread_count(), 0);
}

#[test]
fn host_kill_removes_thread_between_steps() {
    let builder = ContainerBuilder::new(BytecodeRevision::Gta3).globals(vec![0; 4]);
    let origin = builder.layout().code_offset;
    let mut code = CodeAssembler::new(origin);
    code.op(ADD_INT, &[Parameter::Global(0), Parameter::Int8(1)]).unwrap();
    code.op(WAIT, &[Parameter::Int8(0)]).unwrap();
    code.op(GOTO, &[Parameter::Int32(origin as i32)]).unwrap();

    let mut machine = machine(builder.main_code(code.into_bytes()).build().unwrap());
    let id = machine.start_thread(origin, false);
    let mut world = HeadlessWorld::new();
    machine.step(16, &mut world);

    assert!(machine.kill_thread(id));
    assert!(!machine.kill_thread(id));
    machine.step(16, &mut world);
    assert_eq!(machine.globals().read_i32(0).unwrap(), 1);
    assert!(machine.faults().is_empty());
}

#[test]
fn death_arrest_unwinds_mission_threads() {
    let builder = ContainerBuilder::new(BytecodeRevision::Gta3).globals(vec![0; 8]);
    let origin = builder.layout().code_offset;
    let mut code = CodeAssembler::new(origin);
    let call = code.position();
    code.op(GOSUB, &[Parameter::Int32(0)]).unwrap();
    code.op(ANDOR, &[Parameter::Int8(0)]).unwrap();
    code.op(HAS_DEATHARREST_BEEN_EXECUTED, &[]).unwrap();
    let branch = code.position();
    code.op(JUMP_IF_FALSE, &[Parameter::Int32(0)]).unwrap();
    code.op(ADD_INT, &[Parameter::Global(0), Parameter::Int8(1)]).unwrap();
    let end = code.position();
    code.op(TERMINATE_THIS_SCRIPT, &[]).unwrap();
    let sub = code.position();
    code.op(WAIT, &[Parameter::Int8(0)]).unwrap();
    code.op(GOTO, &[Parameter::Int32(sub as i32)]).unwrap();
    code.op(RETURN, &[]).unwrap();
    label(&mut code, call, sub);
    label(&mut code, branch, end);

    let mut machine = machine(builder.main_code(code.into_bytes()).build().unwrap());
    let mission = machine.start_thread(origin, true);
    let plain = machine.start_thread(origin, false);
    let mut world = HeadlessWorld::with_player();

    machine.step(16, &mut world);
    assert_eq!(machine.thread(mission).unwrap().call_depth(), 1);

    world.wasted_or_busted = true;
    machine.step(16, &mut world);
    assert!(machine.thread(mission).is_none());
    assert_eq!(machine.globals().read_i32(0).unwrap(), 1);

    let plain = machine.thread(plain).unwrap();
    assert_eq!(plain.call_depth(), 1);
    assert!(!plain.wasted_or_busted);
}

#[test]
fn snapshot_restores_into_fresh_machine() {
    let builder = ContainerBuilder::new(BytecodeRevision::Gta3).globals(vec![0; 8]);
    let origin = builder.layout().code_offset;
    let mut code = CodeAssembler::new(origin);
    code.op(0x03A4, &[Parameter::inline_text("COUNTER")]).unwrap();
    let top = code.position();
    code.op(ADD_INT, &[Parameter::Global(0), Parameter::Int8(1)]).unwrap();
    code.op(WAIT, &[Parameter::Int8(50)]).unwrap();
    code.op(GOTO, &[Parameter::Int32(top as i32)]).unwrap();
    let bytes = builder.main_code(code.into_bytes()).build().unwrap();

    let mut running = machine(bytes.clone());
    running.start_thread(origin, false);
    let mut world = HeadlessWorld::new();
    for _ in 0..3 {
        running.step(25, &mut world);
    }

    let json = serde_json::to_string(&running.snapshot()).unwrap();
    let saved: MachineSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(saved, running.snapshot());

    let mut restored = machine(bytes);
    restored.restore(saved).unwrap();
    assert_eq!(restored.thread_states(), running.thread_states());
    assert_eq!(restored.threads()[0].name(), "COUNTER");

    for _ in 0..4 {
        running.step(25, &mut world);
        restored.step(25, &mut world);
    }
    assert_eq!(restored.globals(), running.globals());
    assert_eq!(restored.snapshot(), running.snapshot());
    assert_eq!(
        restored.threads()[0].read_local_i32(16).unwrap(),
        running.threads()[0].read_local_i32(16).unwrap()
    );
}

#[test]
fn restore_rejects_foreign_snapshot() {
    let small = ContainerBuilder::new(BytecodeRevision::Gta3)
        .globals(vec![0; 4])
        .main_code(vec![0x4E, 0x00])
        .build()
        .unwrap();
    let large = ContainerBuilder::new(BytecodeRevision::Gta3)
        .globals(vec![0; 8])
        .main_code(vec![0x4E, 0x00])
        .build()
        .unwrap();

    let mut source = machine(large);
    source.start_main();
    let snapshot = source.snapshot();

    let mut target = machine(small);
    target.start_main();
    assert_eq!(
        target.restore(snapshot.clone()),
        Err(SnapshotError::GlobalsSize {
            expected: 4,
            found: 8
        })
    );
    assert_eq!(target.live_thread_count(), 1);

    let mut bad_pc = snapshot;
    bad_pc.globals.truncate(4);
    bad_pc.threads[0].program_counter = 0xFFFF;
    assert!(matches!(
        target.restore(bad_pc),
        Err(SnapshotError::AddressOutOfRange { address: 0xFFFF, .. })
    ));
}
