//! Shared test simulation.
//!
//! Integrates the controller stick into a 2D position and stamps a rolling
//! log across eight pages so captures touch several pages.

#![allow(dead_code)]

use tasfw_engine::prelude::*;
use tasfw_resource::prelude::*;

pub const PAD: usize = 0x10;
pub const POS_X: usize = 0x100;
pub const POS_Z: usize = 0x104;
pub const JUMPS: usize = 0x108;
const LOG_BASE: usize = 4 * PAGE_SIZE;

fn read_i32(memory: &[u8], addr: usize) -> i32 {
    i32::from_le_bytes(memory[addr..addr + 4].try_into().unwrap())
}

fn write_i32(memory: &mut [u8], addr: usize, value: i32) {
    memory[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
}

fn step(memory: &mut [u8], symbols: &SymbolTable) {
    let timer_addr = symbols.get("gGlobalTimer").unwrap();
    let timer = u32::from_le_bytes(memory[timer_addr..timer_addr + 4].try_into().unwrap());
    let buttons = u16::from_le_bytes([memory[PAD], memory[PAD + 1]]);
    let stick_x = memory[PAD + 2] as i8 as i32;
    let stick_y = memory[PAD + 3] as i8 as i32;

    write_i32(memory, POS_X, read_i32(memory, POS_X) + stick_x);
    write_i32(memory, POS_Z, read_i32(memory, POS_Z) + stick_y);
    if buttons & buttons::A != 0 {
        write_i32(memory, JUMPS, read_i32(memory, JUMPS) + 1);
    }

    let page = LOG_BASE + (timer as usize % 8) * PAGE_SIZE;
    write_i32(memory, page, timer as i32 + 1);
}

pub fn game_with_mode(mode: SnapshotMode) -> Game<MemoryResource> {
    let resource = MemoryResource::builder(16 * PAGE_SIZE)
        .symbol("gGlobalTimer", 0x0)
        .symbol("gControllerPads", PAD)
        .symbol("gPosition", POS_X)
        .symbol("gJumps", JUMPS)
        .frame_counter("gGlobalTimer")
        .step(step)
        .build()
        .unwrap();
    Game::with_mode(resource, &Layout::default(), mode).unwrap()
}

pub fn session() -> Session<MemoryResource> {
    Session::new(game_with_mode(SnapshotMode::PageDiff), Diff::new())
}

pub fn session_with_base(base: Diff, mode: SnapshotMode) -> Session<MemoryResource> {
    Session::new(game_with_mode(mode), base)
}

pub fn pos_x(session: &Session<MemoryResource>) -> i32 {
    session.game().read_value::<i32>(POS_X).unwrap()
}

pub fn pos_z(session: &Session<MemoryResource>) -> i32 {
    session.game().read_value::<i32>(POS_Z).unwrap()
}

pub fn x_probe() -> Probe {
    Probe::new("gPosition", 0, ValueKind::I32)
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Writes `inputs` for `frames` frames and asserts `assert`.
pub struct Scripted {
    pub inputs: Vec<Inputs>,
    pub valid: bool,
    pub executes: bool,
    pub asserts: bool,
}

impl Scripted {
    pub fn new(inputs: Vec<Inputs>) -> Self {
        Self {
            inputs,
            valid: true,
            executes: true,
            asserts: true,
        }
    }

    pub fn failing_assertion(inputs: Vec<Inputs>) -> Self {
        Self {
            asserts: false,
            ..Self::new(inputs)
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedStatus {
    pub x_after: i32,
}

impl<R: Resource> Script<R> for Scripted {
    type Status = ScriptedStatus;

    fn validation(&self, _session: &Session<R>) -> Result<bool, EngineError> {
        Ok(self.valid)
    }

    fn execution(
        &mut self,
        session: &mut Session<R>,
        status: &mut ScriptedStatus,
    ) -> Result<bool, EngineError> {
        for &inputs in &self.inputs {
            session.advance_frame_write(inputs)?;
        }
        status.x_after = x_probe().read(session.game())? as i32;
        Ok(self.executes)
    }

    fn assertion(&self, _session: &Session<R>, _status: &ScriptedStatus) -> Result<bool, EngineError> {
        Ok(self.asserts)
    }
}

pub fn sticks(xs: &[i8]) -> Vec<Inputs> {
    xs.iter().map(|&x| Inputs::stick(x, 0)).collect()
}

/// Writes `inputs`, then keeps advancing `reads` more frames on the
/// inherited inputs.
pub struct WriteThenRead {
    pub inputs: Vec<Inputs>,
    pub reads: u32,
}

impl<R: Resource> Script<R> for WriteThenRead {
    type Status = ();

    fn execution(&mut self, session: &mut Session<R>, _: &mut ()) -> Result<bool, EngineError> {
        for &inputs in &self.inputs {
            session.advance_frame_write(inputs)?;
        }
        session.advance_frames_read(self.reads)?;
        Ok(true)
    }
}
