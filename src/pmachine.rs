use std::{cmp::Ordering, time::Instant};

use log::{debug, error, info, log_enabled, warn, Level};
use num_traits::FromPrimitive;

use crate::{
    animate::GfxAnimate,
    config::{EngineConfig, SelectorPolicy},
    error::{VmError, VmResult},
    events::EventSource,
    graphics::{Display, GfxScreen, PriorityBands},
    heap::{Object, Register, SegManager, SegmentId},
    kernel::{KernelArgs, KernelTable},
    resource::{vocab, ResourceProvider, ResourceType},
    savegame::{MemorySaveStore, SaveStore},
    selector::{SelectorCache, SelectorLookup, SelectorTable},
    view::ViewCache,
};

const SCRIPT_MAIN: u16 = 0;
/// Global holding the quit flag
pub const GLOBAL_QUIT: usize = 4;
pub(crate) const PICTURE_PORT: Register = Register::value(1);

#[derive(FromPrimitive, Copy, Clone, Debug, PartialEq)]
enum VariableType {
    Global,
    Local,
    Temporary,
    Parameter,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MachineRegisters {
    pub acc: Register,
    pub prev: Register,
    pub rest_modifier: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Call,
    /// Property access queued by a send. `write` is the value to store, if any.
    VarSelector { index: usize, write: Option<Register> },
}

/// One entry of the call stack. Lives in the heap's stack segment so snapshots capture it.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub kind: FrameKind,
    pub script: SegmentId,
    pub ip: usize,
    pub objp: Register,
    pub sendp: Register,
    pub locals: Option<SegmentId>,
    /// Stack index of the argc slot; parameter n is at params + n
    pub params: usize,
    pub argc: u16,
    pub temps: usize,
    /// Stack height to restore when the frame returns
    pub unwind: usize,
    pub selector: Option<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    Wait,
    RestoreGame,
    RestartGame,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProcessStatus {
    Active,
    Passive {
        reason: ExitReason,
        args: [Option<Register>; 2],
    },
    Done,
    Error(VmError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AbortRequest {
    None,
    LoadGame,
    RestartGame,
    QuitGame,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Continue,
    Suspended(ExitReason),
    Done,
    Error(VmError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Operand {
    Byte,
    Var,
    SVar,
}

fn operand_formats(opnumber: u8) -> &'static [Operand] {
    use Operand::*;
    match opnumber {
        // bt bnt jmp ldi pushi lofsa lofss
        0x17..=0x1a | 0x1c | 0x39 | 0x3a => &[SVar],
        // link class &rest, property and variable access
        0x1f | 0x28 | 0x2c | 0x31..=0x38 | 0x40..=0x7f => &[Var],
        0x20 => &[SVar, Byte],
        // callk callb super
        0x21 | 0x22 | 0x2b => &[Var, Byte],
        0x23 => &[Var, Var, Byte],
        // send self
        0x25 | 0x2a => &[Byte],
        0x2d => &[Var, Var],
        _ => &[],
    }
}

const OPCODE_NAMES: [&str; 0x40] = [
    "bnot", "add", "sub", "mul", "div", "mod", "shr", "shl", "xor", "and", "or", "neg", "not",
    "eq?", "ne?", "gt?", "ge?", "lt?", "le?", "ugt?", "uge?", "ult?", "ule?", "bt", "bnt", "jmp",
    "ldi", "push", "pushi", "toss", "dup", "link", "call", "callk", "callb", "calle", "ret", "send",
    "-", "-", "class", "-", "self", "super", "&rest", "lea", "selfID", "-", "pprev", "pToa", "aTop",
    "pTos", "sTop", "ipToa", "dpToa", "ipTos", "dpTos", "lofsa", "lofss", "push0", "push1", "push2",
    "pushSelf", "-",
];

fn builtin_opcode_name(opcode: u8) -> String {
    let opnumber = opcode >> 1;
    if opnumber < 0x40 {
        return OPCODE_NAMES[opnumber as usize].to_string();
    }
    let action = ["l", "s", "+", "-"][((opnumber >> 4) & 3) as usize];
    let dest = if opnumber & 4 != 0 { "s" } else { "a" };
    let var = ["g", "l", "t", "p"][(opnumber & 3) as usize];
    let indexed = if opnumber & 8 != 0 { "i" } else { "" };
    format!("{action}{dest}{var}{indexed}")
}

/// Decodes the instruction at `offset`: opcode, operands and encoded length.
/// Returns None if the instruction runs past the end of `code`.
fn decode(code: &[u8], offset: usize) -> Option<(u8, Vec<i32>, usize)> {
    let opcode = *code.get(offset)?;
    let byte = opcode & 1 != 0;
    let mut pos = offset + 1;
    let mut operands = Vec::new();
    for format in operand_formats(opcode >> 1) {
        let value = match (format, byte) {
            (Operand::Byte, _) | (Operand::Var, true) => {
                pos += 1;
                *code.get(pos - 1)? as i32
            }
            (Operand::SVar, true) => {
                pos += 1;
                *code.get(pos - 1)? as i8 as i32
            }
            (Operand::Var, false) => {
                pos += 2;
                u16::from_le_bytes([*code.get(pos - 2)?, *code.get(pos - 1)?]) as i32
            }
            (Operand::SVar, false) => {
                pos += 2;
                i16::from_le_bytes([*code.get(pos - 2)?, *code.get(pos - 1)?]) as i32
            }
        };
        operands.push(value);
    }
    Some((opcode, operands, pos - offset))
}

fn compare_registers(left: Register, right: Register, signed: bool) -> Ordering {
    if left.is_number() && right.is_number() {
        if signed {
            left.to_i16().cmp(&right.to_i16())
        } else {
            left.to_u16().cmp(&right.to_u16())
        }
    } else {
        (left.segment, left.offset).cmp(&(right.segment, right.offset))
    }
}

pub struct PMachine<'a> {
    pub heap: SegManager,
    pub(crate) resources: &'a dyn ResourceProvider,
    pub config: EngineConfig,
    pub selectors: SelectorTable,
    pub(crate) sel: SelectorCache,
    pub(crate) kernel: KernelTable,
    class_scripts: Vec<u16>,
    opcode_names: Vec<String>,

    pub screen: GfxScreen,
    pub(crate) views: ViewCache,
    pub(crate) bands: PriorityBands,
    pub(crate) animate: GfxAnimate,
    pub(crate) pic_not_valid: i16,
    pub(crate) pic_number: u16,

    pub registers: MachineRegisters,
    status: ProcessStatus,
    pub(crate) abort: AbortRequest,
    pub(crate) events: Box<dyn EventSource>,
    pub(crate) saves: Box<dyn SaveStore>,
    /// Values a running kernel call holds outside the heap, kept alive across nested sends
    pub(crate) kernel_roots: Vec<Register>,
    pub(crate) game_object: Register,
    pub(crate) game_is_restarting: bool,
    pub(crate) save_dir: Register,
    pub(crate) port: Register,

    pub(crate) start_time: Instant,
    pub(crate) last_wait_time: Instant,
    opcodes: usize,
}

impl<'a> PMachine<'a> {
    pub fn new(
        resources: &'a dyn ResourceProvider,
        config: EngineConfig,
        display: Box<dyn Display>,
        events: Box<dyn EventSource>,
    ) -> Self {
        // Some of the classes referenced in the vocab may not exist in the resources
        let class_scripts = match resources.find_resource(ResourceType::Vocab, vocab::VOCAB_CLASS_SCRIPTS) {
            Some(resource) => vocab::class_scripts(resource),
            None => {
                warn!("No class table, classes register as their scripts load");
                Vec::new()
            }
        };
        let selectors = resources
            .find_resource(ResourceType::Vocab, vocab::VOCAB_SELECTOR_NAMES)
            .map(SelectorTable::from_resource)
            .unwrap_or_default();
        // only needed for tracing
        let opcode_names = resources
            .find_resource(ResourceType::Vocab, vocab::VOCAB_OPCODE_NAMES)
            .map(vocab::opcode_names)
            .unwrap_or_default();
        let kernel = match resources.find_resource(ResourceType::Vocab, vocab::VOCAB_KERNEL_NAMES) {
            Some(resource) => KernelTable::new(vocab::kernel_names(resource)),
            None => KernelTable::sci0_default(),
        };
        info!(
            "Loaded {} classes, {} selectors, {} kernel functions",
            class_scripts.len(),
            selectors.len(),
            kernel.len()
        );

        let heap = SegManager::new(&class_scripts, config.stack_size, config.version);
        let sel = SelectorCache::new(&selectors);
        let now = Instant::now();

        PMachine {
            heap,
            resources,
            config,
            selectors,
            sel,
            kernel,
            class_scripts,
            opcode_names,
            screen: GfxScreen::new(display),
            views: ViewCache::default(),
            bands: PriorityBands::new(14, 42, 190),
            animate: GfxAnimate::default(),
            pic_not_valid: 0,
            pic_number: 0,
            registers: MachineRegisters::default(),
            status: ProcessStatus::Active,
            abort: AbortRequest::None,
            events,
            saves: Box::<MemorySaveStore>::default(),
            kernel_roots: Vec::new(),
            game_object: Register::NULL,
            game_is_restarting: false,
            save_dir: Register::NULL,
            port: PICTURE_PORT,
            start_time: now,
            last_wait_time: now,
            opcodes: 0,
        }
    }

    pub fn with_save_store(mut self, saves: Box<dyn SaveStore>) -> Self {
        self.saves = saves;
        self
    }

    pub fn status(&self) -> &ProcessStatus {
        &self.status
    }

    pub fn acc(&self) -> Register {
        self.registers.acc
    }

    pub fn abort_request(&self) -> AbortRequest {
        self.abort
    }

    pub fn game_object(&self) -> Register {
        self.game_object
    }

    pub fn stack_values(&self) -> &[Register] {
        &self.heap.stack().values
    }

    pub fn frame_depth(&self) -> usize {
        self.heap.stack().frames.len()
    }

    pub fn suspend(&mut self, reason: ExitReason, args: [Option<Register>; 2]) {
        if self.status == ProcessStatus::Active {
            debug!("Suspending with {reason:?}");
            self.status = ProcessStatus::Passive { reason, args };
        }
    }

    pub fn resume(&mut self) {
        if let ProcessStatus::Passive { .. } = self.status {
            self.status = ProcessStatus::Active;
        }
    }

    pub fn global(&self, index: usize) -> Register {
        self.heap
            .globals_segment()
            .and_then(|seg| self.heap.locals(seg).ok()?.get(index).copied())
            .unwrap_or_default()
    }

    pub fn set_global(&mut self, index: usize, value: Register) -> VmResult<()> {
        self.write_var(VariableType::Global, index, value)
    }

    pub fn init_game(&mut self) -> VmResult<Register> {
        let seg = self.heap.instantiate_script(self.resources, SCRIPT_MAIN)?;
        let offset = self
            .heap
            .get_script(seg)?
            .export_address(0)
            .ok_or_else(|| VmError::InvalidScript {
                script: SCRIPT_MAIN,
                reason: "no game object export".into(),
            })?;
        let game = Register::new(seg, offset);
        self.heap.get_object(game)?;
        info!("Game object is {}", self.heap.object_name(game));
        self.game_object = game;
        Ok(game)
    }

    pub fn send_to_game(&mut self, selector: &str) -> VmResult<()> {
        let id = self.selectors.id(selector);
        self.begin_send(self.game_object, id, &[])
    }

    pub fn begin_send(&mut self, object: Register, selector: u16, args: &[Register]) -> VmResult<()> {
        self.push(Register::value(selector as i16))?;
        self.push(Register::value(args.len() as i16))?;
        for &arg in args {
            self.push(arg)?;
        }
        let rest = std::mem::take(&mut self.registers.rest_modifier);
        let result = self.send(object, object, (2 + args.len()) * 2);
        self.registers.rest_modifier = rest;
        result
    }

    pub fn begin_call(&mut self, script: u16, export: u16, args: &[Register]) -> VmResult<()> {
        self.push(Register::value(args.len() as i16))?;
        for &arg in args {
            self.push(arg)?;
        }
        self.call_export(script, export, args.len() * 2)
    }

    /// Runs a method to completion from inside a kernel call and returns the accumulator
    pub fn invoke_selector(&mut self, object: Register, selector: u16, args: &[Register]) -> VmResult<Register> {
        let depth = self.frame_depth();
        self.begin_send(object, selector, args)?;
        self.run_until_return(depth)?;
        Ok(self.registers.acc)
    }

    pub fn reset_execution(&mut self) {
        let stack = self.heap.stack_mut();
        stack.frames.clear();
        stack.values.clear();
        self.registers.rest_modifier = 0;
        self.abort = AbortRequest::None;
        self.kernel_roots.clear();
        self.status = ProcessStatus::Active;
    }

    pub fn restart(&mut self) -> VmResult<Register> {
        info!("Restarting game");
        self.heap = SegManager::new(&self.class_scripts, self.config.stack_size, self.config.version);
        self.animate = GfxAnimate::default();
        self.registers = MachineRegisters::default();
        self.save_dir = Register::NULL;
        self.port = PICTURE_PORT;
        self.reset_execution();
        self.game_is_restarting = true;
        self.init_game()
    }

    pub fn collect_garbage(&mut self) {
        let mut roots = vec![
            self.registers.acc,
            self.registers.prev,
            self.game_object,
            self.save_dir,
            self.port,
        ];
        roots.extend(self.kernel_roots.iter().copied());
        roots.extend(self.animate.roots());
        let stats = self.heap.collect_garbage(&roots);
        debug!("GC freed {stats:?}");
    }

    pub fn run_slice(&mut self, max_opcodes: usize) -> RunOutcome {
        for _ in 0..max_opcodes {
            match &self.status {
                ProcessStatus::Passive { reason, .. } => return RunOutcome::Suspended(*reason),
                ProcessStatus::Done => return RunOutcome::Done,
                ProcessStatus::Error(e) => return RunOutcome::Error(e.clone()),
                ProcessStatus::Active => {}
            }
            if self.heap.stack().frames.is_empty() {
                info!("Process finished after {} opcodes", self.opcodes);
                self.status = ProcessStatus::Done;
                return RunOutcome::Done;
            }
            if let Err(e) = self.execute_one() {
                return RunOutcome::Error(e);
            }
        }
        RunOutcome::Continue
    }

    pub fn run(&mut self) -> RunOutcome {
        loop {
            match self.run_slice(10_000) {
                RunOutcome::Continue => continue,
                outcome => return outcome,
            }
        }
    }

    /// Nested execution for kernel calls: runs until the frame stack drops back to `depth`
    pub(crate) fn run_until_return(&mut self, depth: usize) -> VmResult<()> {
        while self.heap.stack().frames.len() > depth {
            if self.abort != AbortRequest::None {
                debug!("Abandoning nested execution, abort requested");
                return Ok(());
            }
            self.execute_one()?;
        }
        Ok(())
    }

    fn stops_process(&self, e: &VmError) -> bool {
        match e {
            VmError::SelectorNotFound { .. } => self.config.selector_policy == SelectorPolicy::Stop,
            _ => e.is_fatal(),
        }
    }

    fn execute_one(&mut self) -> VmResult<()> {
        if let Err(e) = self.step() {
            if self.stops_process(&e) {
                error!("{e}");
                self.status = ProcessStatus::Error(e.clone());
                return Err(e);
            }
            error!("{e}, continuing with a null accumulator");
            self.registers.acc = Register::NULL;
        }
        self.opcodes += 1;
        if self.config.gc_interval > 0 && self.opcodes % self.config.gc_interval == 0 {
            self.collect_garbage();
        }
        Ok(())
    }

    fn frame(&self) -> VmResult<&ExecutionContext> {
        self.heap.stack().frames.last().ok_or(VmError::StackUnderflow)
    }

    fn frame_mut(&mut self) -> VmResult<&mut ExecutionContext> {
        self.heap.stack_mut().frames.last_mut().ok_or(VmError::StackUnderflow)
    }

    fn script_number(&self, seg: SegmentId) -> u16 {
        self.heap.get_script(seg).map_or(0xffff, |s| s.number)
    }

    fn fault(&self, reason: impl Into<String>) -> VmError {
        let (script, offset) = self
            .heap
            .stack()
            .frames
            .last()
            .map_or((0xffff, 0), |f| (self.script_number(f.script), f.ip));
        VmError::BytecodeFault {
            script,
            offset,
            reason: reason.into(),
        }
    }

    /// Fetches the next code byte. Past the end of the script the process enters
    /// the error state and 0 is returned.
    pub fn next(&mut self) -> u8 {
        let byte = self.heap.stack().frames.last().and_then(|frame| {
            let script = self.heap.get_script(frame.script).ok()?;
            script.buf.get(frame.ip).copied()
        });
        match byte {
            Some(b) => {
                if let Some(frame) = self.heap.stack_mut().frames.last_mut() {
                    frame.ip += 1;
                }
                b
            }
            None => {
                let e = self.fault("fetch past end of script");
                if !matches!(self.status, ProcessStatus::Error(_)) {
                    error!("{e}");
                    self.status = ProcessStatus::Error(e);
                }
                0
            }
        }
    }

    pub fn next16(&mut self) -> u16 {
        let lo = self.next();
        let hi = self.next();
        u16::from_le_bytes([lo, hi])
    }

    fn push(&mut self, value: Register) -> VmResult<()> {
        let stack = self.heap.stack();
        if stack.values.len() >= stack.capacity {
            return Err(self.fault("stack overflow"));
        }
        self.heap.stack_mut().values.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Register> {
        self.heap.stack_mut().values.pop().ok_or(VmError::StackUnderflow)
    }

    fn number(&self, r: Register) -> VmResult<i16> {
        if r.is_number() {
            Ok(r.to_i16())
        } else {
            Err(VmError::InvalidReference(r))
        }
    }

    fn binary(&mut self, f: impl FnOnce(i16, i16) -> i16) -> VmResult<()> {
        let left = self.pop()?;
        let (left, right) = (self.number(left)?, self.number(self.registers.acc)?);
        self.registers.acc = Register::value(f(left, right));
        Ok(())
    }

    fn compare(&mut self, signed: bool, test: fn(Ordering) -> bool) -> VmResult<()> {
        let left = self.pop()?;
        self.registers.prev = self.registers.acc;
        let ordering = compare_registers(left, self.registers.acc, signed);
        self.registers.acc = Register::from_bool(test(ordering));
        Ok(())
    }

    fn jump(&mut self, delta: i32) -> VmResult<()> {
        let frame = self.frame()?;
        let target = frame.ip as i64 + delta as i64;
        if target < 0 {
            return Err(self.fault(format!("jump {delta:+} before start of script")));
        }
        debug!("jump {delta:+}");
        self.frame_mut()?.ip = target as usize;
        Ok(())
    }

    fn step(&mut self) -> VmResult<()> {
        let start_ip = self.frame()?.ip;
        let opcode = self.next();
        let byte = opcode & 1 != 0;
        let mut operands = [0i32; 3];
        let formats = operand_formats(opcode >> 1);
        for (slot, format) in formats.iter().enumerate() {
            operands[slot] = match (format, byte) {
                (Operand::Byte, _) | (Operand::Var, true) => self.next() as i32,
                (Operand::SVar, true) => self.next() as i8 as i32,
                (Operand::Var, false) => self.next16() as i32,
                (Operand::SVar, false) => self.next16() as i16 as i32,
            };
        }
        if let ProcessStatus::Error(e) = &self.status {
            return Err(e.clone());
        }
        if log_enabled!(Level::Debug) {
            let frame = self.frame()?;
            debug!(
                "[{}@{:04x}] {} {:?}",
                self.script_number(frame.script),
                start_ip,
                self.opcode_name(opcode),
                &operands[..formats.len()]
            );
        }
        let [op0, op1, op2] = operands;

        match opcode {
            0x00 | 0x01 => {
                // bnot
                self.registers.acc = Register::value(!self.number(self.registers.acc)?);
            }
            0x02 | 0x03 => {
                // add
                let left = self.pop()?;
                let right = self.registers.acc;
                self.registers.acc = match (left.is_pointer(), right.is_pointer()) {
                    (false, false) => Register::value(left.to_i16().wrapping_add(right.to_i16())),
                    (true, false) => left.offset_by(right.to_i16()),
                    (false, true) => right.offset_by(left.to_i16()),
                    (true, true) => return Err(VmError::InvalidReference(right)),
                };
            }
            0x04 | 0x05 => {
                // sub
                let left = self.pop()?;
                let right = self.registers.acc;
                self.registers.acc = match (left.is_pointer(), right.is_pointer()) {
                    (false, false) => Register::value(left.to_i16().wrapping_sub(right.to_i16())),
                    (true, false) => left.offset_by(right.to_i16().wrapping_neg()),
                    (true, true) if left.segment == right.segment => {
                        Register::value(left.offset.wrapping_sub(right.offset) as i16)
                    }
                    _ => return Err(VmError::InvalidReference(right)),
                };
            }
            0x06 | 0x07 => self.binary(|l, r| l.wrapping_mul(r))?, // mul
            0x08 | 0x09 => self.binary(|l, r| if r == 0 { 0 } else { l.wrapping_div(r) })?, // div
            0x0a | 0x0b => {
                // mod
                self.binary(|l, r| {
                    if r == 0 {
                        return 0;
                    }
                    let m = l.wrapping_rem(r);
                    if m < 0 {
                        m.wrapping_add(r.wrapping_abs())
                    } else {
                        m
                    }
                })?
            }
            0x0c | 0x0d => self.binary(|l, r| ((l as u16).wrapping_shr(r as u32)) as i16)?, // shr
            0x0e | 0x0f => self.binary(|l, r| ((l as u16).wrapping_shl(r as u32)) as i16)?, // shl
            0x10 | 0x11 => self.binary(|l, r| l ^ r)?, // xor
            0x12 | 0x13 => self.binary(|l, r| l & r)?, // and
            0x14 | 0x15 => self.binary(|l, r| l | r)?, // or
            0x16 | 0x17 => {
                // neg
                self.registers.acc = Register::value(self.number(self.registers.acc)?.wrapping_neg());
            }
            0x18 | 0x19 => {
                // not
                self.registers.acc = Register::from_bool(self.registers.acc.is_zero_or_null());
            }
            0x1a | 0x1b => {
                // eq?
                let left = self.pop()?;
                self.registers.prev = self.registers.acc;
                self.registers.acc = Register::from_bool(left == self.registers.acc);
            }
            0x1c | 0x1d => {
                // ne?
                let left = self.pop()?;
                self.registers.prev = self.registers.acc;
                self.registers.acc = Register::from_bool(left != self.registers.acc);
            }
            0x1e | 0x1f => self.compare(true, Ordering::is_gt)?,
            0x20 | 0x21 => self.compare(true, Ordering::is_ge)?,
            0x22 | 0x23 => self.compare(true, Ordering::is_lt)?,
            0x24 | 0x25 => self.compare(true, Ordering::is_le)?,
            0x26 | 0x27 => self.compare(false, Ordering::is_gt)?,
            0x28 | 0x29 => self.compare(false, Ordering::is_ge)?,
            0x2a | 0x2b => self.compare(false, Ordering::is_lt)?,
            0x2c | 0x2d => self.compare(false, Ordering::is_le)?,
            0x2e | 0x2f => {
                // bt
                if !self.registers.acc.is_zero_or_null() {
                    self.jump(op0)?;
                }
            }
            0x30 | 0x31 => {
                // bnt
                if self.registers.acc.is_zero_or_null() {
                    self.jump(op0)?;
                }
            }
            0x32 | 0x33 => self.jump(op0)?, // jmp
            0x34 | 0x35 => {
                // ldi
                self.registers.acc = Register::value(op0 as i16);
            }
            0x36 | 0x37 => self.push(self.registers.acc)?, // push
            0x38 | 0x39 => self.push(Register::value(op0 as i16))?, // pushi
            0x3a | 0x3b => {
                // toss
                self.pop()?;
            }
            0x3c | 0x3d => {
                // dup
                let top = *self.heap.stack().values.last().ok_or(VmError::StackUnderflow)?;
                self.push(top)?;
            }
            0x3e | 0x3f => {
                // link
                for _ in 0..op0 {
                    self.push(Register::NULL)?;
                }
            }
            0x40 | 0x41 => {
                // call
                let start = self.call_frame_start(op1 as usize)?;
                let current = self.frame()?.clone();
                let target = current.ip as i64 + op0 as i64;
                if target < 0 {
                    return Err(self.fault("call before start of script"));
                }
                let stack = self.heap.stack_mut();
                let argc = stack.values[start].to_u16();
                let temps = stack.values.len();
                stack.frames.push(ExecutionContext {
                    kind: FrameKind::Call,
                    ip: target as usize,
                    params: start,
                    argc,
                    temps,
                    unwind: start,
                    selector: None,
                    ..current
                });
            }
            0x42 | 0x43 => {
                // callk
                let start = self.call_frame_start(op1 as usize)?;
                let values = &self.heap.stack().values;
                let argc = values[start].to_u16() as usize;
                let args = KernelArgs::new(values[start + 1..].iter().take(argc).copied().collect());
                let result = self.call_kernel_id(op0 as u16, &args)?;
                if self.abort != AbortRequest::None {
                    // the stack may belong to a different heap by now
                    return Ok(());
                }
                self.registers.acc = result;
                self.heap.stack_mut().values.truncate(start);
            }
            0x44 | 0x45 => self.call_export(SCRIPT_MAIN, op0 as u16, op1 as usize)?, // callb
            0x46 | 0x47 => self.call_export(op0 as u16, op1 as u16, op2 as usize)?, // calle
            0x48 | 0x49 => self.ret()?,
            0x4a | 0x4b => {
                // send
                let object = self.registers.acc;
                self.send(object, object, op0 as usize)?;
            }
            0x50 | 0x51 => {
                // class
                self.registers.acc = self.heap.load_class(self.resources, op0 as u16)?;
            }
            0x54 | 0x55 => {
                // self
                let objp = self.frame()?.objp;
                self.send(objp, objp, op0 as usize)?;
            }
            0x56 | 0x57 => {
                // super
                let class = self.heap.load_class(self.resources, op0 as u16)?;
                let objp = self.frame()?.objp;
                self.send(objp, class, op1 as usize)?;
            }
            0x58 | 0x59 => {
                // &rest
                let frame = self.frame()?;
                let (params, argc, index) = (frame.params, frame.argc as usize, op0 as usize);
                let values = &self.heap.stack().values;
                let rest: Vec<Register> = (index..=argc)
                    .map(|i| values.get(params + i).copied().unwrap_or_default())
                    .collect();
                for value in rest {
                    self.push(value)?;
                }
                self.registers.rest_modifier = (argc + 1).saturating_sub(index);
            }
            0x5a | 0x5b => {
                // lea
                let var_type = ((op0 >> 1) & 3) as u8;
                let mut index = op1 as usize;
                if op0 & 0x10 != 0 {
                    index += self.registers.acc.to_u16() as usize;
                }
                self.registers.acc = self.variable_address(self.variable_type(var_type)?, index)?;
            }
            0x5c | 0x5d => {
                // selfID
                self.registers.acc = self.frame()?.objp;
            }
            0x60 | 0x61 => self.push(self.registers.prev)?, // pprev
            0x62 | 0x63 => self.registers.acc = self.property(op0)?, // pToa
            0x64 | 0x65 => self.set_property(op0, self.registers.acc)?, // aTop
            0x66 | 0x67 => {
                // pTos
                let value = self.property(op0)?;
                self.push(value)?;
            }
            0x68 | 0x69 => {
                // sTop
                let value = self.pop()?;
                self.set_property(op0, value)?;
            }
            0x6a..=0x71 => {
                // ipToa dpToa ipTos dpTos
                let delta = if opcode & 2 == 0 { 1 } else { -1 };
                let value = self.property(op0)?.offset_by(delta);
                self.set_property(op0, value)?;
                if opcode < 0x6e {
                    self.registers.acc = value;
                } else {
                    self.push(value)?;
                }
            }
            0x72 | 0x73 => self.registers.acc = self.lofs(op0)?, // lofsa
            0x74 | 0x75 => {
                // lofss
                let address = self.lofs(op0)?;
                self.push(address)?;
            }
            0x76 | 0x77 => self.push(Register::value(0))?,
            0x78 | 0x79 => self.push(Register::value(1))?,
            0x7a | 0x7b => self.push(Register::value(2))?,
            0x7c | 0x7d => {
                // pushSelf
                let objp = self.frame()?.objp;
                self.push(objp)?;
            }
            0x80..=0xff => self.variable_op(opcode, op0)?,
            _ => return Err(self.fault(format!("invalid opcode {opcode:02x}"))),
        }
        Ok(())
    }

    fn variable_type(&self, bits: u8) -> VmResult<VariableType> {
        VariableType::from_u8(bits).ok_or_else(|| self.fault(format!("bad variable type {bits}")))
    }

    fn variable_op(&mut self, opcode: u8, operand: i32) -> VmResult<()> {
        let opnumber = opcode >> 1;
        let var_type = self.variable_type(opnumber & 3)?;
        let to_stack = opnumber & 0x4 != 0;
        let indexed = opnumber & 0x8 != 0;
        let mut index = operand as usize;
        if indexed {
            index += self.registers.acc.to_u16() as usize;
        }

        match (opnumber >> 4) & 3 {
            0 => {
                let value = self.read_var(var_type, index)?;
                if to_stack {
                    self.push(value)?;
                } else {
                    self.registers.acc = value;
                }
            }
            1 => {
                let value = if to_stack {
                    self.pop()?
                } else if indexed {
                    // the accumulator held the index, the value comes from the stack
                    self.registers.acc = self.pop()?;
                    self.registers.acc
                } else {
                    self.registers.acc
                };
                self.write_var(var_type, index, value)?;
            }
            action => {
                let delta = if action == 2 { 1 } else { -1 };
                let value = self.read_var(var_type, index)?.offset_by(delta);
                self.write_var(var_type, index, value)?;
                if to_stack {
                    self.push(value)?;
                } else {
                    self.registers.acc = value;
                }
            }
        }
        Ok(())
    }

    fn read_var(&self, var_type: VariableType, index: usize) -> VmResult<Register> {
        let frame = self.frame()?;
        match var_type {
            VariableType::Global | VariableType::Local => {
                let seg = self.variables_segment(var_type)?;
                self.heap
                    .locals(seg)?
                    .get(index)
                    .copied()
                    .ok_or(VmError::InvalidReference(Register::new(seg, (index * 2) as u16)))
            }
            VariableType::Temporary => self
                .heap
                .stack()
                .values
                .get(frame.temps + index)
                .copied()
                .ok_or_else(|| self.stack_reference(frame.temps + index)),
            VariableType::Parameter => {
                if index > frame.argc as usize {
                    warn!("Read of parameter {index} beyond argc {}", frame.argc);
                    return Ok(Register::NULL);
                }
                self.heap
                    .stack()
                    .values
                    .get(frame.params + index)
                    .copied()
                    .ok_or_else(|| self.stack_reference(frame.params + index))
            }
        }
    }

    fn write_var(&mut self, var_type: VariableType, index: usize, value: Register) -> VmResult<()> {
        let frame = self.frame()?;
        let (temps, params, argc) = (frame.temps, frame.params, frame.argc);
        let slot = match var_type {
            VariableType::Global | VariableType::Local => {
                let seg = self.variables_segment(var_type)?;
                let locals = self.heap.locals_mut(seg)?;
                return match locals.get_mut(index) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(VmError::InvalidReference(Register::new(seg, (index * 2) as u16))),
                };
            }
            VariableType::Temporary => temps + index,
            VariableType::Parameter => {
                if index > argc as usize {
                    warn!("Write of parameter {index} beyond argc {argc} ignored");
                    return Ok(());
                }
                params + index
            }
        };
        let invalid = self.stack_reference(slot);
        match self.heap.stack_mut().values.get_mut(slot) {
            Some(v) => {
                *v = value;
                Ok(())
            }
            None => Err(invalid),
        }
    }

    fn stack_reference(&self, slot: usize) -> VmError {
        VmError::InvalidReference(Register::new(self.heap.stack_segment(), (slot * 2) as u16))
    }

    fn variables_segment(&self, var_type: VariableType) -> VmResult<SegmentId> {
        match var_type {
            VariableType::Global => self.heap.globals_segment().ok_or_else(|| self.fault("no global variables")),
            _ => self.frame()?.locals.ok_or_else(|| self.fault("script has no local variables")),
        }
    }

    fn variable_address(&self, var_type: VariableType, index: usize) -> VmResult<Register> {
        let frame = self.frame()?;
        let (segment, slot) = match var_type {
            VariableType::Global | VariableType::Local => (self.variables_segment(var_type)?, index),
            VariableType::Temporary => (self.heap.stack_segment(), frame.temps + index),
            VariableType::Parameter => (self.heap.stack_segment(), frame.params + index),
        };
        Ok(Register::new(segment, (slot * 2) as u16))
    }

    fn property(&self, offset: i32) -> VmResult<Register> {
        let objp = self.frame()?.objp;
        let obj = self.heap.get_object(objp)?;
        obj.variables
            .get(Object::property_index(offset as u16))
            .copied()
            .ok_or(VmError::InvalidReference(objp.offset_by(offset as i16)))
    }

    fn set_property(&mut self, offset: i32, value: Register) -> VmResult<()> {
        let objp = self.frame()?.objp;
        if self
            .heap
            .get_object_mut(objp)?
            .set_variable(Object::property_index(offset as u16), value)
        {
            Ok(())
        } else {
            Err(VmError::InvalidReference(objp.offset_by(offset as i16)))
        }
    }

    fn lofs(&self, offset: i32) -> VmResult<Register> {
        let frame = self.frame()?;
        let target = if self.config.version.absolute_lofs() {
            offset
        } else {
            frame.ip as i32 + offset
        };
        Ok(Register::new(frame.script, target as u16))
    }

    /// Index of the argc slot for a call with `framesize` bytes of arguments, after applying &rest
    fn call_frame_start(&mut self, framesize: usize) -> VmResult<usize> {
        let rest = std::mem::take(&mut self.registers.rest_modifier);
        let values = &mut self.heap.stack_mut().values;
        let start = values
            .len()
            .checked_sub(framesize / 2 + 1 + rest)
            .ok_or(VmError::StackUnderflow)?;
        if rest > 0 {
            values[start].add(rest as i16);
        }
        Ok(start)
    }

    fn call_export(&mut self, script: u16, export: u16, framesize: usize) -> VmResult<()> {
        let start = self.call_frame_start(framesize)?;
        let seg = self.heap.instantiate_script(self.resources, script)?;
        let ip = self
            .heap
            .get_script(seg)?
            .export_address(export)
            .ok_or_else(|| self.fault(format!("script {script} has no export {export}")))?;
        let (objp, sendp) = self
            .heap
            .stack()
            .frames
            .last()
            .map_or((Register::NULL, Register::NULL), |f| (f.objp, f.sendp));
        let locals = self.heap.method_locals(seg);
        debug!("Calling export {export} of script {script}");

        let stack = self.heap.stack_mut();
        let argc = stack.values[start].to_u16();
        let temps = stack.values.len();
        stack.frames.push(ExecutionContext {
            kind: FrameKind::Call,
            script: seg,
            ip: ip as usize,
            objp,
            sendp,
            locals,
            params: start,
            argc,
            temps,
            unwind: start,
            selector: None,
        });
        Ok(())
    }

    fn ret(&mut self) -> VmResult<()> {
        let stack = self.heap.stack_mut();
        let frame = stack.frames.pop().ok_or(VmError::StackUnderflow)?;
        stack.values.truncate(frame.unwind);
        self.run_var_selectors()
    }

    /// Dispatches the selectors of a send. Each entry of the frame is a selector, an argc and
    /// the arguments; `lookup` is where resolution starts, `object` the receiver.
    fn send(&mut self, object: Register, lookup: Register, framesize: usize) -> VmResult<()> {
        let rest = std::mem::take(&mut self.registers.rest_modifier);
        let end = self.heap.stack().values.len();
        let start = end
            .checked_sub(framesize / 2 + rest)
            .ok_or(VmError::StackUnderflow)?;
        if rest > 0 {
            if let Some(argc) = self.heap.stack_mut().values.get_mut(start + 1) {
                argc.add(rest as i16);
            }
        }

        let frames = match self.send_frames(object, lookup, start, end) {
            Ok(frames) => frames,
            Err(e) => {
                self.heap.stack_mut().values.truncate(start);
                return Err(e);
            }
        };

        let stack = self.heap.stack_mut();
        if frames.is_empty() {
            stack.values.truncate(start);
        } else {
            stack.frames.extend(frames.into_iter().rev());
        }
        self.run_var_selectors()
    }

    fn send_frames(&self, object: Register, lookup: Register, start: usize, end: usize) -> VmResult<Vec<ExecutionContext>> {
        let values = &self.heap.stack().values;
        let mut frames: Vec<ExecutionContext> = Vec::new();
        let mut i = start;
        while i + 1 < end {
            let selector = values[i].to_u16();
            let argc = values[i + 1].to_u16() as usize;
            if i + 2 + argc > end {
                return Err(self.fault(format!("send of selector {selector} with {argc} arguments overruns the frame")));
            }
            if log_enabled!(Level::Debug) {
                debug!("send {}::{} ({argc} args)", self.heap.object_name(object), self.selectors.name(selector));
            }

            let kind_and_address = match self.heap.lookup_selector(lookup, selector)? {
                SelectorLookup::Variable(index) => {
                    let write = match argc {
                        0 => None,
                        _ => Some(values[i + 2]),
                    };
                    Some((FrameKind::VarSelector { index, write }, Register::new(object.segment, 0)))
                }
                SelectorLookup::Method(address) => Some((FrameKind::Call, address)),
                SelectorLookup::Absent => {
                    let e = VmError::SelectorNotFound { object, selector };
                    if self.config.selector_policy == SelectorPolicy::Stop {
                        return Err(e);
                    }
                    warn!("{e} ({}::{}), skipped", self.heap.object_name(object), self.selectors.name(selector));
                    None
                }
            };

            if let Some((kind, address)) = kind_and_address {
                frames.push(ExecutionContext {
                    kind,
                    script: address.segment,
                    ip: address.offset as usize,
                    objp: object,
                    sendp: lookup,
                    locals: self.heap.method_locals(address.segment),
                    params: i + 1,
                    argc: argc as u16,
                    temps: end,
                    unwind: end,
                    selector: Some(selector),
                });
            }
            i += 2 + argc;
        }
        // the frame that runs last clears the whole send off the stack
        if let Some(last) = frames.last_mut() {
            last.unwind = start;
        }
        Ok(frames)
    }

    /// Property accesses queued by a send run as soon as they reach the top of the frame stack
    fn run_var_selectors(&mut self) -> VmResult<()> {
        loop {
            let Some(frame) = self.heap.stack().frames.last() else {
                return Ok(());
            };
            let FrameKind::VarSelector { index, write } = frame.kind else {
                return Ok(());
            };
            let (objp, unwind) = (frame.objp, frame.unwind);
            let stack = self.heap.stack_mut();
            stack.frames.pop();
            stack.values.truncate(unwind);

            match write {
                Some(value) => {
                    self.heap.get_object_mut(objp)?.set_variable(index, value);
                }
                None => self.registers.acc = self.heap.get_object(objp)?.variable(index),
            }
        }
    }

    pub fn opcode_name(&self, opcode: u8) -> String {
        match self.opcode_names.get((opcode >> 1) as usize) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => builtin_opcode_name(opcode),
        }
    }

    pub fn disassemble(&self, script: u16, offset: usize) -> VmResult<String> {
        let seg = self
            .heap
            .script_segment(script)
            .ok_or(VmError::ResourceMissing(ResourceType::Script, script))?;
        let code = &self.heap.get_script(seg)?.buf;
        let (opcode, operands, len) = decode(code, offset).ok_or_else(|| VmError::BytecodeFault {
            script,
            offset,
            reason: "instruction runs past end of script".into(),
        })?;
        let bytes = code[offset..offset + len].iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
        let mut line = format!("{offset:04x}: {bytes:<15} {}", self.opcode_name(opcode));
        for operand in operands {
            line.push_str(&format!(" {operand}"));
        }
        Ok(line)
    }
}
