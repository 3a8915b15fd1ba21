// The FV-1 core: accumulator, register file, delay memory and the four LFOs,
// wired together the way `FV1`'s opcode methods wire them in the reference
// implementation. `Cpu::step` executes exactly one dispatch record;
// `Cpu::run_frame` drives a whole program to its `End` sentinel and then
// advances every piece of per-frame state (delay pointer, LFOs) once.
//
// The accumulator/previous-accumulator invariant is the one rule every
// opcode obeys without exception: ACC is copied into PACC as the very first
// thing a step does. WRLX and WRHX are the one pair of opcodes that need the
// *old* PACC value for their own computation, so they stash it in a local
// before performing that copy — never after.

use crate::delay::DelayMemory;
use crate::fixed::FixedPoint;
use crate::lfo::{RampLfo, SinLfo};
use crate::loader::{DispatchOp, Program};
use crate::opcode::{ChoFlags, ChoMode, Lfo, SkpFlags};
use crate::registers::{addr, RegisterFile};

const ONE: i32 = 1 << 23;

pub struct Cpu {
    pub registers: RegisterFile,
    pub delay: DelayMemory,
    acc: FixedPoint,
    pacc: FixedPoint,
    lr: FixedPoint,
    sin_lfos: [SinLfo; 2],
    ramp_lfos: [RampLfo; 2],
    program: Program,
    first_run: bool,
}

impl Cpu {
    pub fn new(program: Program) -> Self {
        Cpu {
            registers: RegisterFile::new(),
            delay: DelayMemory::new(),
            acc: FixedPoint::zero(),
            pacc: FixedPoint::zero(),
            lr: FixedPoint::zero(),
            sin_lfos: [SinLfo::new(), SinLfo::new()],
            ramp_lfos: [RampLfo::new(), RampLfo::new()],
            program,
            first_run: true,
        }
    }

    pub fn load(&mut self, program: Program) {
        self.program = program;
        self.acc = FixedPoint::zero();
        self.pacc = FixedPoint::zero();
        self.lr = FixedPoint::zero();
        for lfo in &mut self.sin_lfos {
            lfo.jam();
        }
        for lfo in &mut self.ramp_lfos {
            lfo.jam();
        }
        self.first_run = true;
    }

    pub fn acc(&self) -> FixedPoint {
        self.acc
    }

    /// Stage the two audio inputs and three pot values into their registers,
    /// run the loaded program to its `End` sentinel, then advance every
    /// piece of per-frame state exactly once. Returns the stereo output pair.
    pub fn run_frame(&mut self, in_l: FixedPoint, in_r: FixedPoint, pot0: FixedPoint, pot1: FixedPoint, pot2: FixedPoint) -> (FixedPoint, FixedPoint) {
        self.registers.write(addr::ADCL, in_l);
        self.registers.write(addr::ADCR, in_r);
        self.registers.write(addr::POT0, pot0);
        self.registers.write(addr::POT1, pot1);
        self.registers.write(addr::POT2, pot2);

        let mut pc = 0usize;
        while pc < self.program.ops.len() {
            let op = &self.program.ops[pc];
            if matches!(op, DispatchOp::End) {
                break;
            }
            pc = self.step(pc);
        }

        self.first_run = false;
        self.delay.decrement_ptr();
        for (i, lfo) in self.sin_lfos.iter_mut().enumerate() {
            let rate_addr = if i == 0 { addr::SIN0_RATE } else { addr::SIN1_RATE };
            lfo.tick(self.registers.read(rate_addr).raw());
        }
        for (i, lfo) in self.ramp_lfos.iter_mut().enumerate() {
            let (rate_addr, range_addr) = if i == 0 {
                (addr::RMP0_RATE, addr::RMP0_RANGE)
            } else {
                (addr::RMP1_RATE, addr::RMP1_RANGE)
            };
            lfo.tick(self.registers.read(rate_addr).raw(), self.registers.read(range_addr).raw());
        }

        (self.registers.read(addr::DACL), self.registers.read(addr::DACR))
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    fn sin_lfo(&self, lfo: Lfo) -> (&SinLfo, u8) {
        match lfo {
            Lfo::Sin0 => (&self.sin_lfos[0], addr::SIN0_RANGE),
            Lfo::Sin1 => (&self.sin_lfos[1], addr::SIN1_RANGE),
            _ => unreachable!("not a sin LFO"),
        }
    }

    fn ramp_lfo(&self, lfo: Lfo) -> (&RampLfo, u8) {
        match lfo {
            Lfo::Ramp0 => (&self.ramp_lfos[0], addr::RMP0_RANGE),
            Lfo::Ramp1 => (&self.ramp_lfos[1], addr::RMP1_RANGE),
            _ => unreachable!("not a ramp LFO"),
        }
    }

    /// Execute the dispatch record at `pc` and return the index of the next
    /// one to run (`pc + 1`, except for SKP which may jump further).
    fn step(&mut self, pc: usize) -> usize {
        let op = self.program.ops[pc].clone();
        match op {
            DispatchOp::Wrlx { reg, scale } => {
                let old_pacc = self.pacc;
                self.pacc = self.acc;
                *reg.borrow_mut() = self.acc;
                let delta = FixedPoint::from_raw(old_pacc.raw() - self.acc.raw());
                self.acc = delta.mul_raw(scale).add(old_pacc);
                return pc + 1;
            }
            DispatchOp::Wrhx { reg, scale } => {
                let old_pacc = self.pacc;
                self.pacc = self.acc;
                *reg.borrow_mut() = self.acc;
                self.acc = self.acc.mul_raw(scale).add(old_pacc);
                return pc + 1;
            }
            DispatchOp::Skp { flags, count } => {
                if self.skip_condition(flags) {
                    return pc + 1 + count as usize;
                }
                return pc + 1;
            }
            _ => {}
        }

        self.pacc = self.acc;

        match op {
            DispatchOp::Rda { addr, scale } => {
                let raw = self.delay.get(addr as i32);
                self.lr = FixedPoint::from_raw(raw);
                self.acc = self.acc.mul_raw(scale).add(self.lr);
            }
            DispatchOp::Rmpa { scale } => {
                // ADDR_PTR is staged by CHO RDAL + WRAX ADDR_PTR with the raw
                // ramp position (0..=AMP_4096, 22 bits): the high 7 bits give
                // the delay address, the low 15 give the interpolation
                // fraction, widened to RMPA's Q.23 frac.
                let ptr = self.registers.read(addr::ADDR_PTR).raw();
                let address = ptr >> 15;
                let frac = (ptr & 0x7fff) << 8;
                let raw = self.delay.get_interpolated(address, frac);
                self.lr = FixedPoint::from_raw(raw);
                self.acc = self.acc.mul_raw(scale).add(self.lr);
            }
            DispatchOp::Wra { addr, scale } => {
                self.delay.set(addr as i32, self.acc.raw());
                self.acc = self.acc.mul_raw(scale);
            }
            DispatchOp::Wrap { addr, scale } => {
                let old = self.delay.get(addr as i32);
                self.delay.set(addr as i32, self.acc.raw());
                self.acc = self.acc.mul_raw(scale).add(FixedPoint::from_raw(old));
            }
            DispatchOp::Rdax { reg, scale } => {
                self.acc = self.acc.add(reg.borrow().mul_raw(scale));
            }
            DispatchOp::RdaxNoScale { reg } => {
                self.acc = self.acc.add(*reg.borrow());
            }
            DispatchOp::Rdfx { reg, scale } => {
                let r = *reg.borrow();
                self.acc = FixedPoint::from_raw(self.acc.raw() - r.raw()).mul_raw(scale).add(r);
            }
            DispatchOp::Ldax { reg } => {
                self.acc = *reg.borrow();
            }
            DispatchOp::Wrax { reg, scale } => {
                *reg.borrow_mut() = self.acc;
                self.acc = self.acc.mul_raw(scale);
            }
            DispatchOp::WraxNoScale { reg } => {
                *reg.borrow_mut() = self.acc;
                self.acc = FixedPoint::zero();
            }
            DispatchOp::WraxRdax { wreg, rreg, rscale } => {
                // WRAX(r, 0) zeroed ACC, so the fused RDAX's accumulate
                // starts from zero: the result is exactly rreg * rscale.
                *wreg.borrow_mut() = self.acc;
                self.acc = rreg.borrow().mul_raw(rscale);
            }
            DispatchOp::Maxx { reg, scale } => {
                let candidate = reg.borrow().mul_raw(scale).abs();
                self.acc = if candidate.raw() > self.acc.abs().raw() { candidate } else { self.acc.abs() };
            }
            DispatchOp::Mulx { reg } => {
                self.acc = self.acc.mul(*reg.borrow());
            }
            DispatchOp::Log { scale, offset } => {
                self.acc = self.acc.log2().mul_raw(scale).add(FixedPoint::from_raw(offset));
            }
            DispatchOp::Exp { scale, offset } => {
                self.acc = self.acc.exp2().mul_raw(scale).add(FixedPoint::from_raw(offset));
            }
            DispatchOp::ExpRaw => {
                self.acc = self.acc.exp2();
            }
            DispatchOp::Sof { scale, offset } => {
                self.acc = self.acc.mul_raw(scale).add(FixedPoint::from_raw(offset));
            }
            DispatchOp::SofSet { value } => {
                self.acc = FixedPoint::from_raw(value);
            }
            DispatchOp::SofAdd { offset } => {
                self.acc = self.acc.add(FixedPoint::from_raw(offset));
            }
            DispatchOp::SofMul { scale } => {
                self.acc = self.acc.mul_raw(scale);
            }
            DispatchOp::And { mask } => self.acc = self.acc.and(mask),
            DispatchOp::Or { mask } => self.acc = self.acc.or(mask),
            DispatchOp::Xor { mask } => self.acc = self.acc.xor(mask),
            DispatchOp::Wlds { lfo, rate, range } => {
                let (rate_addr, range_addr) = sin_registers(lfo);
                self.registers.write(rate_addr, FixedPoint::from_raw(rate << 14));
                self.registers.write(range_addr, FixedPoint::from_raw(range));
            }
            DispatchOp::Wldr { lfo, rate, amp_index } => {
                let (rate_addr, range_addr) = ramp_registers(lfo);
                self.registers.write(rate_addr, FixedPoint::from_raw(rate << 14));
                self.registers
                    .write(range_addr, FixedPoint::from_raw(RampLfo::pack_range(amp_index)));
            }
            DispatchOp::Jam { lfo } => {
                let idx = ramp_index(lfo);
                self.ramp_lfos[idx].jam();
            }
            DispatchOp::Cho { mode, lfo, flags, addr } => self.execute_cho(mode, lfo, flags, addr),
            DispatchOp::Nop => {}
            DispatchOp::End => {}
            DispatchOp::Wrlx { .. } | DispatchOp::Wrhx { .. } | DispatchOp::Skp { .. } => {
                unreachable!("handled above")
            }
        }
        pc + 1
    }

    fn skip_condition(&self, flags: SkpFlags) -> bool {
        if flags.contains(SkpFlags::RUN) {
            return !self.is_first_run();
        }
        (flags.contains(SkpFlags::NEG) && self.acc.is_negative())
            || (flags.contains(SkpFlags::GEZ) && !self.acc.is_negative())
            || (flags.contains(SkpFlags::ZRO) && self.acc.is_zero())
            || (flags.contains(SkpFlags::ZRC) && (self.acc.is_negative() != self.pacc.is_negative()))
    }

    fn execute_cho(&mut self, mode: ChoMode, lfo: Lfo, flags: ChoFlags, addr: u16) {
        match mode {
            ChoMode::Rda => {
                let offset = self.cho_address_offset(lfo, flags);
                let raw = self.delay.get(addr as i32 + offset);
                self.acc = self.acc.add(FixedPoint::from_raw(raw));
            }
            ChoMode::Sof => {
                let coeff = self.cho_coefficient(lfo, flags);
                self.acc = self.acc.mul_raw(coeff).add(FixedPoint::from_raw((addr as i32) << 8));
            }
            ChoMode::Rdal => {
                let raw = self.cho_raw_lfo_value(lfo, flags);
                self.acc = FixedPoint::from_raw(raw);
            }
        }
    }

    /// The selected LFO's raw sample, before any mode-specific shift or sign
    /// flip is applied. `ChoMode::Rdal` stores this straight into ACC; the
    /// address-offset and coefficient paths derive further from it.
    fn cho_raw_lfo_value(&self, lfo: Lfo, flags: ChoFlags) -> i32 {
        match lfo {
            Lfo::Sin0 | Lfo::Sin1 => {
                let (sin, range_addr) = self.sin_lfo(lfo);
                let range = self.registers.read(range_addr).raw();
                if flags.contains(ChoFlags::COS) {
                    sin.cos(range)
                } else {
                    sin.sin(range)
                }
            }
            Lfo::Ramp0 | Lfo::Ramp1 => {
                let (ramp, _) = self.ramp_lfo(lfo);
                ramp.position()
            }
        }
    }

    fn cho_address_offset(&self, lfo: Lfo, flags: ChoFlags) -> i32 {
        let raw = self.cho_raw_lfo_value(lfo, flags) >> 10;
        if flags.contains(ChoFlags::COMPA) {
            -raw
        } else {
            raw
        }
    }

    fn cho_coefficient(&self, lfo: Lfo, flags: ChoFlags) -> i32 {
        let raw = match lfo {
            Lfo::Sin0 | Lfo::Sin1 => self.cho_raw_lfo_value(lfo, flags),
            Lfo::Ramp0 | Lfo::Ramp1 => {
                let (ramp, range_addr) = self.ramp_lfo(lfo);
                let range = self.registers.read(range_addr).raw();
                ramp.xfade(range)
            }
        };
        if flags.contains(ChoFlags::COMPC) {
            ONE - raw
        } else {
            raw
        }
    }
}

fn sin_registers(lfo: Lfo) -> (u8, u8) {
    match lfo {
        Lfo::Sin0 => (addr::SIN0_RATE, addr::SIN0_RANGE),
        Lfo::Sin1 => (addr::SIN1_RATE, addr::SIN1_RANGE),
        _ => unreachable!("WLDS takes a sin LFO"),
    }
}

fn ramp_registers(lfo: Lfo) -> (u8, u8) {
    match lfo {
        Lfo::Ramp0 => (addr::RMP0_RATE, addr::RMP0_RANGE),
        Lfo::Ramp1 => (addr::RMP1_RATE, addr::RMP1_RANGE),
        _ => unreachable!("WLDR takes a ramp LFO"),
    }
}

fn ramp_index(lfo: Lfo) -> usize {
    match lfo {
        Lfo::Ramp0 => 0,
        Lfo::Ramp1 => 1,
        _ => unreachable!("JAM takes a ramp LFO"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;
    use crate::opcode::Instruction;
    use crate::registers::RegisterFile;

    fn program_of(words: &[Instruction]) -> Program {
        let regs = RegisterFile::new();
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&crate::opcode::encode(w).to_be_bytes());
        }
        bytes.extend_from_slice(&crate::opcode::END_WORD.to_be_bytes());
        loader::load(Some(&bytes), &regs).unwrap()
    }

    #[test]
    fn pass_through_program_copies_input_to_output() {
        let program = program_of(&[
            Instruction::Rdax { reg: addr::ADCL, scale: ONE },
            Instruction::Wrax { reg: addr::DACL, scale: 0 },
            Instruction::Rdax { reg: addr::ADCR, scale: ONE },
            Instruction::Wrax { reg: addr::DACR, scale: 0 },
        ]);
        let mut cpu = Cpu::new(program);
        let (l, r) = cpu.run_frame(
            FixedPoint::from_float(0.25),
            FixedPoint::from_float(-0.5),
            FixedPoint::zero(),
            FixedPoint::zero(),
            FixedPoint::zero(),
        );
        assert!((l.to_float() - 0.25).abs() < 1e-4);
        assert!((r.to_float() + 0.5).abs() < 1e-4);
    }

    #[test]
    fn gain_program_scales_the_input() {
        let program = program_of(&[
            Instruction::Rdax { reg: addr::ADCL, scale: ONE / 2 },
            Instruction::Wrax { reg: addr::DACL, scale: 0 },
        ]);
        let mut cpu = Cpu::new(program);
        let (l, _) = cpu.run_frame(
            FixedPoint::from_float(0.5),
            FixedPoint::zero(),
            FixedPoint::zero(),
            FixedPoint::zero(),
            FixedPoint::zero(),
        );
        assert!((l.to_float() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn acc_saturates_instead_of_wrapping() {
        let program = program_of(&[
            Instruction::Sof { scale: ONE, offset: ONE - 1 },
            Instruction::Sof { scale: ONE, offset: ONE - 1 },
        ]);
        let mut cpu = Cpu::new(program);
        cpu.run_frame(FixedPoint::zero(), FixedPoint::zero(), FixedPoint::zero(), FixedPoint::zero(), FixedPoint::zero());
        assert_eq!(cpu.acc().raw(), crate::fixed::MAX);
    }

    #[test]
    fn zro_skip_is_taken_only_when_acc_is_exactly_zero() {
        let program = program_of(&[
            Instruction::Skp { flags: SkpFlags::ZRO, count: 1 },
            Instruction::Sof { scale: 0, offset: ONE - 1 },
        ]);
        let mut cpu = Cpu::new(program);
        cpu.run_frame(FixedPoint::zero(), FixedPoint::zero(), FixedPoint::zero(), FixedPoint::zero(), FixedPoint::zero());
        assert_eq!(cpu.acc().raw(), 0);
    }
}
