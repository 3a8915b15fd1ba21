// Prelinker: turns a raw, encoded ROM image into a `Program` the VM can
// execute directly. Two things happen here that the assembler/decoder never
// do on their own:
//
//   1. register operands are resolved to a shared handle into the register
//      file once, at load time, instead of being re-looked-up on every frame;
//   2. a handful of common instruction shapes are rewritten to cheaper,
//      more specific dispatch variants (the "peephole" pass) — see
//      `specialize` below for the exact list.
//
// This mirrors the loader/prelinker found in the reference FV-1 firmware
// loader, including the one two-instruction fusion (a WRAX with no scale
// immediately followed by an RDAX) that collapses into a single dispatch
// record.

use crate::error::LoadError;
use crate::opcode::{self, Instruction};
use crate::registers::RegPtr;

pub const MAX_INSTRUCTIONS: usize = 128;
const ONE: i32 = 1 << 23;

#[derive(Clone)]
pub enum DispatchOp {
    Rda { addr: u16, scale: i32 },
    Rmpa { scale: i32 },
    Wra { addr: u16, scale: i32 },
    Wrap { addr: u16, scale: i32 },
    Rdax { reg: RegPtr, scale: i32 },
    RdaxNoScale { reg: RegPtr },
    Rdfx { reg: RegPtr, scale: i32 },
    Ldax { reg: RegPtr },
    Wrax { reg: RegPtr, scale: i32 },
    WraxNoScale { reg: RegPtr },
    WraxRdax { wreg: RegPtr, rreg: RegPtr, rscale: i32 },
    Wrhx { reg: RegPtr, scale: i32 },
    Wrlx { reg: RegPtr, scale: i32 },
    Maxx { reg: RegPtr, scale: i32 },
    Mulx { reg: RegPtr },
    Log { scale: i32, offset: i32 },
    Exp { scale: i32, offset: i32 },
    ExpRaw,
    Sof { scale: i32, offset: i32 },
    SofSet { value: i32 },
    SofAdd { offset: i32 },
    SofMul { scale: i32 },
    And { mask: i32 },
    Or { mask: i32 },
    Xor { mask: i32 },
    Skp { flags: opcode::SkpFlags, count: u8 },
    Wlds { lfo: opcode::Lfo, rate: i32, range: i32 },
    Wldr { lfo: opcode::Lfo, rate: i32, amp_index: i32 },
    Jam { lfo: opcode::Lfo },
    Cho { mode: opcode::ChoMode, lfo: opcode::Lfo, flags: opcode::ChoFlags, addr: u16 },
    Nop,
    End,
}

pub struct Program {
    pub ops: Vec<DispatchOp>,
}

/// Decode and prelink a raw, big-endian-packed ROM image (as produced by the
/// assembler, or loaded straight off a bank EEPROM dump) into an executable
/// `Program`. A `None`/empty `rom` pads out to a full bank of NOPs, matching
/// the reference loader's behaviour when no program is present.
pub fn load(rom: Option<&[u8]>, registers: &crate::registers::RegisterFile) -> Result<Program, LoadError> {
    let mut ops = Vec::with_capacity(MAX_INSTRUCTIONS + 1);

    if let Some(rom) = rom {
        for chunk in rom.chunks_exact(4) {
            let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let instr = match opcode::decode(word) {
                Some(instr) => instr,
                None => break, // END sentinel
            };
            if ops.len() >= MAX_INSTRUCTIONS {
                return Err(LoadError::TooManyInstructions { count: ops.len() + 1 });
            }
            specialize(&mut ops, instr, registers);
        }
    } else {
        ops.resize_with(MAX_INSTRUCTIONS, || DispatchOp::Nop);
    }

    ops.push(DispatchOp::End);
    Ok(Program { ops })
}

fn specialize(ops: &mut Vec<DispatchOp>, instr: Instruction, registers: &crate::registers::RegisterFile) {
    log::debug!("prelinking {}", instr);
    match instr {
        Instruction::Sof { scale, offset } if scale == 0 => {
            log::warn!("SOF(0, k) -> SET {}", offset);
            ops.push(DispatchOp::SofSet { value: offset });
        }
        Instruction::Sof { scale, offset } if scale == ONE => {
            log::warn!("SOF(1.0, k) -> ADD {}", offset);
            ops.push(DispatchOp::SofAdd { offset });
        }
        Instruction::Sof { scale, offset } if offset == 0 => {
            log::warn!("SOF(s, 0) -> MUL {}", scale);
            ops.push(DispatchOp::SofMul { scale });
        }
        Instruction::Sof { scale, offset } => ops.push(DispatchOp::Sof { scale, offset }),

        Instruction::Exp { scale, offset } if scale == ONE && offset == 0 => {
            log::warn!("EXP(1.0, 0) -> raw EXP");
            ops.push(DispatchOp::ExpRaw);
        }
        Instruction::Exp { scale, offset } => ops.push(DispatchOp::Exp { scale, offset }),

        Instruction::Rdax { reg, scale } if scale == ONE => {
            ops.push(DispatchOp::RdaxNoScale { reg: registers.get(reg) });
        }
        Instruction::Rdax { reg, scale } => {
            ops.push(DispatchOp::Rdax { reg: registers.get(reg), scale });
        }

        Instruction::Wrax { reg, scale } if scale == ONE => {
            ops.push(DispatchOp::WraxNoScale { reg: registers.get(reg) });
        }
        // A WRAX with no scale (ACC is fully discarded after the write)
        // immediately followed by an RDAX fuses into one dispatch slot, via
        // `fuse_wrax_rdax` below — the RDAX never needs ACC's pre-write
        // value, only the register being written and the register read.
        Instruction::Wrax { reg, scale } => {
            ops.push(DispatchOp::Wrax { reg: registers.get(reg), scale });
        }

        Instruction::Rdfx { reg, scale } if scale == 0 => {
            ops.push(DispatchOp::Ldax { reg: registers.get(reg) });
        }
        Instruction::Rdfx { reg, scale } => {
            ops.push(DispatchOp::Rdfx { reg: registers.get(reg), scale });
        }

        Instruction::Wrhx { reg, scale } => ops.push(DispatchOp::Wrhx { reg: registers.get(reg), scale }),
        Instruction::Wrlx { reg, scale } => ops.push(DispatchOp::Wrlx { reg: registers.get(reg), scale }),
        Instruction::Maxx { reg, scale } => ops.push(DispatchOp::Maxx { reg: registers.get(reg), scale }),
        Instruction::Mulx { reg } => ops.push(DispatchOp::Mulx { reg: registers.get(reg) }),

        Instruction::Rda { addr, scale } => ops.push(DispatchOp::Rda { addr, scale }),
        Instruction::Rmpa { scale } => ops.push(DispatchOp::Rmpa { scale }),
        Instruction::Wra { addr, scale } => ops.push(DispatchOp::Wra { addr, scale }),
        Instruction::Wrap { addr, scale } => ops.push(DispatchOp::Wrap { addr, scale }),
        Instruction::Log { scale, offset } => ops.push(DispatchOp::Log { scale, offset }),
        Instruction::And { mask } => ops.push(DispatchOp::And { mask }),
        Instruction::Or { mask } => ops.push(DispatchOp::Or { mask }),
        Instruction::Xor { mask } => ops.push(DispatchOp::Xor { mask }),
        Instruction::Skp { flags, count } => ops.push(DispatchOp::Skp { flags, count }),
        Instruction::Wlds { lfo, rate, range } => ops.push(DispatchOp::Wlds { lfo, rate, range }),
        Instruction::Wldr { lfo, rate, amp_index } => ops.push(DispatchOp::Wldr { lfo, rate, amp_index }),
        Instruction::Jam { lfo } => ops.push(DispatchOp::Jam { lfo }),
        Instruction::Cho { mode, lfo, flags, addr } => {
            ops.push(DispatchOp::Cho { mode, lfo, flags, addr })
        }
    }
    fuse_wrax_rdax(ops);
}

/// Looks at the last two dispatch slots and collapses `WRAX(r, 0)` followed
/// by `RDAX(r2, s)` into a single `WraxRdax` record. Because this changes
/// the *previous* slot in place, the instruction count the program actually
/// dispatches can be smaller than the number of decoded words — exactly as
/// in the reference loader.
fn fuse_wrax_rdax(ops: &mut Vec<DispatchOp>) {
    if ops.len() < 2 {
        return;
    }
    let rdax = match ops.last() {
        Some(DispatchOp::Rdax { reg, scale }) => Some((RegPtrRef::clone_from(reg), *scale)),
        _ => None,
    };
    let Some((rreg, rscale)) = rdax else { return };
    let wrax_zero = matches!(&ops[ops.len() - 2], DispatchOp::Wrax { scale, .. } if *scale == 0);
    if !wrax_zero {
        return;
    }
    let wreg = match &ops[ops.len() - 2] {
        DispatchOp::Wrax { reg, .. } => RegPtrRef::clone_from(reg),
        _ => unreachable!(),
    };
    ops.pop();
    ops.pop();
    ops.push(DispatchOp::WraxRdax { wreg, rreg, rscale });
}

/// Tiny helper so `fuse_wrax_rdax` can clone an `Rc` out of a borrowed match
/// arm without fighting the borrow checker over `ops`.
struct RegPtrRef;
impl RegPtrRef {
    fn clone_from(reg: &RegPtr) -> RegPtr {
        std::rc::Rc::clone(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterFile;

    fn rom_of(words: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for w in words {
            bytes.extend_from_slice(&w.to_be_bytes());
        }
        bytes.extend_from_slice(&opcode::END_WORD.to_be_bytes());
        bytes
    }

    #[test]
    fn empty_rom_pads_with_nops_and_an_end() {
        let regs = RegisterFile::new();
        let program = load(None, &regs).unwrap();
        assert_eq!(program.ops.len(), MAX_INSTRUCTIONS + 1);
        assert!(matches!(program.ops.last(), Some(DispatchOp::End)));
    }

    #[test]
    fn sof_zero_specializes_to_set() {
        let regs = RegisterFile::new();
        let word = opcode::encode(&Instruction::Sof { scale: 0, offset: 1234 });
        let program = load(Some(&rom_of(&[word])), &regs).unwrap();
        assert!(matches!(program.ops[0], DispatchOp::SofSet { value: 1234 }));
    }

    #[test]
    fn sof_unity_scale_specializes_to_add() {
        let regs = RegisterFile::new();
        let word = opcode::encode(&Instruction::Sof { scale: ONE, offset: 99 });
        let program = load(Some(&rom_of(&[word])), &regs).unwrap();
        assert!(matches!(program.ops[0], DispatchOp::SofAdd { offset: 99 }));
    }

    #[test]
    fn rdfx_zero_scale_specializes_to_ldax() {
        let regs = RegisterFile::new();
        let word = opcode::encode(&Instruction::Rdfx { reg: 0x20, scale: 0 });
        let program = load(Some(&rom_of(&[word])), &regs).unwrap();
        assert!(matches!(program.ops[0], DispatchOp::Ldax { .. }));
    }

    #[test]
    fn wrax_zero_then_rdax_fuses_into_one_slot() {
        let regs = RegisterFile::new();
        let wrax = opcode::encode(&Instruction::Wrax { reg: 0x20, scale: 0 });
        let rdax = opcode::encode(&Instruction::Rdax { reg: 0x21, scale: 1 << 20 });
        let program = load(Some(&rom_of(&[wrax, rdax])), &regs).unwrap();
        assert_eq!(program.ops.len(), 2);
        assert!(matches!(program.ops[0], DispatchOp::WraxRdax { .. }));
        assert!(matches!(program.ops[1], DispatchOp::End));
    }

    #[test]
    fn too_many_instructions_is_an_error() {
        let regs = RegisterFile::new();
        let nop = opcode::encode(&Instruction::And { mask: 0x00ff_ffff });
        let words: Vec<u32> = std::iter::repeat(nop).take(MAX_INSTRUCTIONS + 1).collect();
        let rom = rom_of(&words);
        assert!(load(Some(&rom), &regs).is_err());
    }
}
