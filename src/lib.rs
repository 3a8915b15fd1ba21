pub mod assembler;
pub mod delay;
pub mod disasm;
pub mod error;
pub mod fixed;
pub mod lfo;
pub mod loader;
pub mod opcode;
pub mod registers;
pub mod vm;

use error::{AsmError, LoadError};
use fixed::FixedPoint;
use loader::Program;
use registers::RegisterFile;
use vm::Cpu;

/// A whole patch: the program a `Vm` runs plus whatever display metadata the
/// source carried (POT comments), for front-ends that want to label a
/// program's controls rather than just running it blind.
pub struct Patch {
    pub instructions: Vec<opcode::Instruction>,
    pub pot_labels: Vec<String>,
}

impl Patch {
    pub fn assemble(source: &str) -> Result<Self, AsmError> {
        let assembled = assembler::assemble(source)?;
        Ok(Patch {
            instructions: assembled.instructions,
            pot_labels: assembled.pot_labels,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut rom = Vec::with_capacity(self.instructions.len() * 4);
        for instr in &self.instructions {
            rom.extend_from_slice(&opcode::encode(instr).to_be_bytes());
        }
        rom
    }
}

fn to_load_error(e: LoadError) -> AsmError {
    match e {
        LoadError::TooManyInstructions { count } => AsmError::ProgramTooLong { count },
        LoadError::RegisterOutOfRange { addr } => AsmError::OperandRange {
            line: 0,
            what: "register address",
            value: addr as i64,
        },
    }
}

/// Top-level handle on a running FV-1: a patch loaded into the VM core,
/// ready to process one frame of stereo audio plus three pot values at a
/// time. Loading a new patch resets the accumulator, LFOs and delay pointer
/// exactly as power-cycling the chip would, but leaves the register file and
/// delay memory contents alone — a bank switch on real hardware does the
/// same.
pub struct Vm {
    cpu: Cpu,
    pot_labels: Vec<String>,
}

impl Vm {
    /// Assemble `source` and load it as the running patch.
    pub fn from_source(source: &str) -> Result<Self, AsmError> {
        let patch = Patch::assemble(source)?;
        let registers = RegisterFile::new();
        let rom = patch.encode();
        let program = loader::load(Some(&rom), &registers).map_err(to_load_error)?;
        Ok(Vm::from_program(program, patch.pot_labels))
    }

    /// Load a pre-encoded ROM image (e.g. a bank dump read off an EEPROM).
    pub fn from_rom(rom: &[u8]) -> Result<Self, LoadError> {
        let registers = RegisterFile::new();
        let program = loader::load(Some(rom), &registers)?;
        Ok(Vm::from_program(program, Vec::new()))
    }

    fn from_program(program: Program, pot_labels: Vec<String>) -> Self {
        Vm {
            cpu: Cpu::new(program),
            pot_labels,
        }
    }

    /// Replace the running patch, re-assembling from source. LFOs, the
    /// accumulator and PACC are reset; delay memory and the register file
    /// are left as they were.
    pub fn reload(&mut self, source: &str) -> Result<(), AsmError> {
        let patch = Patch::assemble(source)?;
        let rom = patch.encode();
        let program = loader::load(Some(&rom), &self.cpu.registers).map_err(to_load_error)?;
        self.cpu.load(program);
        self.pot_labels = patch.pot_labels;
        Ok(())
    }

    pub fn pot_labels(&self) -> &[String] {
        &self.pot_labels
    }

    /// Process one stereo frame: write ADCL/ADCR and the three pot
    /// registers, run the patch, and return the DACL/DACR pair it produced.
    pub fn process(&mut self, in_l: f32, in_r: f32, pot0: f32, pot1: f32, pot2: f32) -> (f32, f32) {
        let (l, r) = self.cpu.run_frame(
            FixedPoint::from_float(in_l),
            FixedPoint::from_float(in_r),
            FixedPoint::from_float(pot0),
            FixedPoint::from_float(pot1),
            FixedPoint::from_float(pot2),
        );
        (l.to_float(), r.to_float())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_pass_through_patch_copies_input_to_output() {
        let mut vm = Vm::from_source("RDAX ADCL, 1.0\nWRAX DACL, 0\nRDAX ADCR, 1.0\nWRAX DACR, 0\n").unwrap();
        let (l, r) = vm.process(0.25, -0.5, 0.0, 0.0, 0.0);
        assert!((l - 0.25).abs() < 1e-3);
        assert!((r + 0.5).abs() < 1e-3);
    }

    #[test]
    fn pot_labels_survive_assembly() {
        let vm = Vm::from_source("RDAX POT0, 1.0 ; POT0: mix\nWRAX DACL, 0\n").unwrap();
        assert_eq!(vm.pot_labels(), &["POT0: mix".to_string()]);
    }

    #[test]
    fn reload_resets_the_accumulator_but_keeps_delay_memory() {
        let mut vm = Vm::from_source("RDAX ADCL, 1.0\nWRA 100, 0\nWRAX DACL, 0\n").unwrap();
        vm.process(0.5, 0.0, 0.0, 0.0, 0.0);
        vm.reload("RDA 101, 1.0\nWRAX DACL, 0\n").unwrap();
        let (l, _) = vm.process(0.0, 0.0, 0.0, 0.0, 0.0);
        assert!((l - 0.5).abs() < 1e-2);
    }
}
