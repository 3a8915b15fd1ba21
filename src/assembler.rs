// Two-pass assembler for FV-1 SPN source. Pass one walks the source once to
// build the symbol table (labels, EQUs, MEM allocations) and count real
// instructions; pass two walks it again emitting encoded instructions with
// every symbol resolved. Labels, EQUs and comments do not count as
// instructions — only mnemonics advance the instruction counter SKP targets
// are measured against.

use crate::delay;
use crate::error::AsmError;
use crate::opcode::{ChoFlags, ChoMode, Instruction, Lfo, SkpFlags};
use crate::registers::addr;
use std::collections::HashMap;

pub struct AssembledProgram {
    pub instructions: Vec<Instruction>,
    /// One entry per `; POT0: ...`-style trailing comment found on a line
    /// touching POT0/POT1/POT2, in pot order, for front-ends that want to
    /// label a program's controls.
    pub pot_labels: Vec<String>,
}

struct SymbolTable {
    symbols: HashMap<String, i64>,
    mem_ptr: i64,
}

impl SymbolTable {
    fn predefined() -> Self {
        let mut symbols = HashMap::new();
        let mut define = |name: &str, value: i64| {
            symbols.insert(name.to_string(), value);
        };
        define("SIN0_RATE", addr::SIN0_RATE as i64);
        define("SIN0_RANGE", addr::SIN0_RANGE as i64);
        define("SIN1_RATE", addr::SIN1_RATE as i64);
        define("SIN1_RANGE", addr::SIN1_RANGE as i64);
        define("RMP0_RATE", addr::RMP0_RATE as i64);
        define("RMP0_RANGE", addr::RMP0_RANGE as i64);
        define("RMP1_RATE", addr::RMP1_RATE as i64);
        define("RMP1_RANGE", addr::RMP1_RANGE as i64);
        define("POT0", addr::POT0 as i64);
        define("POT1", addr::POT1 as i64);
        define("POT2", addr::POT2 as i64);
        define("ADCL", addr::ADCL as i64);
        define("ADCR", addr::ADCR as i64);
        define("DACL", addr::DACL as i64);
        define("DACR", addr::DACR as i64);
        define("ADDR_PTR", addr::ADDR_PTR as i64);
        for i in 0..=31i64 {
            define(&format!("REG{}", i), addr::REG0 as i64 + i);
        }
        define("SIN0", 0);
        define("SIN1", 1);
        define("RMP0", 2);
        define("RMP1", 3);
        // COS0/COS1 select the same LFO slots as SIN0/SIN1 in the `lfo`
        // operand; reading cosine instead of sine additionally requires the
        // COS flag in the CHO flags operand.
        define("COS0", 0);
        define("COS1", 1);
        define("NEG", SkpFlags::NEG.bits() as i64);
        define("GEZ", SkpFlags::GEZ.bits() as i64);
        define("ZRO", SkpFlags::ZRO.bits() as i64);
        define("ZRC", SkpFlags::ZRC.bits() as i64);
        define("RUN", SkpFlags::RUN.bits() as i64);
        define("COS", ChoFlags::COS.bits() as i64);
        define("COMPC", ChoFlags::COMPC.bits() as i64);
        define("COMPA", ChoFlags::COMPA.bits() as i64);
        define("RPTR2", ChoFlags::RPTR2.bits() as i64);
        define("NA", ChoFlags::NA.bits() as i64);
        define("REG", ChoFlags::REG.bits() as i64);
        define("RDA", 0);
        define("SOF", 2);
        define("RDAL", 3);
        SymbolTable { symbols, mem_ptr: 0 }
    }

    fn define(&mut self, line: usize, name: &str, value: i64) -> Result<(), AsmError> {
        if self.symbols.contains_key(name) {
            return Err(AsmError::DuplicateLabel { line, name: name.to_string() });
        }
        self.symbols.insert(name.to_string(), value);
        self.symbols.insert(format!("-{}", name), -value);
        Ok(())
    }

    fn resolve(&self, line: usize, token: &str) -> Result<i64, AsmError> {
        if let Ok(n) = parse_int_literal(token) {
            return Ok(n);
        }
        self.symbols
            .get(token)
            .copied()
            .ok_or_else(|| AsmError::UnknownSymbol { line, name: token.to_string() })
    }
}

fn parse_int_literal(token: &str) -> Result<i64, ()> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map_err(|_| ());
    }
    token.parse::<i64>().map_err(|_| ())
}

/// Parses a SKP/RDAX/etc operand as either a bare symbol/integer, or (for
/// coefficient fields) a float literal; returns the float value scaled to
/// Q1.23, or falls back to treating it as an integer symbol.
fn parse_float(line: usize, token: &str) -> Result<f32, AsmError> {
    token
        .parse::<f32>()
        .map_err(|_| AsmError::BadOperand { line, text: token.to_string() })
}

fn q23(f: f32) -> i32 {
    crate::fixed::FixedPoint::from_float(f).raw()
}

struct Line<'a> {
    number: usize,
    label: Option<&'a str>,
    mnemonic: Option<&'a str>,
    args: Vec<&'a str>,
    pot_comment: Option<String>,
}

fn split_lines(source: &str) -> Vec<Line<'_>> {
    source
        .lines()
        .enumerate()
        .map(|(i, raw)| parse_line(i + 1, raw))
        .collect()
}

fn parse_line(number: usize, raw: &str) -> Line<'_> {
    let (code, comment) = match raw.split_once(';') {
        Some((code, comment)) => (code, Some(comment.trim().to_string())),
        None => (raw, None),
    };
    let pot_comment = comment.filter(|c| c.to_uppercase().starts_with("POT"));
    let code = code.trim();

    let (label, rest) = if let Some(stripped) = code.strip_suffix(':') {
        (Some(stripped.trim()), "")
    } else if let Some(idx) = code.find(':') {
        (Some(code[..idx].trim()), code[idx + 1..].trim())
    } else {
        (None, code)
    };

    let mut parts = rest.split_whitespace();
    let mnemonic = parts.next();
    let args: Vec<&str> = rest
        .splitn(2, char::is_whitespace)
        .nth(1)
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    Line {
        number,
        label: label.filter(|s| !s.is_empty()),
        mnemonic,
        args,
        pot_comment,
    }
}

/// Assemble a complete SPN source file into an instruction list, ready for
/// `opcode::encode` or direct execution via `loader::load_instructions`.
pub fn assemble(source: &str) -> Result<AssembledProgram, AsmError> {
    let lines = split_lines(source);
    let mut table = SymbolTable::predefined();

    // Pass 1: labels and EQU/MEM directives, counting real instructions.
    let mut instruction_count = 0usize;
    for line in &lines {
        if let Some(label) = line.label {
            table.define(line.number, label, instruction_count as i64)?;
        }
        match line.mnemonic.map(str::to_uppercase).as_deref() {
            None => {}
            Some("EQU") => {
                let name = line.args.get(0).ok_or_else(|| AsmError::BadOperand {
                    line: line.number,
                    text: "EQU".to_string(),
                })?;
                let value = table.resolve(line.number, line.args.get(1).copied().unwrap_or("0"))?;
                table.define(line.number, name, value)?;
            }
            Some("MEM") => {
                let name = line.args.get(0).ok_or_else(|| AsmError::BadOperand {
                    line: line.number,
                    text: "MEM".to_string(),
                })?;
                let size = table.resolve(line.number, line.args.get(1).copied().unwrap_or("0"))?;
                let base = table.mem_ptr;
                table.define(line.number, name, base)?;
                table.define(line.number, &format!("{}#", name), base + size)?;
                table.define(line.number, &format!("{}^", name), base + size / 2)?;
                table.mem_ptr += size + 1;
                if table.mem_ptr as usize > delay::SIZE {
                    return Err(AsmError::OperandRange {
                        line: line.number,
                        what: "MEM allocation exceeds delay memory",
                        value: table.mem_ptr,
                    });
                }
            }
            Some(_) => instruction_count += 1,
        }
    }
    if instruction_count > crate::loader::MAX_INSTRUCTIONS {
        return Err(AsmError::ProgramTooLong { count: instruction_count });
    }

    // Pass 2: emit.
    let mut instructions = Vec::with_capacity(instruction_count);
    let mut pot_labels = Vec::new();
    let mut index = 0i64;
    for line in &lines {
        let Some(mnemonic) = line.mnemonic else { continue };
        let mnemonic = mnemonic.to_uppercase();
        if mnemonic == "EQU" || mnemonic == "MEM" {
            continue;
        }
        if let Some(comment) = &line.pot_comment {
            pot_labels.push(comment.clone());
        }
        let instr = emit(&table, line.number, index, &mnemonic, &line.args)?;
        instructions.push(instr);
        index += 1;
    }

    Ok(AssembledProgram { instructions, pot_labels })
}

fn reg_operand(table: &SymbolTable, line: usize, token: &str) -> Result<u8, AsmError> {
    let value = table.resolve(line, token)?;
    if !(0..64).contains(&value) {
        return Err(AsmError::OperandRange { line, what: "register address", value });
    }
    Ok(value as u8)
}

fn addr_operand(table: &SymbolTable, line: usize, token: &str) -> Result<u16, AsmError> {
    let value = table.resolve(line, token)?;
    if !(0..delay::SIZE as i64).contains(&value) {
        return Err(AsmError::OperandRange { line, what: "delay address", value });
    }
    Ok(value as u16)
}

fn coeff_operand(line: usize, token: &str) -> Result<i32, AsmError> {
    if let Ok(i) = parse_int_literal(token) {
        return Ok((i as i32) << 23 >> 23);
    }
    Ok(q23(parse_float(line, token)?))
}

fn mask_operand(table: &SymbolTable, line: usize, token: &str) -> Result<i32, AsmError> {
    let value = table.resolve(line, token)?;
    if !(0..=0x00ff_ffff).contains(&value) {
        return Err(AsmError::OperandRange { line, what: "bit mask", value });
    }
    Ok(value as i32)
}

fn lfo_operand(table: &SymbolTable, line: usize, token: &str, sin: bool) -> Result<Lfo, AsmError> {
    let value = table.resolve(line, token)?;
    Ok(match (sin, value) {
        (true, 0) => Lfo::Sin0,
        (true, 1) => Lfo::Sin1,
        (false, 2) => Lfo::Ramp0,
        (false, 3) => Lfo::Ramp1,
        _ => return Err(AsmError::BadOperand { line, text: token.to_string() }),
    })
}

fn emit(table: &SymbolTable, line: usize, index: i64, mnemonic: &str, args: &[&str]) -> Result<Instruction, AsmError> {
    let arg = |i: usize| -> Result<&str, AsmError> {
        args.get(i).copied().ok_or_else(|| AsmError::BadOperand {
            line,
            text: format!("{} missing operand {}", mnemonic, i + 1),
        })
    };
    Ok(match mnemonic {
        "RDA" => Instruction::Rda { addr: addr_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "RMPA" => Instruction::Rmpa { scale: coeff_operand(line, arg(0)?)? },
        "WRA" => Instruction::Wra { addr: addr_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "WRAP" => Instruction::Wrap { addr: addr_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "RDAX" => Instruction::Rdax { reg: reg_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "RDFX" => Instruction::Rdfx { reg: reg_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "WRAX" => Instruction::Wrax { reg: reg_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "WRHX" => Instruction::Wrhx { reg: reg_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "WRLX" => Instruction::Wrlx { reg: reg_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "MAXX" => Instruction::Maxx { reg: reg_operand(table, line, arg(0)?)?, scale: coeff_operand(line, arg(1)?)? },
        "MULX" => Instruction::Mulx { reg: reg_operand(table, line, arg(0)?)? },
        "LOG" => Instruction::Log { scale: coeff_operand(line, arg(0)?)?, offset: coeff_operand(line, arg(1)?)? },
        "EXP" => Instruction::Exp { scale: coeff_operand(line, arg(0)?)?, offset: coeff_operand(line, arg(1)?)? },
        "SOF" => Instruction::Sof { scale: coeff_operand(line, arg(0)?)?, offset: coeff_operand(line, arg(1)?)? },
        "AND" => Instruction::And { mask: mask_operand(table, line, arg(0)?)? },
        "OR" => Instruction::Or { mask: mask_operand(table, line, arg(0)?)? },
        "XOR" => Instruction::Xor { mask: mask_operand(table, line, arg(0)?)? },
        "CLR" => Instruction::And { mask: 0 },
        "NOT" => Instruction::Xor { mask: 0x00ff_ffff },
        "ABSA" => Instruction::Maxx { reg: 0, scale: 0 },
        "LDAX" => Instruction::Rdfx { reg: reg_operand(table, line, arg(0)?)?, scale: 0 },
        "SKP" => {
            let flags_token = arg(0)?;
            let mut flags = SkpFlags::empty();
            for part in flags_token.split('|').map(str::trim) {
                let bits = table.resolve(line, part)? as u8;
                flags |= SkpFlags::from_bits_truncate(bits);
            }
            let target = table.resolve(line, arg(1)?)?;
            let count = target - (index + 1);
            if !(0..64).contains(&count) {
                return Err(AsmError::OperandRange { line, what: "SKP distance", value: count });
            }
            Instruction::Skp { flags, count: count as u8 }
        }
        "WLDS" => Instruction::Wlds {
            lfo: lfo_operand(table, line, arg(0)?, true)?,
            rate: table.resolve(line, arg(1)?)? as i32,
            range: table.resolve(line, arg(2)?)? as i32,
        },
        "WLDR" => Instruction::Wldr {
            lfo: lfo_operand(table, line, arg(0)?, false)?,
            rate: table.resolve(line, arg(1)?)? as i32,
            amp_index: table.resolve(line, arg(2)?)? as i32,
        },
        "JAM" => Instruction::Jam { lfo: lfo_operand(table, line, arg(0)?, false)? },
        "CHO" => {
            let mode = match arg(0)?.to_uppercase().as_str() {
                "RDA" => ChoMode::Rda,
                "SOF" => ChoMode::Sof,
                "RDAL" => ChoMode::Rdal,
                other => return Err(AsmError::BadOperand { line, text: other.to_string() }),
            };
            let lfo_value = table.resolve(line, arg(1)?)?;
            let lfo = match lfo_value {
                0 => Lfo::Sin0,
                1 => Lfo::Sin1,
                2 => Lfo::Ramp0,
                _ => Lfo::Ramp1,
            };
            let mut flags = ChoFlags::empty();
            for part in arg(2)?.split('|').map(str::trim) {
                flags |= ChoFlags::from_bits_truncate(table.resolve(line, part)? as u8);
            }
            let addr = args.get(3).map(|t| addr_operand(table, line, t)).transpose()?.unwrap_or(0);
            Instruction::Cho { mode, lfo, flags, addr }
        }
        other => return Err(AsmError::UnknownMnemonic { line, text: other.to_string() }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_pass_through_program() {
        let source = "RDAX ADCL, 1.0\nWRAX DACL, 0\nRDAX ADCR, 1.0\nWRAX DACR, 0\n";
        let program = assemble(source).unwrap();
        assert_eq!(program.instructions.len(), 4);
    }

    #[test]
    fn labels_resolve_forward_skip_targets() {
        let source = "SKP ZRO, skip\nSOF 0, 0\nskip: RDAX ADCL, 1.0\n";
        let program = assemble(source).unwrap();
        match &program.instructions[0] {
            Instruction::Skp { count, .. } => assert_eq!(*count, 1),
            _ => panic!("expected SKP"),
        }
    }

    #[test]
    fn mem_allocates_delay_regions_with_end_and_midpoint_symbols() {
        let source = "MEM delay 1000\nWRA delay, 0\nRDA delay#, 0\nRDA delay^, 0\n";
        let program = assemble(source).unwrap();
        assert_eq!(program.instructions.len(), 3);
    }

    #[test]
    fn clr_lowers_to_and_zero() {
        let program = assemble("CLR\n").unwrap();
        assert!(matches!(program.instructions[0], Instruction::And { mask: 0 }));
    }

    #[test]
    fn pot_comments_are_collected_in_order() {
        let source = "RDAX POT0, 1.0 ; POT0: mix\nRDAX POT1, 1.0 ; POT1: rate\n";
        let program = assemble(source).unwrap();
        assert_eq!(program.pot_labels, vec!["POT0: mix", "POT1: rate"]);
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        assert!(assemble("BOGUS 1, 2\n").is_err());
    }

    #[test]
    fn out_of_range_register_is_an_error() {
        assert!(assemble("RDAX 99, 1.0\n").is_err());
    }
}
