// Turns encoded ROM words back into readable text, reusing `Instruction`'s
// `Display` impl for the per-opcode formatting. A line that fails to decode
// (the END sentinel, or any word after it) is rendered literally so a
// partial or truncated dump is still readable.

use crate::opcode;

pub fn disassemble(word: u32) -> String {
    match opcode::decode(word) {
        Some(instr) => instr.to_string(),
        None => "END".to_string(),
    }
}

/// Walk a raw big-endian-packed ROM image one word at a time, stopping at
/// the first END sentinel (or the end of the buffer, if it's short).
pub fn disassemble_rom(rom: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for chunk in rom.chunks_exact(4) {
        let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let line = disassemble(word);
        let is_end = line == "END";
        lines.push(line);
        if is_end {
            break;
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Instruction;

    #[test]
    fn disassembles_a_single_instruction() {
        let word = opcode::encode(&Instruction::Mulx { reg: 5 });
        assert_eq!(disassemble(word), "MULX 5");
    }

    #[test]
    fn rom_walk_stops_at_the_end_sentinel() {
        let mut rom = Vec::new();
        rom.extend_from_slice(&opcode::encode(&Instruction::And { mask: 0x00ff_ffff }).to_be_bytes());
        rom.extend_from_slice(&opcode::END_WORD.to_be_bytes());
        rom.extend_from_slice(&opcode::encode(&Instruction::Mulx { reg: 1 }).to_be_bytes());
        let lines = disassemble_rom(&rom);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "END");
    }
}
