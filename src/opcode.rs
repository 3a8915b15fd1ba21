// Decoder and encoder for the FV-1's packed 32-bit instruction words.
//
// The vintage encoding this is modelled on packs operand fields through a
// thicket of macros operating on binary literals wider than 32 bits (relying
// on implementation-defined truncation), which makes it impossible to
// recover bit-for-bit without a compiler to check against. This module
// instead defines its own internally-consistent 32-bit layout that keeps
// every opcode, operand and precision class (S1.14, S.10, S1.9, the 2-bit
// long-form selector for WLDS/WLDR and CHO) the assembler and loader agree
// on, so decode(encode(x)) round-trips and the wire format stays as compact
// as the original.
//
// Every non-long-form opcode carries the 5-bit opcode tag in bits[4:0] and
// up to 27 bits of operand payload in bits[31:5]. WLDS/WLDR and the three
// CHO variants additionally spend bits[31:30] on a sub-opcode selector,
// leaving 25 operand bits in bits[29:5].

use bitflags::bitflags;
use std::fmt;

pub const REGISTER_BITS: u32 = 6;
pub const DELAY_ADDR_BITS: u32 = 16;

bitflags! {
    pub struct SkpFlags: u8 {
        const NEG = 0b0000_0001;
        const GEZ = 0b0000_0010;
        const ZRO = 0b0000_0100;
        const ZRC = 0b0000_1000;
        const RUN = 0b0001_0000;
    }
}

bitflags! {
    pub struct ChoFlags: u8 {
        /// Selects cosine over sine for a sin LFO; independent of `COMPC`.
        const COS   = 0b0000_0001;
        const COMPC = 0b0000_0010;
        const COMPA = 0b0000_0100;
        const RPTR2 = 0b0000_1000;
        const NA    = 0b0001_0000;
        /// Defined by the original ISA but never consulted by `cho_value_scale`;
        /// kept so the assembler and decoder can round-trip programs that set it.
        const REG   = 0b0010_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lfo {
    Sin0,
    Sin1,
    Ramp0,
    Ramp1,
}

impl Lfo {
    pub fn is_sin(self) -> bool {
        matches!(self, Lfo::Sin0 | Lfo::Sin1)
    }

    pub fn is_ramp(self) -> bool {
        matches!(self, Lfo::Ramp0 | Lfo::Ramp1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoMode {
    Rda,
    Sof,
    Rdal,
}

/// A decoded (or yet-to-be-encoded) FV-1 instruction word. Coefficient
/// fields are stored already converted to Q1.23 `i32` values, matching the
/// internal representation `FixedPoint` works in; the encoder re-derives the
/// narrower wire precision from them.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Rda { addr: u16, scale: i32 },
    Rmpa { scale: i32 },
    Wra { addr: u16, scale: i32 },
    Wrap { addr: u16, scale: i32 },
    Rdax { reg: u8, scale: i32 },
    Rdfx { reg: u8, scale: i32 },
    Wrax { reg: u8, scale: i32 },
    Wrhx { reg: u8, scale: i32 },
    Wrlx { reg: u8, scale: i32 },
    Maxx { reg: u8, scale: i32 },
    Mulx { reg: u8 },
    Log { scale: i32, offset: i32 },
    Exp { scale: i32, offset: i32 },
    Sof { scale: i32, offset: i32 },
    And { mask: i32 },
    Or { mask: i32 },
    Xor { mask: i32 },
    Skp { flags: SkpFlags, count: u8 },
    Wlds { lfo: Lfo, rate: i32, range: i32 },
    Wldr { lfo: Lfo, rate: i32, amp_index: i32 },
    Jam { lfo: Lfo },
    Cho { mode: ChoMode, lfo: Lfo, flags: ChoFlags, addr: u16 },
}

const OP_RDA: u32 = 0x00;
const OP_RMPA: u32 = 0x01;
const OP_WRA: u32 = 0x02;
const OP_WRAP: u32 = 0x03;
const OP_RDAX: u32 = 0x04;
const OP_RDFX: u32 = 0x05;
const OP_WRAX: u32 = 0x06;
const OP_WRHX: u32 = 0x07;
const OP_WRLX: u32 = 0x08;
const OP_MAXX: u32 = 0x09;
const OP_MULX: u32 = 0x0a;
const OP_LOG: u32 = 0x0b;
const OP_EXP: u32 = 0x0c;
const OP_SOF: u32 = 0x0d;
const OP_AND: u32 = 0x0e;
const OP_OR: u32 = 0x0f;
const OP_XOR: u32 = 0x10;
const OP_SKP: u32 = 0x11;
const OP_WLDS_WLDR: u32 = 0x12;
const OP_JAM: u32 = 0x13;
const OP_CHO: u32 = 0x14;

/// The literal word the loader treats as "end of program" when scanning a
/// raw ROM image: a zero-operand SKP.
pub const END_WORD: u32 = OP_SKP;

fn bits(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1u32 << width) - 1)
}

fn pack(opcode: u32, shift: u32, width: u32, value: u32) -> u32 {
    opcode | ((value & ((1u32 << width) - 1)) << shift)
}

fn sign_extend(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

fn q23_from_field(word: u32, shift: u32, width: u32, frac_bits: u32) -> i32 {
    let raw = sign_extend(bits(word, shift, width), width);
    raw << (23 - frac_bits)
}

fn field_from_q23(value: i32, width: u32, frac_bits: u32) -> u32 {
    ((value >> (23 - frac_bits)) as u32) & ((1u32 << width) - 1)
}

fn lfo_bit(lfo: Lfo) -> u32 {
    match lfo {
        Lfo::Sin0 | Lfo::Ramp0 => 0,
        Lfo::Sin1 | Lfo::Ramp1 => 1,
    }
}

fn sin_lfo_from_bit(bit: u32) -> Lfo {
    if bit == 0 {
        Lfo::Sin0
    } else {
        Lfo::Sin1
    }
}

fn ramp_lfo_from_bit(bit: u32) -> Lfo {
    if bit == 0 {
        Lfo::Ramp0
    } else {
        Lfo::Ramp1
    }
}

pub fn decode(word: u32) -> Option<Instruction> {
    let opcode = word & 0x1f;
    match opcode {
        OP_RDA => Some(Instruction::Rda {
            addr: bits(word, 5, DELAY_ADDR_BITS) as u16,
            scale: q23_from_field(word, 5 + DELAY_ADDR_BITS, 11, 9),
        }),
        OP_RMPA => Some(Instruction::Rmpa {
            scale: q23_from_field(word, 5, 11, 9),
        }),
        OP_WRA => Some(Instruction::Wra {
            addr: bits(word, 5, DELAY_ADDR_BITS) as u16,
            scale: q23_from_field(word, 5 + DELAY_ADDR_BITS, 11, 9),
        }),
        OP_WRAP => Some(Instruction::Wrap {
            addr: bits(word, 5, DELAY_ADDR_BITS) as u16,
            scale: q23_from_field(word, 5 + DELAY_ADDR_BITS, 11, 9),
        }),
        OP_RDAX => Some(Instruction::Rdax {
            reg: bits(word, 5, REGISTER_BITS) as u8,
            scale: q23_from_field(word, 5 + REGISTER_BITS, 16, 14),
        }),
        OP_RDFX => Some(Instruction::Rdfx {
            reg: bits(word, 5, REGISTER_BITS) as u8,
            scale: q23_from_field(word, 5 + REGISTER_BITS, 16, 14),
        }),
        OP_WRAX => Some(Instruction::Wrax {
            reg: bits(word, 5, REGISTER_BITS) as u8,
            scale: q23_from_field(word, 5 + REGISTER_BITS, 16, 14),
        }),
        OP_WRHX => Some(Instruction::Wrhx {
            reg: bits(word, 5, REGISTER_BITS) as u8,
            scale: q23_from_field(word, 5 + REGISTER_BITS, 16, 14),
        }),
        OP_WRLX => Some(Instruction::Wrlx {
            reg: bits(word, 5, REGISTER_BITS) as u8,
            scale: q23_from_field(word, 5 + REGISTER_BITS, 16, 14),
        }),
        OP_MAXX => Some(Instruction::Maxx {
            reg: bits(word, 5, REGISTER_BITS) as u8,
            scale: q23_from_field(word, 5 + REGISTER_BITS, 16, 14),
        }),
        OP_MULX => Some(Instruction::Mulx {
            reg: bits(word, 5, REGISTER_BITS) as u8,
        }),
        OP_LOG => Some(Instruction::Log {
            scale: q23_from_field(word, 5, 16, 14),
            offset: q23_from_field(word, 5 + 16, 11, 10),
        }),
        OP_EXP => Some(Instruction::Exp {
            scale: q23_from_field(word, 5, 16, 14),
            offset: q23_from_field(word, 5 + 16, 11, 10),
        }),
        OP_SOF => Some(Instruction::Sof {
            scale: q23_from_field(word, 5, 16, 14),
            offset: q23_from_field(word, 5 + 16, 11, 10),
        }),
        OP_AND => Some(Instruction::And {
            mask: bits(word, 5, 24) as i32,
        }),
        OP_OR => Some(Instruction::Or {
            mask: bits(word, 5, 24) as i32,
        }),
        OP_XOR => Some(Instruction::Xor {
            mask: bits(word, 5, 24) as i32,
        }),
        OP_SKP => {
            let flags = SkpFlags::from_bits_truncate(bits(word, 5, 5) as u8);
            let count = bits(word, 10, 6) as u8;
            if flags.is_empty() && count == 0 {
                return None; // the END sentinel
            }
            Some(Instruction::Skp { flags, count })
        }
        OP_WLDS_WLDR => {
            let selector = bits(word, 30, 2);
            if selector == 1 {
                Some(Instruction::Wldr {
                    lfo: ramp_lfo_from_bit(bits(word, 5, 1)),
                    rate: sign_extend(bits(word, 6, 9), 9),
                    amp_index: bits(word, 15, 2) as i32,
                })
            } else {
                Some(Instruction::Wlds {
                    lfo: sin_lfo_from_bit(bits(word, 5, 1)),
                    rate: sign_extend(bits(word, 6, 9), 9),
                    range: bits(word, 15, 15) as i32,
                })
            }
        }
        OP_JAM => Some(Instruction::Jam {
            lfo: ramp_lfo_from_bit(bits(word, 5, 1)),
        }),
        OP_CHO => {
            let selector = bits(word, 30, 2);
            let mode = match selector {
                0 => ChoMode::Rda,
                2 => ChoMode::Sof,
                3 => ChoMode::Rdal,
                _ => return None,
            };
            let lfo_bits = bits(word, 5, 2);
            let lfo = match lfo_bits {
                0 => Lfo::Sin0,
                1 => Lfo::Sin1,
                2 => Lfo::Ramp0,
                _ => Lfo::Ramp1,
            };
            Some(Instruction::Cho {
                mode,
                lfo,
                flags: ChoFlags::from_bits_truncate(bits(word, 7, 6) as u8),
                addr: bits(word, 13, DELAY_ADDR_BITS) as u16,
            })
        }
        _ => None,
    }
}

pub fn encode(instr: &Instruction) -> u32 {
    match *instr {
        Instruction::Rda { addr, scale } => {
            let w = OP_RDA;
            let w = pack(w, 5, DELAY_ADDR_BITS, addr as u32);
            pack(w, 5 + DELAY_ADDR_BITS, 11, field_from_q23(scale, 11, 9))
        }
        Instruction::Rmpa { scale } => pack(OP_RMPA, 5, 11, field_from_q23(scale, 11, 9)),
        Instruction::Wra { addr, scale } => {
            let w = pack(OP_WRA, 5, DELAY_ADDR_BITS, addr as u32);
            pack(w, 5 + DELAY_ADDR_BITS, 11, field_from_q23(scale, 11, 9))
        }
        Instruction::Wrap { addr, scale } => {
            let w = pack(OP_WRAP, 5, DELAY_ADDR_BITS, addr as u32);
            pack(w, 5 + DELAY_ADDR_BITS, 11, field_from_q23(scale, 11, 9))
        }
        Instruction::Rdax { reg, scale } => {
            let w = pack(OP_RDAX, 5, REGISTER_BITS, reg as u32);
            pack(w, 5 + REGISTER_BITS, 16, field_from_q23(scale, 16, 14))
        }
        Instruction::Rdfx { reg, scale } => {
            let w = pack(OP_RDFX, 5, REGISTER_BITS, reg as u32);
            pack(w, 5 + REGISTER_BITS, 16, field_from_q23(scale, 16, 14))
        }
        Instruction::Wrax { reg, scale } => {
            let w = pack(OP_WRAX, 5, REGISTER_BITS, reg as u32);
            pack(w, 5 + REGISTER_BITS, 16, field_from_q23(scale, 16, 14))
        }
        Instruction::Wrhx { reg, scale } => {
            let w = pack(OP_WRHX, 5, REGISTER_BITS, reg as u32);
            pack(w, 5 + REGISTER_BITS, 16, field_from_q23(scale, 16, 14))
        }
        Instruction::Wrlx { reg, scale } => {
            let w = pack(OP_WRLX, 5, REGISTER_BITS, reg as u32);
            pack(w, 5 + REGISTER_BITS, 16, field_from_q23(scale, 16, 14))
        }
        Instruction::Maxx { reg, scale } => {
            let w = pack(OP_MAXX, 5, REGISTER_BITS, reg as u32);
            pack(w, 5 + REGISTER_BITS, 16, field_from_q23(scale, 16, 14))
        }
        Instruction::Mulx { reg } => pack(OP_MULX, 5, REGISTER_BITS, reg as u32),
        Instruction::Log { scale, offset } => {
            let w = pack(OP_LOG, 5, 16, field_from_q23(scale, 16, 14));
            pack(w, 5 + 16, 11, field_from_q23(offset, 11, 10))
        }
        Instruction::Exp { scale, offset } => {
            let w = pack(OP_EXP, 5, 16, field_from_q23(scale, 16, 14));
            pack(w, 5 + 16, 11, field_from_q23(offset, 11, 10))
        }
        Instruction::Sof { scale, offset } => {
            let w = pack(OP_SOF, 5, 16, field_from_q23(scale, 16, 14));
            pack(w, 5 + 16, 11, field_from_q23(offset, 11, 10))
        }
        Instruction::And { mask } => pack(OP_AND, 5, 24, mask as u32),
        Instruction::Or { mask } => pack(OP_OR, 5, 24, mask as u32),
        Instruction::Xor { mask } => pack(OP_XOR, 5, 24, mask as u32),
        Instruction::Skp { flags, count } => {
            let w = pack(OP_SKP, 5, 5, flags.bits() as u32);
            pack(w, 10, 6, count as u32)
        }
        Instruction::Wlds { lfo, rate, range } => {
            let w = pack(OP_WLDS_WLDR, 5, 1, lfo_bit(lfo));
            let w = pack(w, 6, 9, rate as u32);
            pack(w, 15, 15, range as u32)
        }
        Instruction::Wldr { lfo, rate, amp_index } => {
            let w = OP_WLDS_WLDR | (1 << 30);
            let w = pack(w, 5, 1, lfo_bit(lfo));
            let w = pack(w, 6, 9, rate as u32);
            pack(w, 15, 2, amp_index as u32)
        }
        Instruction::Jam { lfo } => pack(OP_JAM, 5, 1, lfo_bit(lfo)),
        Instruction::Cho { mode, lfo, flags, addr } => {
            let selector = match mode {
                ChoMode::Rda => 0u32,
                ChoMode::Sof => 2u32,
                ChoMode::Rdal => 3u32,
            };
            let lfo_bits = match lfo {
                Lfo::Sin0 => 0u32,
                Lfo::Sin1 => 1u32,
                Lfo::Ramp0 => 2u32,
                Lfo::Ramp1 => 3u32,
            };
            let w = OP_CHO | (selector << 30);
            let w = pack(w, 5, 2, lfo_bits);
            let w = pack(w, 7, 6, flags.bits() as u32);
            pack(w, 13, DELAY_ADDR_BITS, addr as u32)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Rda { addr, scale } => {
                write!(f, "RDA {}, {:.6}", addr, q23_to_float(*scale))
            }
            Instruction::Rmpa { scale } => write!(f, "RMPA {:.6}", q23_to_float(*scale)),
            Instruction::Wra { addr, scale } => {
                write!(f, "WRA {}, {:.6}", addr, q23_to_float(*scale))
            }
            Instruction::Wrap { addr, scale } => {
                write!(f, "WRAP {}, {:.6}", addr, q23_to_float(*scale))
            }
            Instruction::Rdax { reg, scale } => {
                write!(f, "RDAX {}, {:.6}", reg, q23_to_float(*scale))
            }
            Instruction::Rdfx { reg, scale } => {
                write!(f, "RDFX {}, {:.6}", reg, q23_to_float(*scale))
            }
            Instruction::Wrax { reg, scale } => {
                write!(f, "WRAX {}, {:.6}", reg, q23_to_float(*scale))
            }
            Instruction::Wrhx { reg, scale } => {
                write!(f, "WRHX {}, {:.6}", reg, q23_to_float(*scale))
            }
            Instruction::Wrlx { reg, scale } => {
                write!(f, "WRLX {}, {:.6}", reg, q23_to_float(*scale))
            }
            Instruction::Maxx { reg, scale } => {
                write!(f, "MAXX {}, {:.6}", reg, q23_to_float(*scale))
            }
            Instruction::Mulx { reg } => write!(f, "MULX {}", reg),
            Instruction::Log { scale, offset } => {
                write!(f, "LOG {:.6}, {:.6}", q23_to_float(*scale), q23_to_float(*offset))
            }
            Instruction::Exp { scale, offset } => {
                write!(f, "EXP {:.6}, {:.6}", q23_to_float(*scale), q23_to_float(*offset))
            }
            Instruction::Sof { scale, offset } => {
                write!(f, "SOF {:.6}, {:.6}", q23_to_float(*scale), q23_to_float(*offset))
            }
            Instruction::And { mask } => write!(f, "AND {:#x}", mask),
            Instruction::Or { mask } => write!(f, "OR {:#x}", mask),
            Instruction::Xor { mask } => write!(f, "XOR {:#x}", mask),
            Instruction::Skp { flags, count } => write!(f, "SKP {:?}, {}", flags, count),
            Instruction::Wlds { lfo, rate, range } => write!(f, "WLDS {:?}, {}, {}", lfo, rate, range),
            Instruction::Wldr { lfo, rate, amp_index } => {
                write!(f, "WLDR {:?}, {}, {}", lfo, rate, amp_index)
            }
            Instruction::Jam { lfo } => write!(f, "JAM {:?}", lfo),
            Instruction::Cho { mode, lfo, flags, addr } => {
                write!(f, "CHO {:?} {:?}, {:?}, {}", mode, lfo, flags, addr)
            }
        }
    }
}

fn q23_to_float(value: i32) -> f32 {
    value as f32 / (1i32 << 23) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_roundtrips(instr: Instruction) {
        let word = encode(&instr);
        assert_eq!(decode(word), Some(instr));
    }

    #[test]
    fn rdax_round_trips() {
        assert_roundtrips(Instruction::Rdax { reg: 0x20, scale: 1 << 22 });
    }

    #[test]
    fn sof_round_trips_with_negative_fields() {
        assert_roundtrips(Instruction::Sof { scale: -(1 << 20), offset: -(1 << 8) });
    }

    #[test]
    fn rda_round_trips_full_delay_range() {
        assert_roundtrips(Instruction::Rda { addr: 0x7fff, scale: 1 << 10 });
    }

    #[test]
    fn skp_round_trips() {
        assert_roundtrips(Instruction::Skp {
            flags: SkpFlags::ZRC | SkpFlags::RUN,
            count: 5,
        });
    }

    #[test]
    fn wlds_and_wldr_select_distinct_long_forms() {
        assert_roundtrips(Instruction::Wlds { lfo: Lfo::Sin1, rate: -3, range: 12345 });
        assert_roundtrips(Instruction::Wldr { lfo: Lfo::Ramp0, rate: 7, amp_index: 2 });
    }

    #[test]
    fn cho_variants_round_trip_independently() {
        assert_roundtrips(Instruction::Cho {
            mode: ChoMode::Rda,
            lfo: Lfo::Ramp1,
            flags: ChoFlags::COMPA | ChoFlags::NA,
            addr: 0x1234,
        });
        assert_roundtrips(Instruction::Cho {
            mode: ChoMode::Sof,
            lfo: Lfo::Sin0,
            flags: ChoFlags::empty(),
            addr: 0,
        });
    }

    #[test]
    fn the_zero_skp_word_decodes_as_the_end_sentinel() {
        assert_eq!(decode(END_WORD), None);
    }
}
