use crate::fixed::FixedPoint;
use std::cell::RefCell;
use std::rc::Rc;

pub type RegPtr = Rc<RefCell<FixedPoint>>;

pub const REGISTER_COUNT: usize = 64;

pub mod addr {
    pub const SIN0_RATE: u8 = 0x00;
    pub const SIN0_RANGE: u8 = 0x01;
    pub const SIN1_RATE: u8 = 0x02;
    pub const SIN1_RANGE: u8 = 0x03;
    pub const RMP0_RATE: u8 = 0x04;
    pub const RMP0_RANGE: u8 = 0x05;
    pub const RMP1_RATE: u8 = 0x06;
    pub const RMP1_RANGE: u8 = 0x07;
    pub const POT0: u8 = 0x10;
    pub const POT1: u8 = 0x11;
    pub const POT2: u8 = 0x12;
    pub const ADCL: u8 = 0x14;
    pub const ADCR: u8 = 0x15;
    pub const DACL: u8 = 0x16;
    pub const DACR: u8 = 0x17;
    pub const ADDR_PTR: u8 = 0x18;
    pub const REG0: u8 = 0x20;
    pub const REG31: u8 = 0x3f;
}

/// The 64-register file addressed by RDAX/WRAX/RDFX/WRLX/WRHX and friends.
/// Every register is handed out as a shared, mutably-borrowable cell so the
/// loader can bind a decoded instruction directly to the cell it reads or
/// writes, rather than re-resolving an address on every frame.
pub struct RegisterFile {
    cells: [RegPtr; REGISTER_COUNT],
}

impl RegisterFile {
    pub fn new() -> Self {
        let cells: Vec<RegPtr> = (0..REGISTER_COUNT)
            .map(|_| Rc::new(RefCell::new(FixedPoint::zero())))
            .collect();
        RegisterFile {
            cells: cells.try_into().unwrap_or_else(|_| unreachable!()),
        }
    }

    pub fn get(&self, address: u8) -> RegPtr {
        Rc::clone(&self.cells[address as usize & (REGISTER_COUNT - 1)])
    }

    pub fn read(&self, address: u8) -> FixedPoint {
        *self.get(address).borrow()
    }

    pub fn write(&self, address: u8, value: FixedPoint) {
        *self.get(address).borrow_mut() = value;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_write_round_trips() {
        let regs = RegisterFile::new();
        regs.write(addr::REG0, FixedPoint::from_float(0.25));
        assert_eq!(regs.read(addr::REG0).to_float(), 0.25);
    }

    #[test]
    fn distinct_addresses_are_independent() {
        let regs = RegisterFile::new();
        regs.write(addr::REG0, FixedPoint::from_float(1.0));
        assert_eq!(regs.read(addr::REG0 + 1).raw(), 0);
    }

    #[test]
    fn shared_handles_observe_each_others_writes() {
        let regs = RegisterFile::new();
        let handle = regs.get(addr::POT0);
        *handle.borrow_mut() = FixedPoint::from_float(0.5);
        assert_eq!(regs.read(addr::POT0).to_float(), 0.5);
    }
}
