// The FV-1 carries four low-frequency oscillators, two sine (coupled-form
// resonator) and two ramp (wrapping counter), each driven once per frame by
// its own rate/range register pair. They are not addressable as ordinary
// registers; WLDS/WLDR write their rate/range directly, and CHO/RDA read
// their current value back out.

use crate::fixed::SCALE;

fn fpmul(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) / SCALE as i64) as i32
}

/// Index into the four power-of-two ramp periods, stored pre-shifted by
/// `AMP_SHIFT` in the range register so `range()` can recover it with a
/// single shift (the "index form" WLDR writes, as opposed to a raw period).
const AMP_SHIFT: u32 = 21;
const AMP_4096: i32 = 0x3f_ffff;

pub struct SinLfo {
    c: i32,
    s: i32,
}

impl SinLfo {
    pub fn new() -> Self {
        let mut lfo = SinLfo { c: 0, s: 0 };
        lfo.jam();
        lfo
    }

    pub fn jam(&mut self) {
        self.s = 0;
        self.c = -(SCALE - 1);
    }

    pub fn tick(&mut self, rate_reg: i32) {
        let k = rate_reg >> 8;
        self.c += fpmul(k, self.s);
        self.s -= fpmul(k, self.c);
    }

    pub fn sin(&self, range_reg: i32) -> i32 {
        fpmul(self.s, range_reg)
    }

    pub fn cos(&self, range_reg: i32) -> i32 {
        fpmul(self.c, range_reg)
    }
}

impl Default for SinLfo {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RampLfo {
    pos: i32,
}

impl RampLfo {
    pub fn new() -> Self {
        RampLfo { pos: 0 }
    }

    pub fn jam(&mut self) {
        self.pos = 0;
    }

    /// Write-side helper for WLDR: pack a 2-bit amplitude index into the
    /// form the range register stores, so `range()` can read it straight
    /// back with a shift.
    pub fn pack_range(amplitude_index: i32) -> i32 {
        amplitude_index << AMP_SHIFT
    }

    pub fn range(range_reg: i32) -> i32 {
        AMP_4096 >> (range_reg >> AMP_SHIFT)
    }

    pub fn tick(&mut self, rate_reg: i32, range_reg: i32) {
        let step = rate_reg >> 12;
        let range = Self::range(range_reg);
        self.pos = (self.pos - step) & range;
    }

    /// Raw ramp position, used as the address offset for CHO RDA/RDAL.
    pub fn position(&self) -> i32 {
        self.pos
    }

    /// Triangular crossfade derived from the ramp position, used by CHO SOF
    /// and WRAP-style blends: rises for the first half of the period, falls
    /// for the second, scaled back up by the amplitude index it was read at.
    pub fn xfade(&self, range_reg: i32) -> i32 {
        let range = Self::range(range_reg);
        let half = range / 2;
        let index = range_reg >> AMP_SHIFT;
        let triangle = if self.pos < half {
            self.pos
        } else {
            range - self.pos
        };
        (triangle << 1) << index
    }
}

impl Default for RampLfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jam_resets_to_the_quadrature_starting_point() {
        let mut lfo = SinLfo::new();
        lfo.tick(1 << 16);
        lfo.jam();
        assert_eq!(lfo.s, 0);
        assert_eq!(lfo.c, -(SCALE - 1));
    }

    #[test]
    fn sin_lfo_stays_bounded_over_many_ticks() {
        let mut lfo = SinLfo::new();
        for _ in 0..10_000 {
            lfo.tick(1 << 15);
        }
        assert!(lfo.s.abs() <= SCALE);
        assert!(lfo.c.abs() <= SCALE);
    }

    #[test]
    fn ramp_wraps_at_its_programmed_range() {
        let mut ramp = RampLfo::new();
        let range_reg = RampLfo::pack_range(0); // index 0 -> full AMP_4096 period
        for _ in 0..=AMP_4096 {
            ramp.tick(1 << 12, range_reg);
        }
        assert!(ramp.position() >= 0);
        assert!(ramp.position() <= AMP_4096);
    }

    #[test]
    fn higher_amplitude_index_yields_a_shorter_period() {
        let reg0 = RampLfo::pack_range(0);
        let reg1 = RampLfo::pack_range(1);
        assert_eq!(RampLfo::range(reg1), RampLfo::range(reg0) / 2);
    }
}
