use std::cell::Cell;

/// Policy knobs of the analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Percentage of dereferences of possibly null pointers to allow.
    pub null_pointer_dereference_prob: u32,
    /// Percentage of dereferences of possibly dangling pointers to allow.
    pub dead_pointer_dereference_prob: u32,
    pub strict_volatile_rule: bool,
    /// Allow reading a union field other than the last written one when
    /// the bits read are known to be valid.
    pub union_read_type_sensitive: bool,
    pub max_blk_depth: usize,
    pub max_expr_depth: usize,
    pub max_fixed_point_iterations: usize,
    pub max_revisit_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            null_pointer_dereference_prob: 0,
            dead_pointer_dereference_prob: 0,
            strict_volatile_rule: false,
            union_read_type_sensitive: true,
            max_blk_depth: 5,
            max_expr_depth: 10,
            max_fixed_point_iterations: 32,
            max_revisit_depth: 16,
        }
    }
}

/// Deterministic percentage draws by error diffusion: a rate of `p` allows
/// exactly `p` out of every 100 consecutive draws.
#[derive(Debug, Default)]
pub struct Dither {
    acc: Cell<u32>,
}

impl Dither {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, percent: u32) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        let acc = self.acc.get() + percent;
        if acc >= 100 {
            self.acc.set(acc - 100);
            true
        } else {
            self.acc.set(acc);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dither() {
        let d = Dither::new();
        assert!(!(0..100).any(|_| d.allow(0)));
        assert!((0..100).all(|_| d.allow(100)));
        let d = Dither::new();
        assert_eq!((0..100).filter(|_| d.allow(30)).count(), 30);
        assert_eq!((0..200).filter(|_| d.allow(25)).count(), 50);
    }
}
