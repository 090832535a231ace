//! Fixed-point coordinate model.
//!
//! Every coordinate entering a merge is multiplied by [`SCALE`] and rounded,
//! so boolean operations work on integral values and cannot drift. Size
//! searches run on [`Units`] in the same space.

/// Scaled units per layout unit.
pub const SCALE: f64 = 1000.0;

/// A length in scaled units.
pub type Units = i64;

pub fn scale_up(v: f64) -> f64 {
    (v * SCALE).round()
}

pub fn scale_down(v: f64) -> f64 {
    v / SCALE
}

pub fn to_units(v: f64) -> Units {
    scale_up(v) as Units
}

pub fn from_units(u: Units) -> f64 {
    u as f64 / SCALE
}

/// Round a layout value onto the scaled grid.
pub fn snap(v: f64) -> f64 {
    scale_down(scale_up(v))
}

/// The alignment grid, in scaled units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    step: Units,
}

impl Grid {
    /// A grid step of zero (or below one scaled unit) disables alignment.
    pub fn new(step: f64) -> Self {
        Self {
            step: to_units(step).max(1),
        }
    }

    /// Smallest growth increment honoring the grid.
    pub fn step(&self) -> Units {
        self.step
    }

    pub fn step_len(&self) -> f64 {
        from_units(self.step)
    }

    pub fn is_enabled(&self) -> bool {
        self.step > 1
    }

    /// Round a scaled increment up to a whole number of grid steps.
    pub fn round_increment(&self, u: Units) -> Units {
        if u <= 0 {
            return 0;
        }
        ((u + self.step - 1) / self.step) * self.step
    }

    pub fn align_down(&self, v: f64) -> f64 {
        from_units(to_units(v).div_euclid(self.step) * self.step)
    }

    pub fn align_up(&self, v: f64) -> f64 {
        let u = to_units(v);
        let down = u.div_euclid(self.step) * self.step;
        if down == u {
            from_units(u)
        } else {
            from_units(down + self.step)
        }
    }

    pub fn align_nearest(&self, v: f64) -> f64 {
        let u = to_units(v);
        let down = u.div_euclid(self.step) * self.step;
        if u - down >= self.step - (u - down) && u != down {
            from_units(down + self.step)
        } else {
            from_units(down)
        }
    }

    pub fn is_aligned(&self, v: f64) -> bool {
        to_units(v).rem_euclid(self.step) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        assert_eq!(to_units(1.2345), 1235);
        assert!((from_units(1235) - 1.235).abs() < 1e-12);
        assert!((snap(0.0004) - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_grid_alignment() {
        let grid = Grid::new(0.5);
        assert_eq!(grid.step(), 500);
        assert!((grid.align_down(1.7) - 1.5).abs() < 1e-12);
        assert!((grid.align_up(1.2) - 1.5).abs() < 1e-12);
        assert!((grid.align_up(1.5) - 1.5).abs() < 1e-12);
        assert!((grid.align_nearest(1.3) - 1.5).abs() < 1e-12);
        assert!((grid.align_nearest(1.2) - 1.0).abs() < 1e-12);
        assert!((grid.align_down(-0.2) + 0.5).abs() < 1e-12);
        assert!(grid.is_aligned(2.0));
        assert!(!grid.is_aligned(2.1));
        assert_eq!(grid.round_increment(501), 1000);
    }

    #[test]
    fn test_disabled_grid() {
        let grid = Grid::new(0.0);
        assert!(!grid.is_enabled());
        assert_eq!(grid.step(), 1);
        assert!(grid.is_aligned(0.123));
    }
}
