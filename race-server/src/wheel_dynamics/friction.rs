// ==============================================================================
// friction.rs — SLIP → GRIP CURVE (EXTREMUM / ASYMPTOTE)
// ------------------------------------------------------------------------------
// Four-point piecewise curve, evaluated on |slip|:
//
//   (0, 0) ──ramp──▶ (extremum_slip, extremum_value)
//          ──decline──▶ (asymptote_slip, asymptote_value)
//          ──flat──▶ ∞
//
// The output is a grip multiplier; the tire solver multiplies it with the
// wheel's normal load to get a force. `stiffness` scales the whole curve.
// Forward and sideways curves are configured independently.
//
// The plateau is clamped to the peak so a config cannot produce a curve that
// rises again after the extremum.
// ==============================================================================

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrictionCurve {
    pub extremum_slip: f32,
    pub extremum_value: f32,
    pub asymptote_slip: f32,
    pub asymptote_value: f32,
    pub stiffness: f32,
}

impl FrictionCurve {
    pub const fn new(
        extremum_slip: f32,
        extremum_value: f32,
        asymptote_slip: f32,
        asymptote_value: f32,
        stiffness: f32,
    ) -> Self {
        Self { extremum_slip, extremum_value, asymptote_slip, asymptote_value, stiffness }
    }

    /// Peak multiplier, after stiffness.
    pub fn peak(&self) -> f32 {
        self.extremum_value.max(0.0) * self.stiffness.max(0.0)
    }

    /// Grip multiplier for a slip value (sign is ignored).
    pub fn evaluate(&self, slip: f32) -> f32 {
        let s = slip.abs();
        if !s.is_finite() {
            return self.plateau() * self.stiffness.max(0.0);
        }

        let peak = self.extremum_value.max(0.0);
        let plateau = self.plateau();

        let raw = if s <= self.extremum_slip {
            if self.extremum_slip <= f32::EPSILON {
                peak
            } else {
                peak * (s / self.extremum_slip)
            }
        } else if s < self.asymptote_slip {
            let span = self.asymptote_slip - self.extremum_slip;
            let t = (s - self.extremum_slip) / span;
            peak + (plateau - peak) * t
        } else {
            plateau
        };

        raw * self.stiffness.max(0.0)
    }

    /// Signed force for a slip and a normal load (N).
    pub fn force(&self, slip: f32, normal_load: f32) -> f32 {
        slip.signum() * self.evaluate(slip) * normal_load.max(0.0)
    }

    fn plateau(&self) -> f32 {
        self.asymptote_value.max(0.0).min(self.extremum_value.max(0.0))
    }

    pub fn is_well_formed(&self) -> bool {
        let finite = [
            self.extremum_slip,
            self.extremum_value,
            self.asymptote_slip,
            self.asymptote_value,
            self.stiffness,
        ]
        .iter()
        .all(|v| v.is_finite());

        finite
            && self.extremum_slip > 0.0
            && self.asymptote_slip >= self.extremum_slip
            && self.extremum_value >= 0.0
            && self.asymptote_value >= 0.0
            && self.stiffness >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVES: [FrictionCurve; 4] = [
        FrictionCurve::new(0.4, 1.5, 0.8, 1.4, 0.72),
        FrictionCurve::new(0.25, 1.8, 0.5, 1.6, 1.0),
        FrictionCurve::new(0.1, 1.0, 0.1, 0.6, 2.0),
        // plateau above peak gets clamped
        FrictionCurve::new(0.3, 1.0, 0.6, 1.3, 1.0),
    ];

    #[test]
    fn curve_rises_then_falls_then_flattens() {
        for curve in CURVES {
            let steps = 1000;
            let mut prev = curve.evaluate(0.0);
            let mut prev_s = 0.0;
            for i in 1..=steps {
                let s = i as f32 / steps as f32;
                let v = curve.evaluate(s);
                if s <= curve.extremum_slip {
                    assert!(v + 1e-5 >= prev, "ramp dipped at {s}: {prev} -> {v}");
                } else if s <= curve.asymptote_slip || prev_s <= curve.asymptote_slip {
                    assert!(v <= prev + 1e-5, "decline rose at {s}: {prev} -> {v}");
                } else {
                    assert!((v - prev).abs() < 1e-6, "plateau moved at {s}");
                }
                prev = v;
                prev_s = s;
            }
        }
    }

    #[test]
    fn peak_sits_at_extremum() {
        let c = CURVES[0];
        assert!((c.evaluate(0.4) - 1.5 * 0.72).abs() < 1e-5);
        assert!((c.evaluate(0.8) - 1.4 * 0.72).abs() < 1e-5);
        assert!((c.evaluate(5.0) - 1.4 * 0.72).abs() < 1e-5);
        assert_eq!(c.evaluate(0.0), 0.0);
    }

    #[test]
    fn force_follows_slip_sign() {
        let c = CURVES[1];
        assert!(c.force(0.2, 1000.0) > 0.0);
        assert!(c.force(-0.2, 1000.0) < 0.0);
        assert_eq!(c.force(0.2, -5.0), 0.0);
    }

    #[test]
    fn malformed_curves_are_flagged() {
        assert!(CURVES[0].is_well_formed());
        assert!(!FrictionCurve::new(0.0, 1.0, 0.5, 0.8, 1.0).is_well_formed());
        assert!(!FrictionCurve::new(0.5, 1.0, 0.2, 0.8, 1.0).is_well_formed());
        assert!(!FrictionCurve::new(0.5, f32::NAN, 0.8, 0.8, 1.0).is_well_formed());
    }
}
