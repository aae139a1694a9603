//! Numeric comparator.
//!
//! Agreement is measured as the normalized mean squared error of the
//! candidate against the reference, `Σ(ref - cand)² / Σ ref²`. Special values
//! are screened element by element first: NaN anywhere fails at once, and a
//! saturated value (infinite or at the `f32` extreme) must be matched by a
//! saturated value of the same sign, in which case the pair is left out of the
//! metric.

use std::fmt;

/// Why a node's outputs disagree.
#[derive(Clone, Debug, PartialEq)]
pub enum Mismatch {
    /// The two outputs have different element counts.
    Length { reference: usize, candidate: usize },
    /// NaN in either output.
    Nan { index: usize },
    /// Only one side is saturated.
    Saturation {
        index: usize,
        reference: f64,
        candidate: f64,
    },
    /// Both saturated, with opposite signs.
    SaturationSign {
        index: usize,
        reference: f64,
        candidate: f64,
    },
    /// The metric exceeds the tolerance.
    Nmse { value: f64, max: f64 },
}

impl Mismatch {
    /// Special-value mismatches end the comparison of a case immediately.
    pub fn is_special(&self) -> bool {
        !matches!(self, Mismatch::Nmse { .. })
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Length {
                reference,
                candidate,
            } => write!(f, "length mismatch: {reference} vs {candidate}"),
            Mismatch::Nan { index } => write!(f, "NaN at index {index}"),
            Mismatch::Saturation {
                reference,
                candidate,
                ..
            } => write!(f, "inf mismatch: {candidate:.6} {reference:.6}"),
            Mismatch::SaturationSign {
                reference,
                candidate,
                ..
            } => write!(f, "inf sign mismatch: {candidate:.6} {reference:.6}"),
            Mismatch::Nmse { value, .. } => write!(f, "NMSE = {value:.6}"),
        }
    }
}

/// Outcome of comparing one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    /// Metric over the non-excluded elements; `+inf` after a special-value
    /// mismatch, since no meaningful metric exists then.
    pub nmse: f64,
    pub mismatch: Option<Mismatch>,
}

impl Comparison {
    pub fn ok(&self) -> bool {
        self.mismatch.is_none()
    }

    fn special(mismatch: Mismatch) -> Self {
        Self {
            nmse: f64::INFINITY,
            mismatch: Some(mismatch),
        }
    }
}

/// Infinite, or at the largest finite `f32` magnitude.
pub fn is_saturated(v: f64) -> bool {
    v.is_infinite() || v.abs() >= f32::MAX as f64
}

/// Normalized mean squared error of `candidate` against `reference`.
///
/// An all-zero reference has no energy to normalize by: the metric is `0.0`
/// when the candidate is all zero too and `+inf` otherwise.
pub fn nmse(reference: &[f64], candidate: &[f64]) -> f64 {
    let mut err = 0.0f64;
    let mut energy = 0.0f64;
    for (&r, &c) in reference.iter().zip(candidate) {
        err += (r - c) * (r - c);
        energy += r * r;
    }
    if energy == 0.0 {
        return if err == 0.0 { 0.0 } else { f64::INFINITY };
    }
    err / energy
}

/// Compare a candidate output against the reference with tolerance `max_err`.
pub fn compare(reference: &[f64], candidate: &[f64], max_err: f64) -> Comparison {
    if reference.len() != candidate.len() {
        return Comparison::special(Mismatch::Length {
            reference: reference.len(),
            candidate: candidate.len(),
        });
    }

    let mut kept_ref = Vec::with_capacity(reference.len());
    let mut kept_cand = Vec::with_capacity(candidate.len());
    for (index, (&r, &c)) in reference.iter().zip(candidate).enumerate() {
        if r.is_nan() || c.is_nan() {
            return Comparison::special(Mismatch::Nan { index });
        }
        match (is_saturated(r), is_saturated(c)) {
            (false, false) => {
                kept_ref.push(r);
                kept_cand.push(c);
            }
            (true, true) if r.is_sign_negative() == c.is_sign_negative() => {}
            (true, true) => {
                return Comparison::special(Mismatch::SaturationSign {
                    index,
                    reference: r,
                    candidate: c,
                });
            }
            _ => {
                return Comparison::special(Mismatch::Saturation {
                    index,
                    reference: r,
                    candidate: c,
                });
            }
        }
    }

    let value = nmse(&kept_ref, &kept_cand);
    let mismatch = (value > max_err).then_some(Mismatch::Nmse {
        value,
        max: max_err,
    });
    Comparison {
        nmse: value,
        mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: f64 = f32::MAX as f64;

    #[test]
    fn test_identical_passes_at_zero_tolerance() {
        let a = [0.5, -1.25, 3.0];
        let c = compare(&a, &a, 0.0);
        assert!(c.ok());
        assert_eq!(c.nmse, 0.0);
    }

    #[test]
    fn test_nmse_value() {
        // Σ(r-c)² = 0.25, Σr² = 4 + 1 = 5
        let c = compare(&[2.0, 1.0], &[2.5, 1.0], 1.0);
        assert!((c.nmse - 0.05).abs() < 1e-12);
        assert!(c.ok());
        let c = compare(&[2.0, 1.0], &[2.5, 1.0], 0.01);
        assert!(matches!(c.mismatch, Some(Mismatch::Nmse { .. })));
        assert!(!c.mismatch.unwrap().is_special());
    }

    #[test]
    fn test_nan_on_either_side_fails() {
        let c = compare(&[1.0, f64::NAN], &[1.0, 2.0], f64::MAX);
        assert_eq!(c.mismatch, Some(Mismatch::Nan { index: 1 }));
        let c = compare(&[1.0, 2.0], &[f64::NAN, 2.0], f64::MAX);
        assert_eq!(c.mismatch, Some(Mismatch::Nan { index: 0 }));
        assert!(compare(&[f64::NAN], &[f64::NAN], f64::MAX).mismatch.is_some());
    }

    #[test]
    fn test_saturation_rules() {
        assert!(compare(&[f64::INFINITY], &[f64::INFINITY], 0.0).ok());
        assert!(compare(&[f64::NEG_INFINITY], &[-MAX], 0.0).ok());
        assert!(compare(&[f64::INFINITY], &[MAX], 0.0).ok());
        assert!(matches!(
            compare(&[f64::INFINITY], &[f64::NEG_INFINITY], f64::MAX).mismatch,
            Some(Mismatch::SaturationSign { index: 0, .. })
        ));
    }

    #[test]
    fn test_large_finite_against_inf_is_inf_mismatch() {
        // Only the f32 extremes count as saturated; 1e30 is an ordinary value.
        assert!(!is_saturated(1e30));
        assert!(is_saturated(-MAX));
        assert!(matches!(
            compare(&[1.0, f64::INFINITY], &[1.0, 1e30], f64::MAX).mismatch,
            Some(Mismatch::Saturation { index: 1, .. })
        ));
    }

    #[test]
    fn test_saturated_pairs_excluded_from_metric() {
        let r = [f64::NEG_INFINITY, 2.0, 1.0];
        let c = [f64::NEG_INFINITY, 2.0, 1.0];
        assert_eq!(compare(&r, &c, 0.0).nmse, 0.0);
    }

    #[test]
    fn test_zero_energy_reference() {
        assert_eq!(nmse(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(nmse(&[0.0, 0.0], &[0.0, 1e-9]), f64::INFINITY);
        assert!(!compare(&[0.0], &[1e-9], 1e6).ok());
        assert!(compare(&[], &[], 0.0).ok());
    }

    #[test]
    fn test_length_mismatch() {
        let c = compare(&[1.0, 2.0], &[1.0], 1.0);
        assert_eq!(
            c.mismatch,
            Some(Mismatch::Length {
                reference: 2,
                candidate: 1
            })
        );
    }

    #[test]
    fn test_mismatch_messages() {
        assert_eq!(Mismatch::Nan { index: 3 }.to_string(), "NaN at index 3");
        assert_eq!(
            Mismatch::Nmse {
                value: 0.5,
                max: 1e-6
            }
            .to_string(),
            "NMSE = 0.500000"
        );
    }
}
