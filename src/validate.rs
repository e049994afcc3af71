//! Pre-flight input checks.
//!
//! Shape checks ([`check_shapes`], [`check_breakpoints`]) are structural and
//! always enforced. Range checks ([`check_ranges`]) collect every
//! physiologically implausible value; whether they are fatal is up to the
//! caller (see `IntegratorConfig::check_values`).

use ndarray::prelude::*;
use std::fmt;
use thiserror::Error;

use crate::array::{Matrix, Vector};
use crate::cohort::{BaselineIntake, Cohort};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("cohort is empty")]
    EmptyCohort,
    #[error("`{name}` has length {found}, expected {expected} (one value per subject)")]
    ParameterLength {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("`{name}` has {found} rows, expected {expected} (one per subject) or 1")]
    ForcingRows {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("`{name}` has {found} columns, expected {expected} (one per step) or one more")]
    ForcingColumns {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("no breakpoints given")]
    EmptyBreakpoints,
    #[error("breakpoint matrix has {columns} columns but there are {times} breakpoint times")]
    BreakpointColumns { columns: usize, times: usize },
    #[error("breakpoint time {index} is not finite")]
    NonFiniteTime { index: usize },
    #[error("first breakpoint time must be 0, got {time}")]
    FirstTimeNotZero { time: f64 },
    #[error("breakpoint time {index} is negative")]
    NegativeTime { index: usize },
    #[error("breakpoint time {index} is not greater than the one before it")]
    TimesNotIncreasing { index: usize },
}

/// Checks that breakpoint times are non-empty, finite and strictly
/// increasing.
pub fn check_breakpoint_times(times: ArrayView1<'_, f64>) -> Result<(), ShapeError> {
    if times.is_empty() {
        return Err(ShapeError::EmptyBreakpoints);
    }
    if let Some(index) = times.iter().position(|t| !t.is_finite()) {
        return Err(ShapeError::NonFiniteTime { index });
    }
    for index in 1..times.len() {
        if times[index] <= times[index - 1] {
            return Err(ShapeError::TimesNotIncreasing { index });
        }
    }
    Ok(())
}

/// Checks a breakpoint matrix against its time vector.
pub fn check_breakpoints(values: &Matrix, times: &Vector) -> Result<(), ShapeError> {
    check_breakpoint_times(times.view())?;
    if values.nrows() == 0 {
        return Err(ShapeError::EmptyBreakpoints);
    }
    if values.ncols() != times.len() {
        return Err(ShapeError::BreakpointColumns {
            columns: values.ncols(),
            times: times.len(),
        });
    }
    Ok(())
}

/// A forcing matrix must have one row per subject, or a single shared row.
pub fn check_forcing_rows(
    name: &'static str,
    rows: usize,
    subjects: usize,
) -> Result<(), ShapeError> {
    if rows == subjects || rows == 1 {
        Ok(())
    } else {
        Err(ShapeError::ForcingRows {
            name,
            expected: subjects,
            found: rows,
        })
    }
}

/// Checks that every per-subject vector has one entry per subject.
pub fn check_shapes(cohort: &Cohort, baseline: &BaselineIntake) -> Result<(), ShapeError> {
    let n = cohort.len();
    if n == 0 {
        return Err(ShapeError::EmptyCohort);
    }
    let vectors = cohort.parameters().into_iter().chain(baseline.vectors());
    for (name, v) in vectors {
        if v.len() != n {
            return Err(ShapeError::ParameterLength {
                name,
                expected: n,
                found: v.len(),
            });
        }
    }
    Ok(())
}

/// Interval of accepted values.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
    /// Whether `min` itself is excluded.
    pub exclusive_min: bool,
}

impl Bounds {
    /// `[min, max]`.
    pub const fn closed(min: f64, max: f64) -> Bounds {
        Bounds {
            min,
            max,
            exclusive_min: false,
        }
    }

    /// `(0, max]`.
    pub const fn positive(max: f64) -> Bounds {
        Bounds {
            min: 0.,
            max,
            exclusive_min: true,
        }
    }

    /// `false` for NaN.
    pub fn contains(&self, x: f64) -> bool {
        let above = if self.exclusive_min {
            x > self.min
        } else {
            x >= self.min
        };
        above && x <= self.max
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.exclusive_min { '(' } else { '[' };
        write!(f, "{}{}, {}]", open, self.min, self.max)
    }
}

/// Accepted ranges of the per-subject parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlausibleRanges {
    /// kg.
    pub body_weight: Bounds,
    /// m.
    pub height: Bounds,
    /// Years; the model targets adults.
    pub age: Bounds,
    pub pal: Bounds,
    /// Both carbohydrate fractions.
    pub carb_fraction: Bounds,
    /// kcal/day.
    pub baseline_energy: Bounds,
    /// kcal/day.
    pub baseline_fat: Bounds,
}

impl Default for PlausibleRanges {
    fn default() -> PlausibleRanges {
        PlausibleRanges {
            body_weight: Bounds::positive(700.),
            height: Bounds::positive(3.),
            age: Bounds::closed(18., 120.),
            pal: Bounds::closed(1., 2.5),
            carb_fraction: Bounds::closed(0., 1.),
            baseline_energy: Bounds::positive(20_000.),
            baseline_fat: Bounds::closed(0., 20_000.),
        }
    }
}

/// What an implausible value fell outside of.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expected {
    Range(Bounds),
    /// One of the codes of [`crate::cohort::Sex`].
    SexCode,
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Range(bounds) => write!(f, "within {}", bounds),
            Expected::SexCode => f.write_str("0 (male) or 1 (female)"),
        }
    }
}

/// A single implausible input value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeViolation {
    pub subject: usize,
    pub parameter: &'static str,
    pub value: f64,
    pub expected: Expected,
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject {}: `{}` = {} is not {}",
            self.subject, self.parameter, self.value, self.expected
        )
    }
}

fn collect_out_of_bounds(
    violations: &mut Vec<RangeViolation>,
    parameter: &'static str,
    values: &Vector,
    bounds: Bounds,
) {
    violations.extend(
        values
            .iter()
            .enumerate()
            .filter(|(_, &v)| !bounds.contains(v))
            .map(|(subject, &value)| RangeViolation {
                subject,
                parameter,
                value,
                expected: Expected::Range(bounds),
            }),
    );
}

/// Collects every value outside `ranges`, ordered by parameter and then by
/// subject.
///
/// Assumes [`check_shapes`] has passed.
pub fn check_ranges(
    cohort: &Cohort,
    baseline: &BaselineIntake,
    ranges: &PlausibleRanges,
) -> Vec<RangeViolation> {
    let mut violations = Vec::new();
    collect_out_of_bounds(&mut violations, "body_weight", &cohort.body_weight, ranges.body_weight);
    collect_out_of_bounds(&mut violations, "height", &cohort.height, ranges.height);
    collect_out_of_bounds(&mut violations, "age", &cohort.age, ranges.age);
    violations.extend(
        cohort
            .sex
            .iter()
            .enumerate()
            .filter(|(_, &code)| crate::cohort::Sex::from_code(code).is_none())
            .map(|(subject, &value)| RangeViolation {
                subject,
                parameter: "sex",
                value,
                expected: Expected::SexCode,
            }),
    );
    collect_out_of_bounds(&mut violations, "pal", &cohort.pal, ranges.pal);
    collect_out_of_bounds(&mut violations, "pcarb_base", &cohort.pcarb_base, ranges.carb_fraction);
    collect_out_of_bounds(&mut violations, "pcarb", &cohort.pcarb, ranges.carb_fraction);
    for (name, values) in baseline.vectors() {
        let bounds = if name == "baseline_fat" {
            ranges.baseline_fat
        } else {
            ranges.baseline_energy
        };
        collect_out_of_bounds(&mut violations, name, values, bounds);
    }
    violations
}
