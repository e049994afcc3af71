//! Cohort parameters and forcing inputs.

use ndarray::prelude::*;
use rand::Rng;
use std::str::FromStr;
use thiserror::Error;

use crate::array::{Matrix, Vector};
use crate::series::{BuildSeriesError, Grid, Interpolation, SeriesBuilder};
use crate::validate::{check_forcing_rows, ShapeError};

/// Sex of a subject, stored in a [`Cohort`] as a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// `0.0` for male, `1.0` for female.
    pub fn code(self) -> f64 {
        match self {
            Sex::Male => 0.,
            Sex::Female => 1.,
        }
    }

    pub fn from_code(code: f64) -> Option<Sex> {
        if code == 0. {
            Some(Sex::Male)
        } else if code == 1. {
            Some(Sex::Female)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized sex `{0}` (expected `male` or `female`)")]
pub struct ParseSexError(pub String);

impl FromStr for Sex {
    type Err = ParseSexError;

    fn from_str(s: &str) -> Result<Sex, ParseSexError> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            _ => Err(ParseSexError(s.to_string())),
        }
    }
}

/// Per-subject parameters of `N` subjects, stored as parallel vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Cohort {
    /// Body weight (kg).
    pub body_weight: Vector,
    /// Height (m).
    pub height: Vector,
    /// Age (years).
    pub age: Vector,
    /// Sex code, see [`Sex::code`].
    pub sex: Vector,
    /// Physical activity level.
    pub pal: Vector,
    /// Carbohydrate fraction of the baseline diet.
    pub pcarb_base: Vector,
    /// Carbohydrate fraction of the diet during the simulation.
    pub pcarb: Vector,
}

impl Cohort {
    pub const DEFAULT_PAL: f64 = 1.5;
    pub const DEFAULT_PCARB: f64 = 0.5;

    /// Creates a cohort with the default activity level and carbohydrate
    /// fractions for every subject.
    ///
    /// The cohort size is the length of `body_weight`; the other vectors are
    /// checked against it when the cohort is integrated.
    pub fn new(body_weight: Vector, height: Vector, age: Vector, sex: Vector) -> Cohort {
        let n = body_weight.len();
        Cohort {
            body_weight,
            height,
            age,
            sex,
            pal: Vector::from_elem(n, Cohort::DEFAULT_PAL),
            pcarb_base: Vector::from_elem(n, Cohort::DEFAULT_PCARB),
            pcarb: Vector::from_elem(n, Cohort::DEFAULT_PCARB),
        }
    }

    pub fn with_sexes(body_weight: Vector, height: Vector, age: Vector, sexes: &[Sex]) -> Cohort {
        let sex = sexes.iter().map(|s| s.code()).collect();
        Cohort::new(body_weight, height, age, sex)
    }

    pub fn with_pal(mut self, pal: Vector) -> Cohort {
        self.pal = pal;
        self
    }

    pub fn with_pcarb_base(mut self, pcarb_base: Vector) -> Cohort {
        self.pcarb_base = pcarb_base;
        self
    }

    pub fn with_pcarb(mut self, pcarb: Vector) -> Cohort {
        self.pcarb = pcarb;
        self
    }

    /// Number of subjects.
    pub fn len(&self) -> usize {
        self.body_weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body_weight.is_empty()
    }

    /// The per-subject vectors with their names.
    pub fn parameters(&self) -> [(&'static str, &Vector); 7] {
        [
            ("body_weight", &self.body_weight),
            ("height", &self.height),
            ("age", &self.age),
            ("sex", &self.sex),
            ("pal", &self.pal),
            ("pcarb_base", &self.pcarb_base),
            ("pcarb", &self.pcarb),
        ]
    }

    /// Parameters of subject `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range for any per-subject vector.
    pub fn subject(&self, index: usize, baseline: &BaselineIntake) -> Subject {
        Subject {
            index,
            body_weight: self.body_weight[index],
            height: self.height[index],
            age: self.age[index],
            sex: self.sex[index],
            pal: self.pal[index],
            pcarb_base: self.pcarb_base[index],
            pcarb: self.pcarb[index],
            baseline_energy: baseline.energy(index),
            baseline_fat: baseline.fat(index),
        }
    }
}

/// One subject's parameters, as seen by a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subject {
    /// Row of this subject in the cohort.
    pub index: usize,
    pub body_weight: f64,
    pub height: f64,
    pub age: f64,
    pub sex: f64,
    pub pal: f64,
    pub pcarb_base: f64,
    pub pcarb: f64,
    /// Caller-supplied baseline energy intake, if any.
    pub baseline_energy: Option<f64>,
    /// Caller-supplied baseline fat intake, if any.
    pub baseline_fat: Option<f64>,
}

impl Subject {
    pub fn sex(&self) -> Option<Sex> {
        Sex::from_code(self.sex)
    }
}

/// Semantic role of a single extra input vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtraInput {
    Energy,
    Fat,
}

/// Explicit baseline intake, one value per subject.
///
/// The variant selects how a model derives its initial state: from the
/// subject parameters alone, with one extra input vector, or with both.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BaselineIntake {
    #[default]
    Derived,
    Extra { values: Vector, kind: ExtraInput },
    EnergyAndFat { energy: Vector, fat: Vector },
}

impl BaselineIntake {
    /// The supplied vectors with their names.
    pub fn vectors(&self) -> Vec<(&'static str, &Vector)> {
        match self {
            BaselineIntake::Derived => Vec::new(),
            BaselineIntake::Extra {
                values,
                kind: ExtraInput::Energy,
            } => vec![("baseline_energy", values)],
            BaselineIntake::Extra {
                values,
                kind: ExtraInput::Fat,
            } => vec![("baseline_fat", values)],
            BaselineIntake::EnergyAndFat { energy, fat } => {
                vec![("baseline_energy", energy), ("baseline_fat", fat)]
            }
        }
    }

    pub fn energy(&self, index: usize) -> Option<f64> {
        match self {
            BaselineIntake::Extra {
                values,
                kind: ExtraInput::Energy,
            } => values.get(index),
            BaselineIntake::EnergyAndFat { energy, .. } => energy.get(index),
            _ => None,
        }
    }

    pub fn fat(&self, index: usize) -> Option<f64> {
        match self {
            BaselineIntake::Extra {
                values,
                kind: ExtraInput::Fat,
            } => values.get(index),
            BaselineIntake::EnergyAndFat { fat, .. } => fat.get(index),
            _ => None,
        }
    }
}

/// Sparse breakpoints of one forcing signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoints {
    /// One row per subject (or a single shared row), one column per time.
    pub values: Matrix,
    pub times: Vector,
    pub method: Interpolation,
}

/// How one forcing signal is supplied.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ForcingInput {
    /// No change for any subject.
    #[default]
    Zero,
    /// Per-step values on the integrator grid: `N` (or 1) rows and `steps`
    /// (or `steps + 1`) columns.
    Dense(Matrix),
    /// Breakpoints expanded onto the integrator grid.
    Breakpoints(Breakpoints),
}

impl ForcingInput {
    pub fn breakpoints(values: Matrix, times: Vector, method: Interpolation) -> ForcingInput {
        ForcingInput::Breakpoints(Breakpoints {
            values,
            times,
            method,
        })
    }

    /// The same constant change for every subject over the whole horizon.
    pub fn constant(change: f64) -> ForcingInput {
        ForcingInput::breakpoints(
            Matrix::from_elem(1, 1, change),
            Vector::from([0.]),
            Interpolation::Linear,
        )
    }

    /// Expands the input to `subjects × grid.len()` values.
    ///
    /// `grid` must have `steps + 1` points; a dense input with only `steps`
    /// columns holds its last column at the final time.
    pub(crate) fn resolve<R: Rng + ?Sized>(
        &self,
        name: &'static str,
        subjects: usize,
        grid: &Grid,
        brownian_scale: f64,
        rng: &mut R,
    ) -> Result<Matrix, BuildSeriesError> {
        let steps = grid.len().saturating_sub(1);
        match self {
            ForcingInput::Zero => Ok(Matrix::zeros(subjects, grid.len())),
            ForcingInput::Dense(values) => {
                check_forcing_rows(name, values.nrows(), subjects)?;
                let cols = values.ncols();
                if cols != steps && cols != steps + 1 {
                    return Err(ShapeError::ForcingColumns {
                        name,
                        expected: steps,
                        found: cols,
                    }
                    .into());
                }
                let values = values.as_array();
                let mut dense = Array2::zeros((values.nrows(), grid.len()));
                dense.slice_mut(s![.., ..cols]).assign(values);
                if cols == steps {
                    dense.column_mut(steps).assign(&values.column(steps - 1));
                }
                Ok(Matrix::from(dense).broadcast_rows(subjects))
            }
            ForcingInput::Breakpoints(b) => {
                check_forcing_rows(name, b.values.nrows(), subjects)?;
                let built = SeriesBuilder::new(b.method)
                    .with_brownian_scale(brownian_scale)
                    .build(&b.values, &b.times, grid, rng)?;
                Ok(built.broadcast_rows(subjects))
            }
        }
    }
}

/// The forcing signals driving a cohort.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CohortForcing {
    /// Change in energy intake.
    pub energy_intake: ForcingInput,
    /// Change in sodium intake.
    pub sodium_intake: ForcingInput,
}

impl CohortForcing {
    pub fn new(energy_intake: ForcingInput, sodium_intake: ForcingInput) -> CohortForcing {
        CohortForcing {
            energy_intake,
            sodium_intake,
        }
    }
}
