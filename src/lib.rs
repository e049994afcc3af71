//! Batched fixed-step Runge–Kutta integration of subject cohorts.
//!
//! A [`Cohort`] of `N` subjects is integrated in lock-step by a
//! [`CohortIntegrator`], every subject sharing the same time grid and step
//! size but carrying its own parameters and forcing. Forcing can be given
//! densely or as sparse breakpoints expanded by a [`SeriesBuilder`]. The
//! physiology lives behind the [`Model`] trait.

#[macro_use]
extern crate lazy_static;

pub mod array;
pub mod cohort;
pub mod model;
pub mod random;
pub mod rk;
pub mod series;
pub mod simulate;
pub mod validate;

pub use crate::array::{ContainerError, Matrix, Vector};
pub use crate::cohort::{
    BaselineIntake, Breakpoints, Cohort, CohortForcing, ExtraInput, ForcingInput, Sex, Subject,
};
pub use crate::model::{Derivative, Forcing, InitialState, Model};
pub use crate::random::{rnorm, rnorm_with, set_seed};
pub use crate::rk::{
    CohortIntegrator, ForcingSeries, IntegrateError, IntegratorConfig, RKMethod, SubStep, RK4,
};
pub use crate::series::{energy_builder, Grid, Interpolant, Interpolation, SeriesBuilder};
pub use crate::simulate::{
    simulate, simulate_diet, simulate_with_energy_and_fat, simulate_with_extra, Series,
    SimulationResult,
};
pub use crate::validate::{PlausibleRanges, RangeViolation, ShapeError};

use ndarray::prelude::*;

pub trait OdeIntegrate {
    /// Returns the number of subjects.
    fn len(&self) -> usize;
    /// Returns `true` if there are no subjects.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Perform one fixed step for every subject. Does nothing once finished.
    fn step(&mut self);
    /// Current time.
    fn time(&self) -> f64;
    /// The ending time.
    fn time_bound(&self) -> f64;
    /// Current states, one row per subject.
    fn states(&self) -> ArrayView2<'_, f64>;
    /// Returns `true` if the integration has reached `time_bound`.
    fn finished(&self) -> bool {
        self.time() >= self.time_bound()
    }
    /// Integrate until reaching `time_bound`.
    fn run_to_bound(&mut self) {
        while !self.finished() {
            self.step();
        }
    }
}
