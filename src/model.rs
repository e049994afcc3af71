//! The pluggable model seam.
//!
//! The integrator knows nothing about physiology: a model supplies the
//! layout and initial value of each subject's state ([`InitialState`]) and
//! its rate of change ([`Derivative`]).

use ndarray::prelude::*;

use crate::cohort::Subject;

/// Forcing values at one stage time of one subject.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Forcing {
    /// Change in energy intake.
    pub energy_intake: f64,
    /// Change in sodium intake.
    pub sodium_intake: f64,
}

pub trait InitialState {
    /// Names of the state components, in state-vector order. Each becomes a
    /// series of the simulation result.
    fn state_names(&self) -> &[&'static str];

    /// Initial state of `subject`; must have `state_names().len()` elements.
    fn initial_state(&self, subject: &Subject) -> Array1<f64>;
}

pub trait Derivative {
    /// Fills `deriv` with the rate of change of `state` at time `t`.
    ///
    /// Must be deterministic. Non-finite results are not intercepted; they
    /// propagate into the trajectory.
    fn derivative(
        &self,
        t: f64,
        state: ArrayView1<'_, f64>,
        forcing: &Forcing,
        subject: &Subject,
        deriv: ArrayViewMut1<'_, f64>,
    );
}

/// A complete model. Implemented for every type that provides both halves;
/// `Sync` so subjects can be evaluated in parallel.
pub trait Model: InitialState + Derivative + Sync {}

impl<T: InitialState + Derivative + Sync> Model for T {}
