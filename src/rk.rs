//! Fixed-step Runge–Kutta integration of a cohort.

use ndarray::prelude::*;
use rayon::prelude::*;
use std::marker::PhantomData;
use thiserror::Error;

use crate::array::Matrix;
use crate::cohort::Subject;
use crate::model::{Forcing, Model};
use crate::series::BuildSeriesError;
use crate::validate::{PlausibleRanges, RangeViolation, ShapeError};
use crate::OdeIntegrate;

/// Explicit Runge–Kutta tableau.
pub trait RKMethod {
    /// Order of the method.
    const ORDER: usize;

    /// Number of stages in the method.
    const NUM_STAGES: usize;

    /// Coefficients for incrementing time for consecutive RK stages, length
    /// `NUM_STAGES - 1`.
    ///
    /// The value for the first stage is always zero, so it is not included.
    fn c() -> ArrayView1<'static, f64>;

    /// Coefficients for combining previous RK stages to compute the next
    /// stage, length `NUM_STAGES - 1`.
    ///
    /// For explicit methods the coefficients above the main diagonal are
    /// zeros, so `a` is stored as a list of arrays of increasing lengths. The
    /// first stage is always just `f`, thus no coefficients for it are
    /// required.
    fn a() -> &'static [ArrayView1<'static, f64>];

    /// Coefficients for combining RK stages for computing the final
    /// prediction, length `NUM_STAGES`.
    fn b() -> ArrayView1<'static, f64>;
}

/// The classic fourth-order Runge–Kutta method.
///
/// ```text
/// k1 = f(t, y)
/// k2 = f(t + h/2, y + h/2 k1)
/// k3 = f(t + h/2, y + h/2 k2)
/// k4 = f(t + h, y + h k3)
/// y' = y + h/6 (k1 + 2 k2 + 2 k3 + k4)
/// ```
pub struct RK4;

impl RKMethod for RK4 {
    const ORDER: usize = 4;

    const NUM_STAGES: usize = 4;

    fn c() -> ArrayView1<'static, f64> {
        aview1(&[1. / 2., 1. / 2., 1.])
    }

    fn a() -> &'static [ArrayView1<'static, f64>] {
        lazy_static! {
            static ref A: [ArrayView1<'static, f64>; 4 - 1] = [
                aview1(&[1. / 2.]),
                aview1(&[0., 1. / 2.]),
                aview1(&[0., 0., 1.]),
            ];
        }
        &*A
    }

    fn b() -> ArrayView1<'static, f64> {
        aview1(&[1. / 6., 1. / 3., 1. / 3., 1. / 6.])
    }
}

/// How forcing is read at stage times between grid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubStep {
    /// The value of the grid point at or before the stage time.
    #[default]
    Hold,
    /// Linear interpolation between the neighbouring grid points.
    Linear,
}

/// Dense forcing of every subject on the integrator grid.
///
/// Both matrices have one row per subject and `steps + 1` columns, column
/// `n` holding the value at `t0 + n * dt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcingSeries {
    pub energy_intake: Matrix,
    pub sodium_intake: Matrix,
}

impl ForcingSeries {
    /// Forcing of `subject` at the stage time `t_step + c * dt`, `0 <= c <= 1`.
    fn sample(&self, subject: usize, step: usize, c: f64, sub_step: SubStep) -> Forcing {
        Forcing {
            energy_intake: sample_row(self.energy_intake.view().row(subject), step, c, sub_step),
            sodium_intake: sample_row(self.sodium_intake.view().row(subject), step, c, sub_step),
        }
    }
}

fn sample_row(row: ArrayView1<'_, f64>, step: usize, c: f64, sub_step: SubStep) -> f64 {
    let last = row.len() - 1;
    match sub_step {
        SubStep::Hold => row[(step + c.floor() as usize).min(last)],
        SubStep::Linear => {
            let lo = row[step.min(last)];
            let hi = row[(step + 1).min(last)];
            lo + (hi - lo) * c
        }
    }
}

/// Settings of a cohort integration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IntegratorConfig {
    /// Step size (days).
    pub dt: f64,
    /// Simulated duration (days); the number of steps is `round(horizon / dt)`.
    pub horizon: f64,
    /// Reject implausible inputs instead of warning about them.
    pub check_values: bool,
    /// Record states every this many steps. Step 0 and the final step are
    /// always recorded.
    pub record_every: usize,
    pub sub_step: SubStep,
    /// Evaluate subjects in parallel.
    pub parallel: bool,
    /// Size of a dedicated thread pool for parallel runs; `0` uses the
    /// global rayon pool.
    pub n_threads: usize,
    /// Seed of the generator used for stochastic forcing. `None` draws from
    /// the process-wide stream (see [`crate::random::set_seed`]).
    pub seed: Option<u64>,
    /// Standard deviation of Brownian forcing per unit time.
    pub brownian_scale: f64,
    pub ranges: PlausibleRanges,
}

impl Default for IntegratorConfig {
    fn default() -> IntegratorConfig {
        IntegratorConfig {
            dt: 1.,
            horizon: 365.,
            check_values: true,
            record_every: 1,
            sub_step: SubStep::Hold,
            parallel: false,
            n_threads: 0,
            seed: None,
            brownian_scale: 1.,
            ranges: PlausibleRanges::default(),
        }
    }
}

impl IntegratorConfig {
    pub fn with_dt(mut self, dt: f64) -> IntegratorConfig {
        self.dt = dt;
        self
    }

    pub fn with_horizon(mut self, horizon: f64) -> IntegratorConfig {
        self.horizon = horizon;
        self
    }

    pub fn with_check_values(mut self, check_values: bool) -> IntegratorConfig {
        self.check_values = check_values;
        self
    }

    pub fn with_record_every(mut self, record_every: usize) -> IntegratorConfig {
        self.record_every = record_every;
        self
    }

    pub fn with_sub_step(mut self, sub_step: SubStep) -> IntegratorConfig {
        self.sub_step = sub_step;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> IntegratorConfig {
        self.parallel = parallel;
        self
    }

    pub fn with_n_threads(mut self, n_threads: usize) -> IntegratorConfig {
        self.n_threads = n_threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> IntegratorConfig {
        self.seed = Some(seed);
        self
    }

    pub fn with_brownian_scale(mut self, brownian_scale: f64) -> IntegratorConfig {
        self.brownian_scale = brownian_scale;
        self
    }

    pub fn with_ranges(mut self, ranges: PlausibleRanges) -> IntegratorConfig {
        self.ranges = ranges;
        self
    }

    /// Number of steps covering the horizon.
    pub fn steps(&self) -> Result<usize, IntegrateError> {
        check_step_size(self.dt)?;
        if !(self.horizon.is_finite() && self.horizon > 0.) {
            return Err(IntegrateError::Horizon {
                horizon: self.horizon,
            });
        }
        let steps = (self.horizon / self.dt).round();
        if !(steps < usize::MAX as f64) {
            return Err(IntegrateError::TooManySteps {
                horizon: self.horizon,
                dt: self.dt,
            });
        }
        if steps < 1. {
            return Err(IntegrateError::NoSteps {
                horizon: self.horizon,
                dt: self.dt,
            });
        }
        Ok(steps as usize)
    }
}

fn check_step_size(dt: f64) -> Result<(), IntegrateError> {
    if dt.is_finite() && dt > 0. {
        Ok(())
    } else {
        Err(IntegrateError::StepSize { dt })
    }
}

#[derive(Debug, Error)]
pub enum IntegrateError {
    #[error(transparent)]
    Shape(ShapeError),
    #[error("{}", describe_violations(.0))]
    RangeViolations(Vec<RangeViolation>),
    #[error("failed to build forcing series: {0}")]
    Series(BuildSeriesError),
    #[error("step size must be finite and positive, got {dt}")]
    StepSize { dt: f64 },
    #[error("horizon must be finite and positive, got {horizon}")]
    Horizon { horizon: f64 },
    #[error("horizon {horizon} holds no whole step of size {dt}")]
    NoSteps { horizon: f64, dt: f64 },
    #[error("horizon {horizon} needs too many steps of size {dt}")]
    TooManySteps { horizon: f64, dt: f64 },
    #[error("record interval must be at least 1")]
    RecordInterval,
    #[error("forcing has shape {found:?}, expected {expected:?}")]
    ForcingShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("initial state of subject {subject} has {found} elements, expected {expected}")]
    StateLength {
        subject: usize,
        expected: usize,
        found: usize,
    },
    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

fn describe_violations(violations: &[RangeViolation]) -> String {
    match violations {
        [] => "no implausible inputs".to_string(),
        [only] => format!("implausible input: {}", only),
        [first, rest @ ..] => format!("{} implausible inputs, first: {}", rest.len() + 1, first),
    }
}

impl From<ShapeError> for IntegrateError {
    fn from(e: ShapeError) -> IntegrateError {
        IntegrateError::Shape(e)
    }
}

impl From<BuildSeriesError> for IntegrateError {
    fn from(e: BuildSeriesError) -> IntegrateError {
        match e {
            BuildSeriesError::Shape(e) => IntegrateError::Shape(e),
            e => IntegrateError::Series(e),
        }
    }
}

impl IntegrateError {
    /// Whether the inputs were structurally malformed.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            IntegrateError::Shape(_)
                | IntegrateError::ForcingShape { .. }
                | IntegrateError::StateLength { .. }
        )
    }
}

/// Fixed-step Runge–Kutta integrator advancing every subject of a cohort in
/// lock-step.
pub struct CohortIntegrator<'a, M, O = RK4>
where
    M: Model,
    O: RKMethod,
{
    model: &'a M,
    method: PhantomData<fn() -> O>,
    subjects: Vec<Subject>,
    forcing: ForcingSeries,
    sub_step: SubStep,
    /// Initial time.
    t0: f64,
    /// Step size.
    dt: f64,
    /// Number of steps to the time bound.
    steps: usize,
    /// Number of steps taken so far.
    step_index: usize,
    /// Current states, shape `(subjects, state length)`.
    y: Array2<f64>,
    /// Storage for Runge–Kutta stages, shape `(subjects, O::NUM_STAGES, state length)`.
    k: Array3<f64>,
    /// Evaluate subjects on the rayon pool.
    parallel: bool,
}

impl<'a, M, O> CohortIntegrator<'a, M, O>
where
    M: Model,
    O: RKMethod,
{
    /// Creates a new integrator starting at time zero.
    ///
    /// # Parameters
    ///
    /// * `model`: provides each subject's initial state and derivative.
    ///
    /// * `subjects`: subject parameters, in forcing-row order.
    ///
    /// * `forcing`: dense forcing with `subjects.len()` rows and `steps + 1`
    ///   columns.
    ///
    /// * `dt`: step size.
    ///
    /// * `steps`: number of steps to the time bound.
    ///
    /// * `sub_step`: how forcing is read at intermediate stage times.
    pub fn new(
        model: &'a M,
        subjects: Vec<Subject>,
        forcing: ForcingSeries,
        dt: f64,
        steps: usize,
        sub_step: SubStep,
    ) -> Result<CohortIntegrator<'a, M, O>, IntegrateError> {
        if subjects.is_empty() {
            return Err(ShapeError::EmptyCohort.into());
        }
        check_step_size(dt)?;
        let expected = (subjects.len(), steps + 1);
        for m in [&forcing.energy_intake, &forcing.sodium_intake] {
            let found = (m.nrows(), m.ncols());
            if found != expected {
                return Err(IntegrateError::ForcingShape { expected, found });
            }
        }

        let len = model.state_names().len();
        let mut y = Array2::zeros((subjects.len(), len));
        for (subject, mut row) in subjects.iter().zip(y.rows_mut()) {
            let y0 = model.initial_state(subject);
            if y0.len() != len {
                return Err(IntegrateError::StateLength {
                    subject: subject.index,
                    expected: len,
                    found: y0.len(),
                });
            }
            row.assign(&y0);
        }
        let k = Array3::zeros((subjects.len(), O::NUM_STAGES, len));

        Ok(CohortIntegrator {
            model,
            method: PhantomData,
            subjects,
            forcing,
            sub_step,
            t0: 0.,
            dt,
            steps,
            step_index: 0,
            y,
            k,
            parallel: false,
        })
    }

    /// Evaluates subjects on the current rayon pool when `parallel` is set.
    ///
    /// Subjects are independent, so the result does not depend on this.
    pub fn parallel(mut self, parallel: bool) -> CohortIntegrator<'a, M, O> {
        self.parallel = parallel;
        self
    }

    pub fn step_size(&self) -> f64 {
        self.dt
    }

    /// Number of steps taken so far.
    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Total number of steps to the time bound.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn forcing(&self) -> &ForcingSeries {
        &self.forcing
    }

    /// Advances one subject by one step of size `h`.
    ///
    /// Notation for the Butcher tableau is as in E. Hairer, S. P. Norsett,
    /// G. Wanner, "Solving Ordinary Differential Equations I: Nonstiff
    /// Problems", Sec. II.1.
    #[allow(clippy::too_many_arguments)]
    fn step_subject(
        model: &M,
        subject: &Subject,
        forcing: &ForcingSeries,
        sub_step: SubStep,
        step: usize,
        t: f64,
        h: f64,
        mut y: ArrayViewMut1<'_, f64>,
        mut k: ArrayViewMut2<'_, f64>,
    ) {
        let sample = |c: f64| forcing.sample(subject.index, step, c, sub_step);
        model.derivative(t, y.view(), &sample(0.), subject, k.row_mut(0));
        for (s, (a, &c)) in O::a().iter().zip(O::c()).enumerate() {
            let dy = k.slice(s![..s + 1, ..]).t().dot(a) * h;
            let y_stage = dy + &y;
            model.derivative(t + c * h, y_stage.view(), &sample(c), subject, k.row_mut(s + 1));
        }
        let increment = k.t().dot(&O::b());
        y.scaled_add(h, &increment);
    }
}

impl<'a, M, O> OdeIntegrate for CohortIntegrator<'a, M, O>
where
    M: Model,
    O: RKMethod,
{
    fn len(&self) -> usize {
        self.subjects.len()
    }

    fn step(&mut self) {
        if self.finished() {
            return;
        }
        let t = self.time();
        let h = self.dt;
        let step = self.step_index;
        let model = self.model;
        let forcing = &self.forcing;
        let sub_step = self.sub_step;

        let advance = |(subject, (y, k)): (&Subject, (ArrayViewMut1<'_, f64>, ArrayViewMut2<'_, f64>))| {
            Self::step_subject(model, subject, forcing, sub_step, step, t, h, y, k)
        };
        if self.parallel {
            self.subjects
                .par_iter()
                .zip(
                    self.y
                        .axis_iter_mut(Axis(0))
                        .into_par_iter()
                        .zip(self.k.axis_iter_mut(Axis(0)).into_par_iter()),
                )
                .for_each(advance);
        } else {
            self.subjects
                .iter()
                .zip(self.y.axis_iter_mut(Axis(0)).zip(self.k.axis_iter_mut(Axis(0))))
                .for_each(advance);
        }
        self.step_index += 1;
    }

    fn time(&self) -> f64 {
        self.t0 + self.step_index as f64 * self.dt
    }

    fn time_bound(&self) -> f64 {
        self.t0 + self.steps as f64 * self.dt
    }

    fn states(&self) -> ArrayView2<'_, f64> {
        self.y.view()
    }

    fn finished(&self) -> bool {
        self.step_index >= self.steps
    }
}
