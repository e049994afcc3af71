//! Entry points: validate a cohort, resolve its forcing, integrate it and
//! collect named trajectories.

use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::ThreadPoolBuilder;
use std::collections::btree_map::{self, BTreeMap};

use crate::array::{Matrix, Vector};
use crate::cohort::{BaselineIntake, Cohort, CohortForcing, ExtraInput};
use crate::model::Model;
use crate::random::with_global_rng;
use crate::rk::{CohortIntegrator, ForcingSeries, IntegrateError, IntegratorConfig, RK4};
use crate::series::{BuildSeriesError, Grid};
use crate::validate::{check_ranges, check_shapes};
use crate::OdeIntegrate;

/// Key of the recorded times.
pub const TIME: &str = "Time";
/// Key of the recorded energy intake change.
pub const ENERGY_INTAKE_CHANGE: &str = "Energy_Intake_Change";
/// Key of the recorded sodium intake change.
pub const SODIUM_INTAKE_CHANGE: &str = "Sodium_Intake_Change";

/// One named series of a simulation result.
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    /// Shared by all subjects, one value per recorded step.
    Vector(Vector),
    /// One row per subject, one column per recorded step.
    Matrix(Matrix),
}

impl Series {
    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Series::Vector(v) => Some(v),
            Series::Matrix(_) => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&Matrix> {
        match self {
            Series::Matrix(m) => Some(m),
            Series::Vector(_) => None,
        }
    }
}

/// Named trajectories of a cohort: `"Time"`, one matrix per state component
/// and the recorded forcing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimulationResult {
    series: BTreeMap<String, Series>,
}

impl SimulationResult {
    pub fn get(&self, name: &str) -> Option<&Series> {
        self.series.get(name)
    }

    pub fn vector(&self, name: &str) -> Option<&Vector> {
        self.get(name).and_then(Series::as_vector)
    }

    pub fn matrix(&self, name: &str) -> Option<&Matrix> {
        self.get(name).and_then(Series::as_matrix)
    }

    /// The recorded times.
    pub fn time(&self) -> Option<&Vector> {
        self.vector(TIME)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.series.keys().map(String::as_str)
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Series> {
        self.series.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, Series> {
        self.series
    }

    fn insert(&mut self, name: &str, series: Series) {
        self.series.insert(name.to_string(), series);
    }
}

impl<'a> IntoIterator for &'a SimulationResult {
    type Item = (&'a String, &'a Series);
    type IntoIter = btree_map::Iter<'a, String, Series>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Integrates `cohort` under `forcing` over `config.horizon`.
///
/// Every input is validated and all forcing built before the first step, so
/// either the whole run succeeds or nothing is returned. Non-finite states
/// produced by the model are not intercepted.
pub fn simulate<M: Model>(
    model: &M,
    cohort: &Cohort,
    forcing: &CohortForcing,
    baseline: &BaselineIntake,
    config: &IntegratorConfig,
) -> Result<SimulationResult, IntegrateError> {
    let steps = config.steps()?;
    if config.record_every == 0 {
        return Err(IntegrateError::RecordInterval);
    }
    check_shapes(cohort, baseline)?;

    let n = cohort.len();
    let grid = Grid::new(0., config.dt, steps + 1)?;
    let forcing = match config.seed {
        Some(seed) => resolve_forcing(forcing, n, &grid, config, &mut StdRng::seed_from_u64(seed))?,
        None => with_global_rng(|rng| resolve_forcing(forcing, n, &grid, config, rng))?,
    };

    let violations = check_ranges(cohort, baseline, &config.ranges);
    if !violations.is_empty() {
        if config.check_values {
            return Err(IntegrateError::RangeViolations(violations));
        }
        for violation in &violations {
            log::warn!("{}", violation);
        }
    }
    let subjects = (0..n).map(|i| cohort.subject(i, baseline)).collect();

    log::debug!(
        "integrating {} subject(s) over {} step(s) of {} (parallel: {})",
        n,
        steps,
        config.dt,
        config.parallel
    );
    let mut integrator =
        CohortIntegrator::<M, RK4>::new(model, subjects, forcing, config.dt, steps, config.sub_step)?
            .parallel(config.parallel);
    let recorded = recorded_steps(steps, config.record_every);
    let trajectory = if config.parallel && config.n_threads > 0 {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.n_threads)
            .build()?;
        pool.install(|| record_trajectory(&mut integrator, &recorded))
    } else {
        record_trajectory(&mut integrator, &recorded)
    };

    Ok(collect_result(
        model.state_names(),
        &grid,
        &recorded,
        trajectory,
        integrator.forcing(),
    ))
}

/// Integrates with initial states derived from the subject parameters alone.
pub fn simulate_diet<M: Model>(
    model: &M,
    cohort: &Cohort,
    forcing: &CohortForcing,
    config: &IntegratorConfig,
) -> Result<SimulationResult, IntegrateError> {
    simulate(model, cohort, forcing, &BaselineIntake::Derived, config)
}

/// Integrates with one extra baseline intake vector of role `kind`.
pub fn simulate_with_extra<M: Model>(
    model: &M,
    cohort: &Cohort,
    forcing: &CohortForcing,
    values: &Vector,
    kind: ExtraInput,
    config: &IntegratorConfig,
) -> Result<SimulationResult, IntegrateError> {
    let baseline = BaselineIntake::Extra {
        values: values.clone(),
        kind,
    };
    simulate(model, cohort, forcing, &baseline, config)
}

/// Integrates with explicit baseline energy and fat intake.
pub fn simulate_with_energy_and_fat<M: Model>(
    model: &M,
    cohort: &Cohort,
    forcing: &CohortForcing,
    energy: &Vector,
    fat: &Vector,
    config: &IntegratorConfig,
) -> Result<SimulationResult, IntegrateError> {
    let baseline = BaselineIntake::EnergyAndFat {
        energy: energy.clone(),
        fat: fat.clone(),
    };
    simulate(model, cohort, forcing, &baseline, config)
}

fn resolve_forcing<R: Rng + ?Sized>(
    forcing: &CohortForcing,
    subjects: usize,
    grid: &Grid,
    config: &IntegratorConfig,
    rng: &mut R,
) -> Result<ForcingSeries, BuildSeriesError> {
    let energy_intake = forcing.energy_intake.resolve(
        ENERGY_INTAKE_CHANGE,
        subjects,
        grid,
        config.brownian_scale,
        rng,
    )?;
    let sodium_intake = forcing.sodium_intake.resolve(
        SODIUM_INTAKE_CHANGE,
        subjects,
        grid,
        config.brownian_scale,
        rng,
    )?;
    Ok(ForcingSeries {
        energy_intake,
        sodium_intake,
    })
}

/// Steps at which states are recorded: every `every`-th, plus the last.
fn recorded_steps(steps: usize, every: usize) -> Vec<usize> {
    let mut recorded: Vec<usize> = (0..=steps).step_by(every).collect();
    if recorded.last() != Some(&steps) {
        recorded.push(steps);
    }
    recorded
}

/// Runs `integrator` to its bound, returning states of shape
/// `(subjects, recorded.len(), state length)`.
fn record_trajectory<I: OdeIntegrate>(integrator: &mut I, recorded: &[usize]) -> Array3<f64> {
    let states = integrator.states();
    let mut trajectory = Array3::zeros((states.nrows(), recorded.len(), states.ncols()));
    let mut step = 0;
    for (column, &target) in recorded.iter().enumerate() {
        while step < target {
            integrator.step();
            step += 1;
        }
        log::trace!("recording step {} at t = {}", step, integrator.time());
        trajectory
            .slice_mut(s![.., column, ..])
            .assign(&integrator.states());
    }
    integrator.run_to_bound();
    trajectory
}

fn collect_result(
    state_names: &[&'static str],
    grid: &Grid,
    recorded: &[usize],
    trajectory: Array3<f64>,
    forcing: &ForcingSeries,
) -> SimulationResult {
    let mut result = SimulationResult::default();
    let times = recorded.iter().map(|&step| grid.time(step)).collect();
    result.insert(TIME, Series::Vector(times));
    for (v, name) in state_names.iter().enumerate() {
        let states = trajectory.index_axis(Axis(2), v).to_owned();
        result.insert(name, Series::Matrix(states.into()));
    }
    let sampled = |m: &Matrix| Series::Matrix(m.as_array().select(Axis(1), recorded).into());
    result.insert(ENERGY_INTAKE_CHANGE, sampled(&forcing.energy_intake));
    result.insert(SODIUM_INTAKE_CHANGE, sampled(&forcing.sodium_intake));
    result
}
