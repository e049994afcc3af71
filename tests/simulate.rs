use approx::assert_abs_diff_eq;
use ndarray::prelude::*;

use cohort_ivp::{
    simulate_diet, simulate_with_energy_and_fat, simulate_with_extra, Cohort, CohortForcing,
    Derivative, ExtraInput, Forcing, ForcingInput, InitialState, IntegrateError,
    IntegratorConfig, Interpolation, Matrix, Sex, ShapeError, Subject, Vector,
};

const KCAL_PER_KG: f64 = 7700.;

/// Weight moves with the energy intake change, sodium relaxes towards its
/// intake change, and baseline intakes are carried as constant states.
struct Toy;

impl InitialState for Toy {
    fn state_names(&self) -> &[&'static str] {
        &["Body_Weight", "Sodium", "Baseline_Energy", "Baseline_Fat"]
    }

    fn initial_state(&self, subject: &Subject) -> Array1<f64> {
        let energy = subject
            .baseline_energy
            .unwrap_or(22. * subject.body_weight * subject.pal);
        let fat = subject.baseline_fat.unwrap_or(0.3 * energy);
        array![subject.body_weight, 0., energy, fat]
    }
}

impl Derivative for Toy {
    fn derivative(
        &self,
        _t: f64,
        state: ArrayView1<f64>,
        forcing: &Forcing,
        _subject: &Subject,
        mut deriv: ArrayViewMut1<f64>,
    ) {
        deriv[0] = forcing.energy_intake / KCAL_PER_KG;
        deriv[1] = forcing.sodium_intake - 0.1 * state[1];
        deriv[2] = 0.;
        deriv[3] = 0.;
    }
}

fn cohort() -> Cohort {
    Cohort::new(
        Vector::from([70., 85., 100.]),
        Vector::from([1.65, 1.80, 1.75]),
        Vector::from([30., 45., 60.]),
        Vector::from([1., 0., 0.]),
    )
}

fn config() -> IntegratorConfig {
    IntegratorConfig::default().with_horizon(10.)
}

#[test]
fn default_config() {
    let config = IntegratorConfig::default();
    assert_eq!(config.dt, 1.);
    assert_eq!(config.horizon, 365.);
    assert!(config.check_values);
    assert_eq!(config.record_every, 1);
    assert!(!config.parallel);
    assert_eq!(config.seed, None);
    assert_eq!(config.steps().unwrap(), 365);
}

#[test]
fn result_has_one_column_per_recorded_step() {
    let result = simulate_diet(&Toy, &cohort(), &CohortForcing::default(), &config()).unwrap();
    assert_eq!(result.time().unwrap(), &Vector::from_iter((0..=10).map(f64::from)));
    for name in ["Body_Weight", "Sodium", "Energy_Intake_Change", "Sodium_Intake_Change"] {
        let m = result.matrix(name).unwrap();
        assert_eq!((m.nrows(), m.ncols()), (3, 11), "{}", name);
    }
    assert_eq!(result.len(), 7);
}

#[test]
fn repeated_runs_are_identical() {
    let forcing = CohortForcing::new(
        ForcingInput::breakpoints(
            Matrix::from_rows(&[[0., -500.]]).unwrap(),
            Vector::from([0., 10.]),
            Interpolation::Exponential,
        ),
        ForcingInput::constant(2.),
    );
    let first = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap();
    let second = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn constant_deficit_loses_weight_linearly() {
    let forcing = CohortForcing::new(ForcingInput::constant(-770.), ForcingInput::Zero);
    let result = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap();
    let weight = result.matrix("Body_Weight").unwrap();
    assert_abs_diff_eq!(weight[(0, 10)], 70. - 1., epsilon = 1e-10);
    assert_abs_diff_eq!(weight[(2, 5)], 100. - 0.5, epsilon = 1e-10);
    let intake = result.matrix("Energy_Intake_Change").unwrap();
    assert!(intake.as_array().iter().all(|&v| v == -770.));
}

#[test]
fn dense_forcing_is_used_per_step() {
    // Ten columns, one per step; the last is held at the final time.
    let energy = Array2::from_shape_fn((1, 10), |(_, n)| if n < 5 { -770. } else { 0. });
    let forcing = CohortForcing::new(ForcingInput::Dense(energy.into()), ForcingInput::Zero);
    let result = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap();
    let weight = result.matrix("Body_Weight").unwrap();
    // The last stage of step 4 already reads column 5.
    let lost = 0.4 + 0.1 * 5. / 6.;
    assert_abs_diff_eq!(weight[(1, 5)], 85. - lost, epsilon = 1e-10);
    assert_abs_diff_eq!(weight[(1, 10)], 85. - lost, epsilon = 1e-10);
    let intake = result.matrix("Energy_Intake_Change").unwrap();
    assert_eq!(intake.ncols(), 11);
    assert_eq!(intake[(2, 10)], 0.);
}

#[test]
fn dense_forcing_with_wrong_columns_is_rejected() {
    let forcing = CohortForcing::new(
        ForcingInput::Dense(Matrix::zeros(3, 12)),
        ForcingInput::Zero,
    );
    let err = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap_err();
    assert!(matches!(
        err,
        IntegrateError::Shape(ShapeError::ForcingColumns {
            expected: 10,
            found: 12,
            ..
        })
    ));
}

#[test]
fn forcing_rows_must_match_cohort() {
    let forcing = CohortForcing::new(
        ForcingInput::breakpoints(
            Matrix::from_rows(&[[0., 100.], [0., 200.]]).unwrap(),
            Vector::from([0., 10.]),
            Interpolation::Linear,
        ),
        ForcingInput::Zero,
    );
    let err = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap_err();
    assert!(err.is_shape_error());
    assert!(matches!(
        err,
        IntegrateError::Shape(ShapeError::ForcingRows {
            expected: 3,
            found: 2,
            ..
        })
    ));
}

#[test]
fn parameter_lengths_must_match() {
    let cohort = cohort().with_pal(Vector::from([1.5, 1.6]));
    let err = simulate_diet(&Toy, &cohort, &CohortForcing::default(), &config()).unwrap_err();
    assert!(matches!(
        err,
        IntegrateError::Shape(ShapeError::ParameterLength {
            name: "pal",
            expected: 3,
            found: 2
        })
    ));
}

#[test]
fn implausible_values_are_rejected_when_checked() {
    let mut cohort = cohort();
    cohort.age[0] = 10.;
    cohort.sex[2] = 2.;
    let err = simulate_diet(&Toy, &cohort, &CohortForcing::default(), &config()).unwrap_err();
    match err {
        IntegrateError::RangeViolations(violations) => {
            assert_eq!(violations.len(), 2);
            assert_eq!(violations[0].subject, 0);
            assert_eq!(violations[0].parameter, "age");
            assert_eq!(violations[1].subject, 2);
            assert_eq!(violations[1].parameter, "sex");
        }
        e => panic!("unexpected error: {}", e),
    }
}

#[test]
fn implausible_values_are_tolerated_when_unchecked() {
    let mut cohort = cohort();
    cohort.age[0] = 10.;
    let config = config().with_check_values(false);
    let result = simulate_diet(&Toy, &cohort, &CohortForcing::default(), &config).unwrap();
    assert_eq!(result.matrix("Body_Weight").unwrap()[(0, 10)], 70.);
}

#[test]
fn non_finite_states_propagate() {
    let mut cohort = cohort();
    cohort.body_weight[1] = f64::NAN;
    let config = config().with_check_values(false);
    let forcing = CohortForcing::new(ForcingInput::constant(-100.), ForcingInput::Zero);
    let result = simulate_diet(&Toy, &cohort, &forcing, &config).unwrap();
    let weight = result.matrix("Body_Weight").unwrap();
    assert!(weight[(1, 10)].is_nan());
    assert!(weight[(0, 10)].is_finite());
}

#[test]
fn parallel_matches_sequential() {
    let forcing = CohortForcing::new(
        ForcingInput::breakpoints(
            Matrix::from_rows(&[[0., -300., -600.]]).unwrap(),
            Vector::from([0., 4., 10.]),
            Interpolation::Cubic,
        ),
        ForcingInput::constant(1.),
    );
    let sequential = simulate_diet(&Toy, &cohort(), &forcing, &config()).unwrap();
    let parallel = simulate_diet(&Toy, &cohort(), &forcing, &config().with_parallel(true)).unwrap();
    let pooled = simulate_diet(
        &Toy,
        &cohort(),
        &forcing,
        &config().with_parallel(true).with_n_threads(2),
    )
    .unwrap();
    assert_eq!(sequential, parallel);
    assert_eq!(sequential, pooled);
}

#[test]
fn record_every_keeps_first_and_last_step() {
    let config = IntegratorConfig::default()
        .with_horizon(12.)
        .with_record_every(5);
    let result = simulate_diet(&Toy, &cohort(), &CohortForcing::default(), &config).unwrap();
    assert_eq!(result.time().unwrap(), &Vector::from([0., 5., 10., 12.]));
    assert_eq!(result.matrix("Sodium").unwrap().ncols(), 4);
}

#[test]
fn sub_daily_steps() {
    let config = IntegratorConfig::default().with_dt(0.25).with_horizon(2.);
    let sodium = ForcingInput::constant(1.);
    let forcing = CohortForcing::new(ForcingInput::Zero, sodium);
    let result = simulate_diet(&Toy, &cohort(), &forcing, &config).unwrap();
    assert_eq!(result.time().unwrap().len(), 9);
    // s' = 1 - 0.1 s, s(0) = 0.
    let expected = 10. * (1. - (-0.2f64).exp());
    assert_abs_diff_eq!(
        result.matrix("Sodium").unwrap()[(0, 8)],
        expected,
        epsilon = 1e-8
    );
}

#[test]
fn invalid_configuration_is_rejected() {
    let run = |config: IntegratorConfig| {
        simulate_diet(&Toy, &cohort(), &CohortForcing::default(), &config).unwrap_err()
    };
    assert!(matches!(
        run(config().with_dt(-1.)),
        IntegrateError::StepSize { .. }
    ));
    assert!(matches!(
        run(config().with_horizon(f64::INFINITY)),
        IntegrateError::Horizon { .. }
    ));
    assert!(matches!(
        run(config().with_horizon(0.2)),
        IntegrateError::NoSteps { .. }
    ));
    assert!(matches!(
        run(config().with_record_every(0)),
        IntegrateError::RecordInterval
    ));
    assert!(matches!(
        run(config().with_horizon(1e300).with_dt(1e-300)),
        IntegrateError::TooManySteps { .. }
    ));
}

#[test]
fn extra_energy_input_sets_baseline_energy() {
    let energy = Vector::from([2000., 2500., 3000.]);
    let result = simulate_with_extra(
        &Toy,
        &cohort(),
        &CohortForcing::default(),
        &energy,
        ExtraInput::Energy,
        &config(),
    )
    .unwrap();
    let baseline = result.matrix("Baseline_Energy").unwrap();
    assert_eq!(baseline.column(0).unwrap(), energy);
    let fat = result.matrix("Baseline_Fat").unwrap();
    assert_abs_diff_eq!(fat[(1, 0)], 750., epsilon = 1e-9);
}

#[test]
fn extra_fat_input_sets_baseline_fat() {
    let fat = Vector::from([600., 700., 800.]);
    let result = simulate_with_extra(
        &Toy,
        &cohort(),
        &CohortForcing::default(),
        &fat,
        ExtraInput::Fat,
        &config(),
    )
    .unwrap();
    assert_eq!(result.matrix("Baseline_Fat").unwrap().column(10).unwrap(), fat);
}

#[test]
fn energy_and_fat_inputs_are_checked() {
    let energy = Vector::from([2000., 2500., 3000.]);
    let fat = Vector::from([600., 700., 800.]);
    let result = simulate_with_energy_and_fat(
        &Toy,
        &cohort(),
        &CohortForcing::default(),
        &energy,
        &fat,
        &config(),
    )
    .unwrap();
    assert_eq!(result.matrix("Baseline_Energy").unwrap().column(0).unwrap(), energy);
    assert_eq!(result.matrix("Baseline_Fat").unwrap().column(0).unwrap(), fat);

    let short = Vector::from([600., 700.]);
    let err = simulate_with_energy_and_fat(
        &Toy,
        &cohort(),
        &CohortForcing::default(),
        &energy,
        &short,
        &config(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        IntegrateError::Shape(ShapeError::ParameterLength {
            name: "baseline_fat",
            ..
        })
    ));

    let negative = Vector::from([-1., 2500., 3000.]);
    let err = simulate_with_energy_and_fat(
        &Toy,
        &cohort(),
        &CohortForcing::default(),
        &negative,
        &fat,
        &config(),
    )
    .unwrap_err();
    assert!(matches!(err, IntegrateError::RangeViolations(ref v) if v.len() == 1));
}

#[test]
fn seeded_brownian_forcing_is_reproducible() {
    let forcing = CohortForcing::new(
        ForcingInput::breakpoints(
            Matrix::from_rows(&[[0., -500.]]).unwrap(),
            Vector::from([0., 10.]),
            Interpolation::Brownian,
        ),
        ForcingInput::Zero,
    );
    let config = config().with_seed(7).with_brownian_scale(50.);
    let first = simulate_diet(&Toy, &cohort(), &forcing, &config).unwrap();
    let second = simulate_diet(&Toy, &cohort(), &forcing, &config).unwrap();
    assert_eq!(first, second);

    let other = simulate_diet(&Toy, &cohort(), &forcing, &config.clone().with_seed(8)).unwrap();
    assert_ne!(
        first.matrix("Energy_Intake_Change"),
        other.matrix("Energy_Intake_Change")
    );

    // Pinned at the breakpoints.
    let intake = first.matrix("Energy_Intake_Change").unwrap();
    for subject in 0..3 {
        assert_abs_diff_eq!(intake[(subject, 0)], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(intake[(subject, 10)], -500., epsilon = 1e-12);
    }
}

#[test]
fn shape_errors_take_precedence_over_range_violations() {
    let mut cohort = cohort();
    cohort.age[0] = 10.;
    let forcing = CohortForcing::new(
        ForcingInput::breakpoints(
            Matrix::from_rows(&[[0., 100.], [0., 200.]]).unwrap(),
            Vector::from([0., 10.]),
            Interpolation::Linear,
        ),
        ForcingInput::Zero,
    );
    let err = simulate_diet(&Toy, &cohort, &forcing, &config()).unwrap_err();
    assert!(err.is_shape_error());
    assert!(matches!(
        err,
        IntegrateError::Shape(ShapeError::ForcingRows { found: 2, .. })
    ));
}

#[test]
fn cohort_from_sexes() {
    let sexes: Vec<Sex> = ["female", "Male", "FEMALE"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    assert!("other".parse::<Sex>().is_err());
    let cohort = Cohort::with_sexes(
        Vector::from([70., 85., 100.]),
        Vector::from([1.65, 1.80, 1.75]),
        Vector::from([30., 45., 60.]),
        &sexes,
    );
    assert_eq!(cohort.sex, Vector::from([1., 0., 1.]));
    assert_eq!(cohort.pal, Vector::from_elem(3, Cohort::DEFAULT_PAL));
    let result = simulate_diet(&Toy, &cohort, &CohortForcing::default(), &config()).unwrap();
    assert_eq!(result.matrix("Body_Weight").unwrap().nrows(), 3);
}
