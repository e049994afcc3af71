use approx::assert_abs_diff_eq;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use cohort_ivp::series::BuildSeriesError;
use cohort_ivp::{energy_builder, Grid, Interpolant, Interpolation, Matrix, SeriesBuilder, ShapeError, Vector};

fn build(method: Interpolation, values: &[f64], times: &[f64], grid: &Grid) -> Matrix {
    let mut rng = StdRng::seed_from_u64(0);
    SeriesBuilder::new(method)
        .build(&Matrix::from_rows(&[values]).unwrap(), &Vector::from(times), grid, &mut rng)
        .unwrap()
}

#[test]
fn linear_holds_boundary_values() {
    let interpolant =
        Interpolant::new(aview1(&[0., 10.]), aview1(&[5., 15.]), Interpolation::Linear).unwrap();
    assert_abs_diff_eq!(interpolant.value_at(5.).unwrap(), 10.);
    assert_abs_diff_eq!(interpolant.value_at(-1.).unwrap(), 5.);
    assert_abs_diff_eq!(interpolant.value_at(20.).unwrap(), 15.);
}

#[test]
fn linear_on_a_grid_past_the_last_breakpoint() {
    let grid = Grid::new(0., 1., 21).unwrap();
    let series = build(Interpolation::Linear, &[5., 15.], &[0., 10.], &grid);
    assert_eq!(series.ncols(), 21);
    assert_abs_diff_eq!(series[(0, 5)], 10., epsilon = 1e-12);
    assert_abs_diff_eq!(series[(0, 20)], 15., epsilon = 1e-12);
}

#[test]
fn single_breakpoint_is_constant_for_every_method() {
    let grid = Grid::new(0., 0.5, 9).unwrap();
    for method in Interpolation::ALL {
        let series = build(method, &[-250.], &[2.], &grid);
        assert!(
            series.as_array().iter().all(|&v| v == -250.),
            "{} is not constant",
            method
        );
    }
}

#[test]
fn kernels_pass_through_breakpoints() {
    let grid = Grid::new(0., 1., 11).unwrap();
    let values = [1., 3., 2.];
    for method in [
        Interpolation::Linear,
        Interpolation::Exponential,
        Interpolation::Logarithmic,
        Interpolation::Cubic,
        Interpolation::Brownian,
    ] {
        let series = build(method, &values, &[0., 4., 10.], &grid);
        for (&column, &value) in [0, 4, 10].iter().zip(&values) {
            assert_abs_diff_eq!(series[(0, column)], value, epsilon = 1e-12);
        }
    }
}

#[test]
fn exponential_front_loads_the_change() {
    let interpolant =
        Interpolant::new(aview1(&[0., 10.]), aview1(&[0., 100.]), Interpolation::Exponential)
            .unwrap();
    let expected = 100. * (1. - (-1f64).exp()) / (1. - (-10f64).exp());
    assert_abs_diff_eq!(interpolant.value_at(1.).unwrap(), expected, epsilon = 1e-9);
    assert!(interpolant.value_at(5.).unwrap() > 50.);
}

#[test]
fn logarithmic_front_loads_the_change() {
    let interpolant =
        Interpolant::new(aview1(&[0., 10.]), aview1(&[0., 100.]), Interpolation::Logarithmic)
            .unwrap();
    let expected = 100. * 6f64.ln() / 11f64.ln();
    assert_abs_diff_eq!(interpolant.value_at(5.).unwrap(), expected, epsilon = 1e-9);
}

#[test]
fn stepwise_kernels() {
    let times = aview1(&[0., 10., 20.]);
    let values = aview1(&[0., 1., 2.]);
    let right = Interpolant::new(times, values, Interpolation::StepwiseRight).unwrap();
    let left = Interpolant::new(times, values, Interpolation::StepwiseLeft).unwrap();
    assert_eq!(right.value_at(5.).unwrap(), 0.);
    assert_eq!(right.value_at(15.).unwrap(), 1.);
    assert_eq!(left.value_at(5.).unwrap(), 1.);
    assert_eq!(left.value_at(15.).unwrap(), 2.);
    assert_eq!(right.value_at(30.).unwrap(), 2.);
    assert_eq!(left.value_at(-5.).unwrap(), 0.);
}

#[test]
fn cubic_preserves_monotonicity() {
    let interpolant = Interpolant::new(
        aview1(&[0., 2., 3., 10.]),
        aview1(&[0., 10., 11., 30.]),
        Interpolation::Cubic,
    )
    .unwrap();
    let mut previous = f64::NEG_INFINITY;
    for i in 0..=100 {
        let v = interpolant.value_at(i as f64 / 10.).unwrap();
        assert!(v >= previous);
        previous = v;
    }
}

#[test]
fn brownian_is_seeded_and_stays_pinned() {
    let grid = Grid::new(0., 1., 31).unwrap();
    let breakpoints = Matrix::from_rows(&[[0., -300.], [0., -600.]]).unwrap();
    let times = Vector::from([0., 30.]);
    let builder = SeriesBuilder::new(Interpolation::Brownian).with_brownian_scale(20.);
    let run = |seed| {
        builder
            .build(&breakpoints, &times, &grid, &mut StdRng::seed_from_u64(seed))
            .unwrap()
    };
    let first = run(3);
    assert_eq!(first, run(3));
    assert_ne!(first, run(4));
    for row in 0..2 {
        assert_abs_diff_eq!(first[(row, 0)], 0., epsilon = 1e-12);
        assert_abs_diff_eq!(first[(row, 30)], breakpoints[(row, 1)], epsilon = 1e-12);
    }
    // Rows draw separate paths.
    let deviation = |row: usize| first[(row, 15)] - breakpoints[(row, 1)] / 2.;
    assert_ne!(deviation(0), deviation(1));
}

#[test]
fn zero_brownian_scale_is_linear() {
    let grid = Grid::new(0., 1., 11).unwrap();
    let mut rng = StdRng::seed_from_u64(1);
    let breakpoints = Matrix::from_rows(&[[0., 10.]]).unwrap();
    let times = Vector::from([0., 10.]);
    let brownian = SeriesBuilder::new(Interpolation::Brownian)
        .with_brownian_scale(0.)
        .build(&breakpoints, &times, &grid, &mut rng)
        .unwrap();
    let linear = build(Interpolation::Linear, &[0., 10.], &[0., 10.], &grid);
    for j in 0..11 {
        assert_abs_diff_eq!(brownian[(0, j)], linear[(0, j)], epsilon = 1e-12);
    }
}

#[test]
fn negative_brownian_scale_is_rejected() {
    let grid = Grid::new(0., 1., 11).unwrap();
    let result = SeriesBuilder::new(Interpolation::Brownian)
        .with_brownian_scale(-1.)
        .build(
            &Matrix::from_rows(&[[0., 10.]]).unwrap(),
            &Vector::from([0., 10.]),
            &grid,
            &mut StdRng::seed_from_u64(0),
        );
    assert!(matches!(result, Err(BuildSeriesError::BrownianScale { .. })));
}

#[test]
fn breakpoint_times_must_increase() {
    let grid = Grid::new(0., 1., 11).unwrap();
    let result = SeriesBuilder::new(Interpolation::Linear).build(
        &Matrix::from_rows(&[[0., 1., 2.]]).unwrap(),
        &Vector::from([0., 5., 5.]),
        &grid,
        &mut StdRng::seed_from_u64(0),
    );
    assert!(matches!(
        result,
        Err(BuildSeriesError::Shape(ShapeError::TimesNotIncreasing { index: 2 }))
    ));
}

#[test]
fn breakpoint_columns_must_match_times() {
    let grid = Grid::new(0., 1., 11).unwrap();
    let result = SeriesBuilder::new(Interpolation::Linear).build(
        &Matrix::from_rows(&[[0., 1., 2.]]).unwrap(),
        &Vector::from([0., 5.]),
        &grid,
        &mut StdRng::seed_from_u64(0),
    );
    assert!(matches!(
        result,
        Err(BuildSeriesError::Shape(ShapeError::BreakpointColumns {
            columns: 3,
            times: 2
        }))
    ));
}

#[test]
fn method_names() {
    assert_eq!("Stepwise_R".parse(), Ok(Interpolation::StepwiseRight));
    assert_eq!("stepwise-l".parse(), Ok(Interpolation::StepwiseLeft));
    assert_eq!("BROWNIAN".parse(), Ok(Interpolation::Brownian));
    assert_eq!("pchip".parse(), Ok(Interpolation::Cubic));
    for method in Interpolation::ALL {
        assert_eq!(method.name().parse(), Ok(method));
    }
    assert!("quadratic".parse::<Interpolation>().is_err());
}

#[test]
fn energy_builder_uses_a_daily_grid() {
    let breakpoints = Matrix::from_rows(&[[0., -100., -100.], [0., -200., 0.]]).unwrap();
    let times = Vector::from([0., 10., 30.]);
    let series = energy_builder(&breakpoints, &times, "Linear").unwrap();
    // Days 1 through 30; day 0 is left out.
    assert_eq!((series.nrows(), series.ncols()), (2, 30));
    assert_abs_diff_eq!(series[(0, 4)], -50., epsilon = 1e-12);
    assert_abs_diff_eq!(series[(1, 19)], -100., epsilon = 1e-12);
    assert_abs_diff_eq!(series[(1, 29)], 0., epsilon = 1e-12);

    let err = energy_builder(&breakpoints, &times, "quadratic").unwrap_err();
    assert!(matches!(err, BuildSeriesError::Method(_)));
}

#[test]
fn energy_builder_requires_times_from_day_zero() {
    let breakpoints = Matrix::from_rows(&[[0., -100., -100.]]).unwrap();
    let err = energy_builder(&breakpoints, &Vector::from([5., 10., 30.]), "Linear").unwrap_err();
    assert!(matches!(
        err,
        BuildSeriesError::Shape(ShapeError::FirstTimeNotZero { time }) if time == 5.
    ));
    let err = energy_builder(&breakpoints, &Vector::from([-5., 10., 30.]), "Linear").unwrap_err();
    assert!(matches!(
        err,
        BuildSeriesError::Shape(ShapeError::FirstTimeNotZero { .. })
    ));
}

#[test]
fn energy_builder_rejects_negative_times() {
    let breakpoints = Matrix::from_rows(&[[0., -100., -100.]]).unwrap();
    let err = energy_builder(&breakpoints, &Vector::from([0., -5., 30.]), "Linear").unwrap_err();
    assert!(matches!(
        err,
        BuildSeriesError::Shape(ShapeError::NegativeTime { index: 1 })
    ));
}
