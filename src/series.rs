//! Breakpoint-to-dense series construction.
//!
//! A forcing signal is specified as sparse `(time, value)` breakpoints, one
//! row per subject. [`SeriesBuilder`] expands the rows onto an evenly spaced
//! [`Grid`] with a selectable [`Interpolation`] kernel. Outside the breakpoint
//! range every kernel holds the boundary value.

use ndarray::prelude::*;
use ninterp::error::{InterpolateError, ValidateError};
use ninterp::interpolator::Extrapolate;
use ninterp::prelude::{Interp1DOwned, Interpolator};
use ninterp::strategy::{LeftNearest, Linear, RightNearest};
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::array::{Matrix, Vector};
use crate::random::with_global_rng;
use crate::validate::{check_breakpoint_times, check_breakpoints, ShapeError};

/// Interpolation kernel used between consecutive breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interpolation {
    /// Piecewise-linear.
    Linear,
    /// Unit-rate exponential approach towards the next breakpoint, rescaled
    /// to reach it exactly.
    Exponential,
    /// Logarithmic approach towards the next breakpoint.
    Logarithmic,
    /// Holds each breakpoint value until the next breakpoint time.
    StepwiseRight,
    /// Jumps to the next breakpoint value immediately after each breakpoint.
    StepwiseLeft,
    /// Monotone piecewise-cubic Hermite (Fritsch–Carlson).
    Cubic,
    /// Linear mean plus a Brownian bridge pinned at every breakpoint.
    Brownian,
}

impl Interpolation {
    pub const ALL: [Interpolation; 7] = [
        Interpolation::Linear,
        Interpolation::Exponential,
        Interpolation::Logarithmic,
        Interpolation::StepwiseRight,
        Interpolation::StepwiseLeft,
        Interpolation::Cubic,
        Interpolation::Brownian,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Linear => "Linear",
            Interpolation::Exponential => "Exponential",
            Interpolation::Logarithmic => "Logarithmic",
            Interpolation::StepwiseRight => "Stepwise_R",
            Interpolation::StepwiseLeft => "Stepwise_L",
            Interpolation::Cubic => "Cubic",
            Interpolation::Brownian => "Brownian",
        }
    }

    /// Returns `true` if the kernel draws random numbers.
    pub fn is_stochastic(&self) -> bool {
        *self == Interpolation::Brownian
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported interpolation method `{0}`")]
pub struct ParseInterpolationError(pub String);

impl FromStr for Interpolation {
    type Err = ParseInterpolationError;

    /// Parses a method name, ignoring case, `_` and `-`.
    fn from_str(s: &str) -> Result<Interpolation, ParseInterpolationError> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "linear" => Ok(Interpolation::Linear),
            "exponential" => Ok(Interpolation::Exponential),
            "logarithmic" => Ok(Interpolation::Logarithmic),
            "stepwiser" => Ok(Interpolation::StepwiseRight),
            "stepwisel" => Ok(Interpolation::StepwiseLeft),
            "cubic" | "pchip" | "monotonecubic" => Ok(Interpolation::Cubic),
            "brownian" => Ok(Interpolation::Brownian),
            _ => Err(ParseInterpolationError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildSeriesError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Method(#[from] ParseInterpolationError),
    #[error("grid spacing must be finite and positive, got {dt}")]
    GridSpacing { dt: f64 },
    #[error("brownian scale must be finite and non-negative, got {scale}")]
    BrownianScale { scale: f64 },
    #[error(transparent)]
    Validate(#[from] ValidateError),
    #[error(transparent)]
    Interpolate(#[from] InterpolateError),
}

/// Evenly spaced evaluation times `start + j * dt` for `j < len`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    start: f64,
    dt: f64,
    len: usize,
}

impl Grid {
    pub fn new(start: f64, dt: f64, len: usize) -> Result<Grid, BuildSeriesError> {
        if !(dt.is_finite() && dt > 0.) {
            return Err(BuildSeriesError::GridSpacing { dt });
        }
        Ok(Grid { start, dt, len })
    }

    /// Grid from time zero through the last breakpoint time (inclusive).
    pub fn spanning(times: &Vector, dt: f64) -> Result<Grid, BuildSeriesError> {
        let last = times.max().unwrap_or(0.).max(0.);
        let len = if dt > 0. && dt.is_finite() {
            (last / dt).round() as usize + 1
        } else {
            0
        };
        Grid::new(0., dt, len)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Time of grid point `j`.
    pub fn time(&self, j: usize) -> f64 {
        self.start + j as f64 * self.dt
    }

    pub fn times(&self) -> Vector {
        (0..self.len).map(|j| self.time(j)).collect()
    }
}

/// Breakpoints for the kernels the crate evaluates itself.
#[derive(Debug, Clone)]
struct Segments {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl Segments {
    /// Index `k` of the segment `[times[k], times[k + 1]]` containing `t`, or
    /// the boundary value when `t` lies outside the breakpoint range.
    fn locate(&self, t: f64) -> Result<usize, f64> {
        let last = self.times.len() - 1;
        if t <= self.times[0] {
            return Err(self.values[0]);
        }
        if t >= self.times[last] {
            return Err(self.values[last]);
        }
        let k = self.times.partition_point(|&x| x <= t) - 1;
        Ok(k.min(last - 1))
    }

    fn value_at(&self, t: f64, shape: impl Fn(f64, f64) -> f64) -> f64 {
        match self.locate(t) {
            Err(boundary) => boundary,
            Ok(k) => {
                let (t0, t1) = (self.times[k], self.times[k + 1]);
                let (e0, e1) = (self.values[k], self.values[k + 1]);
                e0 + (e1 - e0) * shape(t - t0, t1 - t0)
            }
        }
    }
}

/// Fraction of the way through a segment of `width` after `x` time units
/// for the exponential kernel.
fn exponential_fraction(x: f64, width: f64) -> f64 {
    (-x).exp_m1() / (-width).exp_m1()
}

fn logarithmic_fraction(x: f64, width: f64) -> f64 {
    x.ln_1p() / width.ln_1p()
}

/// Monotone piecewise-cubic Hermite interpolant.
///
/// Slopes follow Fritsch & Carlson with the three-point end conditions used
/// by SciPy's `PchipInterpolator`, so the interpolant never overshoots the
/// breakpoint values.
#[derive(Debug, Clone)]
struct MonotoneCubic {
    segments: Segments,
    slopes: Vec<f64>,
}

impl MonotoneCubic {
    fn new(segments: Segments) -> MonotoneCubic {
        let x = &segments.times;
        let y = &segments.values;
        let n = x.len();
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let delta: Vec<f64> = (0..n - 1).map(|k| (y[k + 1] - y[k]) / h[k]).collect();

        let mut slopes = vec![0.; n];
        if n == 2 {
            slopes[0] = delta[0];
            slopes[1] = delta[0];
        } else {
            for k in 1..n - 1 {
                if delta[k - 1] * delta[k] > 0. {
                    let w1 = 2. * h[k] + h[k - 1];
                    let w2 = h[k] + 2. * h[k - 1];
                    slopes[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
                }
            }
            slopes[0] = end_slope(h[0], h[1], delta[0], delta[1]);
            slopes[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
        }
        MonotoneCubic { segments, slopes }
    }

    fn value_at(&self, t: f64) -> f64 {
        match self.segments.locate(t) {
            Err(boundary) => boundary,
            Ok(k) => {
                let x = &self.segments.times;
                let y = &self.segments.values;
                let h = x[k + 1] - x[k];
                let s = (t - x[k]) / h;
                let s2 = s * s;
                let s3 = s2 * s;
                let h00 = 2. * s3 - 3. * s2 + 1.;
                let h10 = s3 - 2. * s2 + s;
                let h01 = -2. * s3 + 3. * s2;
                let h11 = s3 - s2;
                h00 * y[k]
                    + h10 * h * self.slopes[k]
                    + h01 * y[k + 1]
                    + h11 * h * self.slopes[k + 1]
            }
        }
    }
}

/// Non-centered three-point end slope, limited to preserve monotonicity.
fn end_slope(h0: f64, h1: f64, d0: f64, d1: f64) -> f64 {
    let d = ((2. * h0 + h1) * d0 - h0 * d1) / (h0 + h1);
    if d.signum() != d0.signum() || d0 == 0. {
        0.
    } else if d0.signum() != d1.signum() && d.abs() > 3. * d0.abs() {
        3. * d0
    } else {
        d
    }
}

enum Kernel {
    Constant(f64),
    Linear(Interp1DOwned<f64, Linear>),
    StepwiseRight(Interp1DOwned<f64, LeftNearest>),
    StepwiseLeft(Interp1DOwned<f64, RightNearest>),
    Exponential(Segments),
    Logarithmic(Segments),
    Cubic(MonotoneCubic),
}

/// Interpolant for a single breakpoint row.
pub struct Interpolant {
    method: Interpolation,
    kernel: Kernel,
    /// First and last breakpoint, held outside the breakpoint range.
    first: (f64, f64),
    last: (f64, f64),
}

impl Interpolant {
    /// Prepares `method` over the breakpoints `(times[i], values[i])`.
    ///
    /// `times` must be finite and strictly increasing. A single breakpoint
    /// gives a constant interpolant for every method.
    pub fn new(
        times: ArrayView1<'_, f64>,
        values: ArrayView1<'_, f64>,
        method: Interpolation,
    ) -> Result<Interpolant, BuildSeriesError> {
        check_breakpoint_times(times)?;
        if values.len() != times.len() {
            return Err(ShapeError::BreakpointColumns {
                columns: values.len(),
                times: times.len(),
            }
            .into());
        }

        let kernel = if times.len() == 1 {
            Kernel::Constant(values[0])
        } else {
            let segments = || Segments {
                times: times.to_vec(),
                values: values.to_vec(),
            };
            match method {
                Interpolation::Linear | Interpolation::Brownian => Kernel::Linear(
                    Interp1DOwned::new(times.to_owned(), values.to_owned(), Linear, Extrapolate::Clamp)?,
                ),
                Interpolation::StepwiseRight => Kernel::StepwiseRight(Interp1DOwned::new(
                    times.to_owned(),
                    values.to_owned(),
                    LeftNearest,
                    Extrapolate::Clamp,
                )?),
                Interpolation::StepwiseLeft => Kernel::StepwiseLeft(Interp1DOwned::new(
                    times.to_owned(),
                    values.to_owned(),
                    RightNearest,
                    Extrapolate::Clamp,
                )?),
                Interpolation::Exponential => Kernel::Exponential(segments()),
                Interpolation::Logarithmic => Kernel::Logarithmic(segments()),
                Interpolation::Cubic => Kernel::Cubic(MonotoneCubic::new(segments())),
            }
        };
        let n = times.len() - 1;
        Ok(Interpolant {
            method,
            kernel,
            first: (times[0], values[0]),
            last: (times[n], values[n]),
        })
    }

    pub fn method(&self) -> Interpolation {
        self.method
    }

    /// Value at time `t`.
    ///
    /// For [`Interpolation::Brownian`] this is the linear mean; the bridge
    /// noise only exists on a grid built by [`SeriesBuilder`].
    pub fn value_at(&self, t: f64) -> Result<f64, BuildSeriesError> {
        if t <= self.first.0 {
            return Ok(self.first.1);
        }
        if t >= self.last.0 {
            return Ok(self.last.1);
        }
        Ok(match &self.kernel {
            Kernel::Constant(v) => *v,
            Kernel::Linear(i) => i.interpolate(&[t])?,
            Kernel::StepwiseRight(i) => i.interpolate(&[t])?,
            Kernel::StepwiseLeft(i) => i.interpolate(&[t])?,
            Kernel::Exponential(s) => s.value_at(t, exponential_fraction),
            Kernel::Logarithmic(s) => s.value_at(t, logarithmic_fraction),
            Kernel::Cubic(c) => c.value_at(t),
        })
    }
}

/// Expands breakpoint rows into dense series.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeriesBuilder {
    method: Interpolation,
    brownian_scale: f64,
}

impl SeriesBuilder {
    pub fn new(method: Interpolation) -> SeriesBuilder {
        SeriesBuilder {
            method,
            brownian_scale: 1.,
        }
    }

    /// Standard deviation of the Brownian increments per square-root time
    /// unit.
    pub fn with_brownian_scale(mut self, scale: f64) -> SeriesBuilder {
        self.brownian_scale = scale;
        self
    }

    pub fn method(&self) -> Interpolation {
        self.method
    }

    pub fn brownian_scale(&self) -> f64 {
        self.brownian_scale
    }

    /// Evaluates every breakpoint row on `grid`.
    ///
    /// `breakpoints` has one row per subject and one column per entry of
    /// `times`. The result has the same number of rows and `grid.len()`
    /// columns. `rng` is only drawn from by stochastic kernels, row by row.
    pub fn build<R: Rng + ?Sized>(
        &self,
        breakpoints: &Matrix,
        times: &Vector,
        grid: &Grid,
        rng: &mut R,
    ) -> Result<Matrix, BuildSeriesError> {
        check_breakpoints(breakpoints, times)?;
        if self.method.is_stochastic()
            && !(self.brownian_scale.is_finite() && self.brownian_scale >= 0.)
        {
            return Err(BuildSeriesError::BrownianScale {
                scale: self.brownian_scale,
            });
        }

        let grid_times = grid.times();
        let time_points = times.to_vec();
        let mut out = Array2::zeros((breakpoints.nrows(), grid.len()));
        for (values, mut row) in breakpoints.as_array().rows().into_iter().zip(out.rows_mut()) {
            let interpolant = Interpolant::new(times.view(), values, self.method)?;
            for (slot, &t) in row.iter_mut().zip(grid_times.iter()) {
                *slot = interpolant.value_at(t)?;
            }
            if self.method.is_stochastic() {
                add_brownian_bridge(
                    row.view_mut(),
                    &time_points,
                    &grid_times,
                    self.brownian_scale,
                    rng,
                );
            }
        }
        log::debug!(
            "built {} series: {} rows x {} points (dt = {})",
            self.method,
            out.nrows(),
            out.ncols(),
            grid.dt()
        );
        Ok(Matrix::from(out))
    }
}

/// Adds a Brownian bridge to the grid points strictly inside each breakpoint
/// segment. The bridge is zero at both segment ends.
fn add_brownian_bridge<R: Rng + ?Sized>(
    mut row: ArrayViewMut1<'_, f64>,
    times: &[f64],
    grid_times: &Vector,
    scale: f64,
    rng: &mut R,
) {
    let grid_times = grid_times.as_array();
    for w in times.windows(2) {
        let (t0, t1) = (w[0], w[1]);
        let lo = grid_times.iter().take_while(|&&t| t <= t0).count();
        let hi = grid_times.iter().take_while(|&&t| t < t1).count();
        if lo >= hi {
            continue;
        }

        let mut walk = Vec::with_capacity(hi - lo);
        let mut position = 0.;
        let mut previous = t0;
        for &t in grid_times.slice(s![lo..hi]) {
            let z: f64 = rng.sample(StandardNormal);
            position += scale * (t - previous).sqrt() * z;
            walk.push(position);
            previous = t;
        }
        let z: f64 = rng.sample(StandardNormal);
        let end = position + scale * (t1 - previous).sqrt() * z;

        let width = t1 - t0;
        for (j, w) in (lo..hi).zip(walk) {
            let u = (grid_times[j] - t0) / width;
            row[j] += w - u * end;
        }
    }
}

/// Builds daily series for days `1..=max(times)` from a method name, drawing
/// stochastic kernels from the process-wide stream.
///
/// `times` must start at day 0 and contain no negative time. Day 0 itself is
/// not part of the result.
pub fn energy_builder(
    breakpoints: &Matrix,
    times: &Vector,
    method: &str,
) -> Result<Matrix, BuildSeriesError> {
    let method: Interpolation = method.parse()?;
    match times.get(0) {
        None => return Err(ShapeError::EmptyBreakpoints.into()),
        Some(time) if time != 0. => return Err(ShapeError::FirstTimeNotZero { time }.into()),
        Some(_) => {}
    }
    if let Some(index) = times.iter().position(|&t| t < 0.) {
        return Err(ShapeError::NegativeTime { index }.into());
    }
    let grid = Grid::spanning(times, 1.)?;
    let built =
        with_global_rng(|rng| SeriesBuilder::new(method).build(breakpoints, times, &grid, rng))?;
    Ok(built.as_array().slice(s![.., 1..]).to_owned().into())
}
