//! Split/merge centroidal Voronoi relaxation.
//!
//! Each iteration partitions the canvas among the current points, measures
//! the density mass of every cell, and replaces each point by zero (mass
//! too low), one (mass within bounds, moved to the centroid) or two (mass
//! too high, split along the cell's principal axis) points. The accepted
//! mass band widens every iteration so the split/merge churn dies out.

use std::f64::consts::PI;
use std::ops::ControlFlow;

use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::moments::accumulate;
use crate::point::positions;
use crate::{
    ConstantPolicy, DensityField, PartitionBackend, Point, Position, Renderer, Result, Rgb,
    StippleError, StipplePolicy, VoronoiCell,
};

/// Relaxation parameters, fixed for the lifetime of an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// Initial number of random seeds
    pub count: usize,
    /// Half-width of the uniform noise added to split children (normalized units)
    pub jitter: f64,
    /// Hysteresis growth per iteration
    pub h_step: f64,
    /// Hysteresis at iteration 0
    pub h_const: f64,
    /// Nominal stipple radius in pixels
    pub point_size: f32,
    pub max_iterations: usize,
    pub max_points: usize,
    pub background: Rgb,
    pub point_color: Rgb,
    /// Scale on the target mass of a stipple
    pub multiplier: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            count: 10,
            jitter: 0.001,
            h_step: 0.1,
            h_const: 0.4,
            point_size: 2.0,
            max_iterations: 100,
            max_points: 2000,
            background: [255, 255, 255],
            point_color: [0, 0, 0],
            multiplier: 1.0,
        }
    }
}

/// Outcome of comparing a cell's mass against the hysteresis band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Delete,
    Keep,
    Split,
}

impl Params {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StippleError::InvalidInput(msg));
        if self.count == 0 {
            return invalid("seed count must be positive".into());
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be positive".into());
        }
        if !(self.jitter.is_finite() && self.jitter >= 0.0) {
            return invalid(format!("jitter must be finite and non-negative, got {}", self.jitter));
        }
        if !(self.point_size.is_finite() && self.point_size > 0.0) {
            return invalid(format!("point size must be positive, got {}", self.point_size));
        }
        if !(self.multiplier.is_finite() && self.multiplier > 0.0) {
            return invalid(format!("multiplier must be positive, got {}", self.multiplier));
        }
        if !(self.h_const.is_finite() && self.h_step.is_finite()) {
            return invalid("hysteresis schedule must be finite".into());
        }
        Ok(())
    }

    /// Hysteresis after `iterations` completed iterations
    pub fn hysteresis(&self, iterations: usize) -> f64 {
        self.h_const + iterations as f64 * self.h_step
    }

    /// Mass a cell should hold for a stipple of radius `size`
    pub fn target_mass(&self, size: f32) -> f64 {
        PI * size as f64 * size as f64 * self.multiplier
    }

    pub fn lower_split_bound(&self, size: f32, hysteresis: f64) -> f64 {
        (1.0 - hysteresis / 2.0) * self.target_mass(size)
    }

    pub fn upper_split_bound(&self, size: f32, hysteresis: f64) -> f64 {
        (1.0 + hysteresis / 2.0) * self.target_mass(size)
    }

    pub fn decide(&self, cell: &VoronoiCell, size: f32, hysteresis: f64) -> Decision {
        if cell.is_degenerate() || cell.m00 < self.lower_split_bound(size, hysteresis) {
            Decision::Delete
        } else if cell.m00 < self.upper_split_bound(size, hysteresis) {
            Decision::Keep
        } else {
            Decision::Split
        }
    }

    /// The fixed size/color policy these parameters describe
    pub fn policy(&self) -> ConstantPolicy {
        ConstantPolicy::new(self.point_size, self.point_color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    IterationLimit,
    PointLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No points yet
    Seeding,
    Iterating,
    /// An iteration added and removed nothing
    Converged,
    Failed(FailureReason),
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineState::Converged | EngineState::Failed(_))
    }
}

/// Summary of one iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub iteration: usize,
    pub changes: usize,
    pub points: usize,
    pub hysteresis: f64,
    pub state: EngineState,
}

/// Final (or last, if interrupted) point set of a run
#[derive(Debug, Clone)]
pub struct Solution {
    pub state: EngineState,
    pub iterations: usize,
    pub points: Vec<Point>,
}

impl Solution {
    pub fn is_converged(&self) -> bool {
        self.state == EngineState::Converged
    }

    /// Treat anything but convergence as an error
    pub fn into_result(self) -> Result<Vec<Point>> {
        if self.is_converged() {
            Ok(self.points)
        } else {
            Err(StippleError::ConvergenceFailure {
                iterations: self.iterations,
                points: self.points.len(),
            })
        }
    }
}

/// Drives the relaxation for one density field.
///
/// The partition backend and size/color policy are injected; randomness
/// (seeding and split jitter) comes from an owned, seedable RNG.
pub struct StippleEngine<B, P = ConstantPolicy> {
    density: DensityField,
    params: Params,
    backend: B,
    policy: P,
    rng: ChaCha8Rng,
    points: Vec<Point>,
    iterations: usize,
    changes: Option<usize>,
    state: EngineState,
}

impl<B: PartitionBackend> StippleEngine<B, ConstantPolicy> {
    pub fn new(density: DensityField, params: Params, backend: B, rng: ChaCha8Rng) -> Result<Self> {
        params.validate()?;
        let policy = params.policy();
        Ok(Self {
            density,
            params,
            backend,
            policy,
            rng,
            points: Vec::new(),
            iterations: 0,
            changes: None,
            state: EngineState::Seeding,
        })
    }

    /// Construct with a ChaCha8 RNG seeded from `seed`
    pub fn with_seed(density: DensityField, params: Params, backend: B, seed: u64) -> Result<Self> {
        Self::new(density, params, backend, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<B: PartitionBackend, P: StipplePolicy> StippleEngine<B, P> {
    /// Replace the size/color policy
    pub fn with_policy<Q: StipplePolicy>(self, policy: Q) -> StippleEngine<B, Q> {
        StippleEngine {
            density: self.density,
            params: self.params,
            backend: self.backend,
            policy,
            rng: self.rng,
            points: self.points,
            iterations: self.iterations,
            changes: self.changes,
            state: self.state,
        }
    }

    /// Draw `params.count` uniform random seeds, restarting the run
    pub fn seed(&mut self) {
        let points = (0..self.params.count)
            .map(|_| Point::seed(Position::new(self.rng.gen::<f64>(), self.rng.gen::<f64>())))
            .collect();
        self.restart(points);
    }

    /// Start from explicit positions (clamped into the unit square),
    /// restarting the run
    pub fn seed_with(&mut self, seeds: &[Position]) -> Result<()> {
        if seeds.is_empty() {
            return Err(StippleError::InvalidInput("seed list is empty".into()));
        }
        self.restart(seeds.iter().map(|&p| Point::seed(p.clamped())).collect());
        Ok(())
    }

    fn restart(&mut self, points: Vec<Point>) {
        self.points = points;
        self.iterations = 0;
        self.changes = None;
        self.state = EngineState::Iterating;
    }

    /// Run one iteration. Seeds randomly first if nothing was seeded;
    /// a no-op once the run has terminated.
    pub fn step(&mut self) -> Result<StepReport> {
        match self.state {
            EngineState::Seeding => self.seed(),
            EngineState::Converged | EngineState::Failed(_) => {
                return Ok(self.report(self.params.hysteresis(self.iterations)));
            }
            EngineState::Iterating => {}
        }

        let hysteresis = self.params.hysteresis(self.iterations);
        let (next, changes) = if self.points.is_empty() {
            (Vec::new(), 0)
        } else {
            let seeds = positions(&self.points);
            let (width, height) = self.density.dimensions();
            let raster = self.backend.partition(&seeds, width, height)?;
            let cells = accumulate(&raster, &self.density, seeds.len())?;
            self.relax(&cells, hysteresis)
        };

        self.points = next;
        self.iterations += 1;
        self.changes = Some(changes);
        self.state = self.next_state(changes);

        debug!(
            "iteration {}: {} changes, {} stipples, hysteresis {:.3}",
            self.iterations,
            changes,
            self.points.len(),
            hysteresis
        );
        match self.state {
            EngineState::Converged => info!(
                "converged after {} iterations with {} stipples",
                self.iterations,
                self.points.len()
            ),
            EngineState::Failed(reason) => warn!(
                "stopped after {} iterations with {} stipples: {:?}",
                self.iterations,
                self.points.len(),
                reason
            ),
            _ => {}
        }

        Ok(self.report(hysteresis))
    }

    /// Iterate until converged or failed
    pub fn solve(&mut self) -> Result<Solution> {
        self.solve_with(|_| ControlFlow::Continue(()))
    }

    /// Iterate until converged, failed, or `on_step` breaks
    pub fn solve_with<F>(&mut self, mut on_step: F) -> Result<Solution>
    where
        F: FnMut(&StepReport) -> ControlFlow<()>,
    {
        while !self.state.is_terminal() {
            let report = self.step()?;
            if on_step(&report).is_break() {
                break;
            }
        }
        Ok(self.solution())
    }

    /// Emit the next point set from this iteration's cells. Returns the
    /// points and the number of cells that were deleted or split.
    fn relax(&mut self, cells: &[VoronoiCell], hysteresis: f64) -> (Vec<Point>, usize) {
        let mut next = Vec::with_capacity(cells.len() + cells.len() / 5);
        let mut changes = 0;

        for cell in cells {
            let size = self.policy.size(cell);
            let color = self.policy.color(cell);

            match self.params.decide(cell, size, hysteresis) {
                Decision::Delete => changes += 1,
                Decision::Keep => {
                    if let Some(centroid) = cell.centroid() {
                        next.push(Point::new(centroid.clamped(), size, color));
                    }
                }
                Decision::Split => {
                    if let (Some(centroid), Some(axis)) = (cell.centroid(), cell.split_axis()) {
                        let a = self.jitter(centroid + axis).clamped();
                        let b = self.jitter(centroid - axis).clamped();
                        next.push(Point::new(a, size, color));
                        next.push(Point::new(b, size, color));
                        changes += 1;
                    }
                }
            }
        }

        (next, changes)
    }

    fn jitter(&mut self, pos: Position) -> Position {
        let j = self.params.jitter;
        if j == 0.0 {
            return pos;
        }
        Position::new(
            pos.x + self.rng.gen_range(-j..=j),
            pos.y + self.rng.gen_range(-j..=j),
        )
    }

    fn next_state(&self, changes: usize) -> EngineState {
        if changes == 0 {
            EngineState::Converged
        } else if self.iterations >= self.params.max_iterations {
            EngineState::Failed(FailureReason::IterationLimit)
        } else if self.points.len() > self.params.max_points {
            EngineState::Failed(FailureReason::PointLimit)
        } else {
            EngineState::Iterating
        }
    }

    fn report(&self, hysteresis: f64) -> StepReport {
        StepReport {
            iteration: self.iterations,
            changes: self.changes.unwrap_or(0),
            points: self.points.len(),
            hysteresis,
            state: self.state,
        }
    }

    pub fn solution(&self) -> Solution {
        Solution {
            state: self.state,
            iterations: self.iterations,
            points: self.points.clone(),
        }
    }

    /// Render the current points at the density field's resolution
    pub fn render<R: Renderer + ?Sized>(&self, renderer: &mut R) -> image::RgbImage {
        let (width, height) = self.density.dimensions();
        self.render_at(renderer, width, height)
    }

    /// Render the current points onto a `width` x `height` canvas
    pub fn render_at<R: Renderer + ?Sized>(
        &self,
        renderer: &mut R,
        width: u32,
        height: u32,
    ) -> image::RgbImage {
        renderer.render(&self.points, width, height, self.params.background)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Changes in the last iteration, `None` before the first
    pub fn changes(&self) -> Option<usize> {
        self.changes
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn density(&self) -> &DensityField {
        &self.density
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::{BruteForceBackend, GridBackend, LabelRaster};

    fn black(width: u32, height: u32) -> DensityField {
        DensityField::from_fn(width, height, |_, _| 0).unwrap()
    }

    /// Counts partition calls while delegating to the brute-force scan
    struct CountingBackend {
        calls: usize,
        inner: BruteForceBackend,
    }

    impl PartitionBackend for CountingBackend {
        fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster> {
            self.calls += 1;
            self.inner.partition(seeds, width, height)
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[test]
    fn test_hysteresis_schedule() {
        let params = Params { h_const: 0.4, h_step: 0.1, ..Default::default() };
        assert_relative_eq!(params.hysteresis(0), 0.4);
        assert_relative_eq!(params.hysteresis(6), 1.0);
    }

    #[test]
    fn test_split_bounds_widen_with_hysteresis() {
        let params = Params::default();
        for size in [0.5f32, 2.0, 7.0] {
            for (h1, h2) in [(0.5, 0.4), (1.3, 0.2), (4.0, 3.9)] {
                assert!(params.upper_split_bound(size, h1) > params.upper_split_bound(size, h2));
                assert!(params.lower_split_bound(size, h1) < params.lower_split_bound(size, h2));
            }
        }
        let target = params.target_mass(2.0);
        assert_relative_eq!(target, 4.0 * PI);
        assert_relative_eq!(params.upper_split_bound(2.0, 0.4), 1.2 * target);
        assert_relative_eq!(params.lower_split_bound(2.0, 0.4), 0.8 * target);
    }

    #[test]
    fn test_decide() {
        let params = Params::default();
        let raster = LabelRaster::new(vec![0; 100], 10, 10);
        let cells = accumulate(&raster, &black(10, 10), 2).unwrap();
        let size_for = |mass: f64| (mass / PI).sqrt() as f32;

        // cell 0 holds mass 100; cell 1 owns no pixels
        assert_eq!(params.decide(&cells[0], size_for(200.0), 0.4), Decision::Delete);
        assert_eq!(params.decide(&cells[0], size_for(100.0), 0.4), Decision::Keep);
        assert_eq!(params.decide(&cells[0], size_for(50.0), 0.4), Decision::Split);
        assert_eq!(params.decide(&cells[1], size_for(1.0), 0.4), Decision::Delete);
    }

    #[test]
    fn test_invalid_params() {
        let density = black(8, 8);
        for params in [
            Params { count: 0, ..Default::default() },
            Params { jitter: -1.0, ..Default::default() },
            Params { point_size: 0.0, ..Default::default() },
            Params { max_iterations: 0, ..Default::default() },
        ] {
            assert!(matches!(
                StippleEngine::with_seed(density.clone(), params, BruteForceBackend::new(), 0),
                Err(StippleError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_seeding() {
        let params = Params { count: 50, ..Default::default() };
        let mut engine =
            StippleEngine::with_seed(black(16, 16), params, BruteForceBackend::new(), 7).unwrap();
        assert_eq!(engine.state(), EngineState::Seeding);

        engine.seed();
        assert_eq!(engine.state(), EngineState::Iterating);
        assert_eq!(engine.points().len(), 50);
        assert!(engine.points().iter().all(|p| p.pos.is_normalized()));
        assert_eq!(engine.changes(), None);
    }

    #[test]
    fn test_seed_with_clamps() {
        let mut engine = StippleEngine::with_seed(
            black(16, 16),
            Params::default(),
            BruteForceBackend::new(),
            0,
        )
        .unwrap();
        engine.seed_with(&[Position::new(-0.5, 2.0)]).unwrap();
        assert_eq!(engine.points()[0].pos, Position::new(0.0, 1.0));
        assert!(engine.seed_with(&[]).is_err());
    }

    #[test]
    fn test_balanced_seeds_converge_immediately() {
        let size = (2500.0 / PI).sqrt() as f32;
        let params = Params { count: 4, point_size: size, ..Default::default() };
        let mut engine =
            StippleEngine::with_seed(black(100, 100), params, BruteForceBackend::new(), 1).unwrap();
        engine
            .seed_with(&[
                Position::new(0.25, 0.25),
                Position::new(0.75, 0.25),
                Position::new(0.25, 0.75),
                Position::new(0.75, 0.75),
            ])
            .unwrap();

        let report = engine.step().unwrap();
        assert_eq!(report.changes, 0);
        assert_eq!(report.state, EngineState::Converged);
        assert_eq!(engine.points().len(), 4);
        assert_relative_eq!(engine.points()[3].pos.x, 0.75, epsilon = 1e-12);
        assert_relative_eq!(engine.points()[3].pos.y, 0.75, epsilon = 1e-12);
        assert!(engine.points().iter().all(|p| p.size == size && p.color == [0, 0, 0]));

        // terminal: further steps do nothing
        let again = engine.step().unwrap();
        assert_eq!(again.iteration, 1);
    }

    #[test]
    fn test_split_child_clamped_to_corner() {
        // all mass in the top-left pixel; the cell splits along the diagonal
        let density = DensityField::from_fn(10, 10, |x, y| if x == 0 && y == 0 { 0 } else { 255 })
            .unwrap();
        let params = Params { count: 1, point_size: 0.3, jitter: 0.0, ..Default::default() };
        let mut engine =
            StippleEngine::with_seed(density, params, BruteForceBackend::new(), 0).unwrap();
        engine.seed_with(&[Position::new(0.5, 0.5)]).unwrap();

        let report = engine.step().unwrap();
        assert_eq!(report.changes, 1);
        assert_eq!(engine.points().len(), 2);
        assert_eq!(engine.points()[1].pos, Position::new(0.0, 0.0));
        assert!(engine.points()[0].pos.x > 0.1 && engine.points()[0].pos.y > 0.1);
    }

    #[test]
    fn test_white_image_deletes_everything() {
        let white = DensityField::from_fn(50, 50, |_, _| 255).unwrap();
        let params = Params { count: 20, max_points: 10, ..Default::default() };
        let mut engine = StippleEngine::with_seed(white, params, GridBackend::new(), 3).unwrap();

        let solution = engine.solve().unwrap();
        assert!(solution.state.is_terminal());
        assert!(solution.points.is_empty());
        assert_eq!(solution.state, EngineState::Converged);
        assert_eq!(solution.iterations, 2);
    }

    #[test]
    fn test_point_limit_keeps_last_points() {
        let params = Params {
            count: 4,
            point_size: 1.0,
            max_points: 16,
            ..Default::default()
        };
        let mut engine =
            StippleEngine::with_seed(black(64, 64), params, GridBackend::new(), 11).unwrap();

        let solution = engine.solve().unwrap();
        assert_eq!(solution.state, EngineState::Failed(FailureReason::PointLimit));
        assert!(solution.points.len() > 16);
        assert!(solution.points.iter().all(|p| p.pos.is_normalized()));
        assert!(matches!(
            solution.into_result(),
            Err(StippleError::ConvergenceFailure { .. })
        ));
    }

    #[test]
    fn test_iteration_limit() {
        let params = Params {
            count: 4,
            point_size: 1.0,
            max_iterations: 2,
            ..Default::default()
        };
        let mut engine =
            StippleEngine::with_seed(black(64, 64), params, GridBackend::new(), 11).unwrap();

        let solution = engine.solve().unwrap();
        assert_eq!(solution.state, EngineState::Failed(FailureReason::IterationLimit));
        assert_eq!(solution.iterations, 2);
    }

    #[test]
    fn test_backend_injected_by_reference() {
        let mut backend = CountingBackend { calls: 0, inner: BruteForceBackend::new() };
        let params = Params { count: 4, point_size: 1.0, max_iterations: 3, ..Default::default() };
        {
            let mut engine = StippleEngine::with_seed(black(32, 32), params, &mut backend, 5).unwrap();
            engine.solve().unwrap();
            assert_eq!(engine.iterations(), 3);
            assert_eq!(engine.backend().calls, 3);
            assert_eq!(engine.density().dimensions(), (32, 32));
        }
        assert_eq!(backend.calls, 3);
    }

    #[test]
    fn test_solve_with_stops_early() {
        let params = Params { count: 4, point_size: 1.0, ..Default::default() };
        let mut engine =
            StippleEngine::with_seed(black(32, 32), params, GridBackend::new(), 5).unwrap();
        let solution = engine
            .solve_with(|report| {
                if report.iteration >= 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(solution.iterations, 2);
        assert_eq!(solution.state, EngineState::Iterating);
    }

    #[test]
    fn test_same_seed_same_points() {
        let run = |seed: u64| {
            let params = Params { count: 8, point_size: 1.5, max_iterations: 5, ..Default::default() };
            let density = DensityField::from_fn(48, 32, |x, _| (x * 5) as u8).unwrap();
            let mut engine =
                StippleEngine::with_seed(density, params, GridBackend::new(), seed).unwrap();
            engine.solve().unwrap().points
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_custom_policy() {
        struct Red;
        impl StipplePolicy for Red {
            fn size(&self, _cell: &VoronoiCell) -> f32 {
                (2500.0 / PI).sqrt() as f32
            }
            fn color(&self, _cell: &VoronoiCell) -> Rgb {
                [255, 0, 0]
            }
        }

        let params = Params { count: 1, ..Default::default() };
        let mut engine = StippleEngine::with_seed(black(50, 50), params, BruteForceBackend::new(), 0)
            .unwrap()
            .with_policy(Red);
        engine.seed_with(&[Position::new(0.1, 0.9)]).unwrap();
        engine.step().unwrap();

        assert_eq!(engine.state(), EngineState::Converged);
        assert_eq!(engine.points()[0].color, [255, 0, 0]);
        assert_relative_eq!(engine.points()[0].pos.x, 0.5, epsilon = 1e-12);
    }
}
