//! Newton iteration for nonlinear boundary-value problems.

use {
    crate::error::{Error, Result},
    log::debug,
    nalgebra::{DMatrix, DVector},
    serde::{Deserialize, Serialize},
};

/// A discretised nonlinear system `F(x) = 0`
pub trait NonlinearProblem {
    /// Number of unknowns (and equations)
    fn size(&self) -> usize;

    fn residual(&self, x: &DVector<f64>) -> DVector<f64>;

    /// `dF/dx` evaluated at `x`
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings {
    /// Iteration stops once the summed magnitude of the last update is below this
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        NewtonSettings {
            tolerance: 1.0E-10,
            max_iterations: 50,
        }
    }
}

pub struct NewtonSolver<'a, P: NonlinearProblem> {
    problem: &'a P,
    settings: NewtonSettings,

    pub state: DVector<f64>,
    /// Update applied by the most recent iteration
    pub perturbations: DVector<f64>,
    pub iteration: usize,
}

impl<'a, P: NonlinearProblem> NewtonSolver<'a, P> {
    /// Solver starting from the zero state
    pub fn new(problem: &'a P, settings: NewtonSettings) -> Self {
        let n = problem.size();
        Self::with_state(problem, settings, DVector::zeros(n))
    }

    pub fn with_state(problem: &'a P, settings: NewtonSettings, state: DVector<f64>) -> Self {
        let n = state.len();

        NewtonSolver {
            problem,
            settings,
            state,
            // Larger than the tolerance so the first iteration always runs
            perturbations: DVector::from_element(n, 1.0 + settings.tolerance),
            iteration: 0,
        }
    }

    pub fn perturbation_norm(&self) -> f64 {
        self.perturbations.iter().map(|x| x.abs()).sum()
    }

    pub fn converged(&self) -> bool {
        self.perturbation_norm() <= self.settings.tolerance
    }

    /// Applies one Newton update `x += δ` with `J(x) δ = -F(x)`
    pub fn newton_iteration(&mut self) -> Result<()> {
        let residual = self.problem.residual(&self.state);
        let jacobian = self.problem.jacobian(&self.state);

        let update = jacobian
            .lu()
            .solve(&(-residual))
            .ok_or_else(|| self.failure("singular Jacobian"))?;

        if update.iter().any(|x| !x.is_finite()) {
            return Err(self.failure("non-finite update"));
        }

        self.state += &update;
        self.perturbations = update;
        self.iteration += 1;

        Ok(())
    }

    /// Iterates until converged, returning the number of iterations taken
    pub fn solve(&mut self) -> Result<usize> {
        if self.problem.size() != self.state.len() {
            return Err(Error::Layout(format!(
                "problem has {} unknowns, state has {}",
                self.problem.size(),
                self.state.len()
            )));
        }

        while !self.converged() {
            if self.iteration >= self.settings.max_iterations {
                return Err(self.failure("iteration limit reached"));
            }

            self.newton_iteration()?;

            debug!(
                "Newton iteration {}: perturbation norm {:e}",
                self.iteration,
                self.perturbation_norm()
            );
        }

        Ok(self.iteration)
    }

    fn failure(&self, reason: &str) -> Error {
        Error::Convergence {
            iterations: self.iteration,
            norm: self.perturbation_norm(),
            reason: reason.to_owned(),
        }
    }
}
