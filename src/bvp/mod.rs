//! The TT-to-FT boundary-value problem.
//!
//! From the averaged statistics of a truncated run, derives the mean
//! temperature and density structure of the full run and the factors that
//! rescale the truncated state onto it. The steady state solved for is
//!
//! ```text
//! (T0 + T1) dz(ln_rho1) = -dz(T1) - T1 dz(ln_rho0) + (dS/dS_TT) UdotGradw
//! dz(M1)                = rho0 (exp(ln_rho1) - 1)
//! S/Cp                  = (1/ɣ) ln(T0 + T1) - ((ɣ-1)/ɣ) (ln_rho0 + ln_rho1)
//! dS                    = S(Lz) - S(0)
//! M1(0) = M1(Lz)        = 0
//! ```
//!
//! with `T1` the rescaled FT temperature perturbation, discretised by
//! Chebyshev collocation. Each first-order equation gives up its top
//! collocation row to one of the mass-flux boundary conditions.


use {
    crate::{
        atmosphere::{AtmosphereParameters, BackgroundFields},
        domain::Chebyshev,
        error::{Error, Result},
        newton::{NewtonSettings, NewtonSolver, NonlinearProblem},
        statistics::{ProfileSet, ScalarSet},
    },
    log::info,
    nalgebra::{DMatrix, DVector},
    ndarray::{Array1, Array2},
    serde::{Deserialize, Serialize},
};

/// Steady-state problem for `dS`, `S`, `ln_rho1` and `M1` on one column
#[derive(Debug, Clone)]
pub struct TtToFtBvp {
    n: usize,
    cp: f64,
    gamma: f64,
    derivative: Array2<f64>,

    rho0: Array1<f64>,
    ln_rho0: Array1<f64>,
    ln_rho0_z: Array1<f64>,
    t1_ft: Array1<f64>,
    t1_ft_z: Array1<f64>,
    // T0 + T1_FT and its logarithm
    total_t: Array1<f64>,
    ln_total_t: Array1<f64>,
    u_dot_grad_w: Array1<f64>,
    ds_tt: f64,
}

/// Converged state of a [`TtToFtBvp`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BvpSolution {
    pub ds: f64,
    pub s: Array1<f64>,
    pub ln_rho1: Array1<f64>,
    pub m1: Array1<f64>,
    pub iterations: usize,
}

impl TtToFtBvp {
    /// * `t1_ft` - FT temperature perturbation on the column grid
    /// * `u_dot_grad_w` - averaged TT `UdotGradw` profile
    /// * `ds_tt` - TT entropy jump (`Cp` included)
    pub fn new(
        background: &BackgroundFields,
        column: &Chebyshev,
        t1_ft: Array1<f64>,
        u_dot_grad_w: Array1<f64>,
        ds_tt: f64,
    ) -> Result<Self> {
        let n = column.size();

        for (name, len) in &[
            ("T0", background.t0.len()),
            ("T1_FT", t1_ft.len()),
            ("UdotGradw", u_dot_grad_w.len()),
        ] {
            if *len != n {
                return Err(Error::Layout(format!(
                    "{} has {} points, column has {}",
                    name, len, n
                )));
            }
        }

        nonzero("TT entropy jump", ds_tt)?;

        let total_t = &background.t0 + &t1_ft;
        if total_t.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(Error::Configuration(
                "rescaled temperature T0 + T1_FT is not positive everywhere".into(),
            ));
        }

        Ok(TtToFtBvp {
            n,
            cp: background.gas.cp,
            gamma: background.gas.gamma,
            derivative: column.derivative_matrix().to_owned(),
            rho0: background.rho0.clone(),
            ln_rho0: background.ln_rho0.clone(),
            ln_rho0_z: background.ln_rho0_z.clone(),
            t1_ft_z: column.differentiate(t1_ft.view())?,
            t1_ft,
            ln_total_t: total_t.mapv(f64::ln),
            total_t,
            u_dot_grad_w,
            ds_tt,
        })
    }

    // Unknowns are laid out as [dS, S(0..n), ln_rho1(0..n), M1(0..n)]
    const DS: usize = 0;

    fn s(&self, i: usize) -> usize {
        1 + i
    }

    fn ln_rho1(&self, i: usize) -> usize {
        1 + self.n + i
    }

    fn m1(&self, i: usize) -> usize {
        1 + 2 * self.n + i
    }

    fn dz(&self, x: &DVector<f64>, i: usize, column: impl Fn(usize) -> usize) -> f64 {
        (0..self.n)
            .map(|j| self.derivative[[i, j]] * x[column(j)])
            .sum()
    }

    pub fn solve(&self, settings: NewtonSettings) -> Result<BvpSolution> {
        let mut solver = NewtonSolver::new(self, settings);
        let iterations = solver.solve()?;

        let x = &solver.state;
        let n = self.n;

        Ok(BvpSolution {
            ds: x[Self::DS],
            s: Array1::from_shape_fn(n, |i| x[self.s(i)]),
            ln_rho1: Array1::from_shape_fn(n, |i| x[self.ln_rho1(i)]),
            m1: Array1::from_shape_fn(n, |i| x[self.m1(i)]),
            iterations,
        })
    }
}

impl NonlinearProblem for TtToFtBvp {
    fn size(&self) -> usize {
        3 * self.n + 1
    }

    fn residual(&self, x: &DVector<f64>) -> DVector<f64> {
        let n = self.n;
        let heat = (self.gamma - 1.0) / self.gamma;
        let mut f = DVector::zeros(self.size());

        f[Self::DS] = x[Self::DS] - (x[self.s(n - 1)] - x[self.s(0)]);

        for i in 0..n {
            f[self.s(i)] = x[self.s(i)] / self.cp - self.ln_total_t[i] / self.gamma
                + heat * (self.ln_rho0[i] + x[self.ln_rho1(i)]);
        }

        for i in 0..n - 1 {
            f[self.ln_rho1(i)] = self.total_t[i] * self.dz(x, i, |j| self.ln_rho1(j))
                + self.t1_ft_z[i]
                + self.t1_ft[i] * self.ln_rho0_z[i]
                - (x[Self::DS] / self.ds_tt) * self.u_dot_grad_w[i];

            f[self.m1(i)] = self.dz(x, i, |j| self.m1(j))
                - self.rho0[i] * (x[self.ln_rho1(i)].exp() - 1.0);
        }

        // Boundary conditions take the dropped top rows
        f[self.ln_rho1(n - 1)] = x[self.m1(0)];
        f[self.m1(n - 1)] = x[self.m1(n - 1)];

        f
    }

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n = self.n;
        let heat = (self.gamma - 1.0) / self.gamma;
        let mut jac = DMatrix::zeros(self.size(), self.size());

        jac[(Self::DS, Self::DS)] = 1.0;
        jac[(Self::DS, self.s(n - 1))] = -1.0;
        jac[(Self::DS, self.s(0))] = 1.0;

        for i in 0..n {
            jac[(self.s(i), self.s(i))] = 1.0 / self.cp;
            jac[(self.s(i), self.ln_rho1(i))] = heat;
        }

        for i in 0..n - 1 {
            let row = self.ln_rho1(i);
            for j in 0..n {
                jac[(row, self.ln_rho1(j))] = self.total_t[i] * self.derivative[[i, j]];
            }
            jac[(row, Self::DS)] = -self.u_dot_grad_w[i] / self.ds_tt;

            let row = self.m1(i);
            for j in 0..n {
                jac[(row, self.m1(j))] = self.derivative[[i, j]];
            }
            jac[(row, self.ln_rho1(i))] = -self.rho0[i] * x[self.ln_rho1(i)].exp();
        }

        jac[(self.ln_rho1(n - 1), self.m1(0))] = 1.0;
        jac[(self.m1(n - 1), self.m1(n - 1))] = 1.0;

        jac
    }
}

/// Everything the TT-to-FT transition needs from the BVP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub t1_ft: Array1<f64>,
    pub ln_rho1_ft: Array1<f64>,
    /// `dS_FT / dS_TT`
    pub ds_factor: f64,
    /// `dT_ad_FT / dT_ad_TT`
    pub dt_ad_factor: f64,
    pub ft_ra_factor: f64,
    pub diagnostics: StructureDiagnostics,
}

/// Intermediate jumps, kept for logging and inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureDiagnostics {
    /// Superadiabatic temperature jump of the TT run
    pub dt_ad_tt: f64,
    pub dt_ad_ft: f64,
    /// Entropy jump of the background
    pub ds0: f64,
    pub ds_tt: f64,
    pub ds_ft: f64,
    pub evolved_ra_factor: f64,
    pub iterations: usize,
}

/// FT temperature perturbation: the TT superadiabatic deviation rescaled from
/// `dt_ad_tt` to `dt_ad_ft`.
///
/// The reference adiabat passes through unit temperature at the top boundary,
/// `T_ad = 1 + grad_ad (z - Lz)`.
pub fn rescaled_temperature(
    background: &BackgroundFields,
    t1_tt: &Array1<f64>,
    dt_ad_tt: f64,
    dt_ad_ft: f64,
) -> Array1<f64> {
    let grad_ad = -background.g / background.gas.cp;
    let t_ad = background.z.mapv(|z| 1.0 + grad_ad * (z - background.height));
    let t_tt = &background.t0 + t1_tt;

    (dt_ad_ft / dt_ad_tt) * (&t_tt - &t_ad) + &t_ad - &background.t0
}

/// Rejects a zero or non-finite quantity about to be divided by
pub(crate) fn nonzero(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value == 0.0 {
        return Err(Error::Configuration(format!(
            "{} must be finite and non-zero, got {}",
            name, value
        )));
    }
    Ok(value)
}

/// Solves for the FT structure from TT statistics.
///
/// * `atmosphere` - parameters of the run's atmosphere, instantiated afresh
/// * `profiles` - averaged `T1` and `UdotGradw`
/// * `scalars` - averaged `Nu` and the entropy jump `s_over_cp_z` (already
///   multiplied by the depth)
pub fn structure_bvp(
    atmosphere: &AtmosphereParameters,
    profiles: &ProfileSet,
    scalars: &ScalarSet,
    settings: NewtonSettings,
) -> Result<Structure> {
    let nu = *scalars.get("Nu")?;
    let ds_over_cp_tt = *scalars.get("s_over_cp_z")?;
    let t1_tt = profiles.get("T1")?;
    let u_dot_grad_w = profiles.get("UdotGradw")?;

    nonzero("Nusselt number", nu)?;
    if u_dot_grad_w.len() != t1_tt.len() {
        return Err(Error::Layout(format!(
            "T1 has {} points but UdotGradw has {}",
            t1_tt.len(),
            u_dot_grad_w.len()
        )));
    }

    let atmosphere = atmosphere.build()?;
    let lz = atmosphere.height();
    let column = Chebyshev::new(t1_tt.len(), (0.0, lz))?;
    let background = atmosphere.build_atmosphere(&column, None)?;
    let cp = background.gas.cp;

    let ds_tt = ds_over_cp_tt * cp;

    // Superadiabatic temperature jumps
    let grad_ad = -background.g / cp;
    let t_tt = &background.t0 + t1_tt;
    let dt_ad_tt = (column.right(t_tt.view())? - column.left(t_tt.view())?).abs()
        - (grad_ad * lz).abs();
    nonzero("TT superadiabatic temperature jump", dt_ad_tt)?;
    let dt_ad_ft = dt_ad_tt / nu;

    let t1_ft = rescaled_temperature(&background, t1_tt, dt_ad_tt, dt_ad_ft);

    let s0 = cp * &background.s0_over_cp;
    let ds0 = column.right(s0.view())? - column.left(s0.view())?;
    nonzero("background entropy jump", ds0)?;
    let evolved_ra_factor = ds_tt / ds0;

    info!(
        "TT: Nu = {}, dS = {}, dT_ad = {}; background dS0 = {}",
        nu, ds_tt, dt_ad_tt, ds0
    );

    let problem = TtToFtBvp::new(
        &background,
        &column,
        t1_ft.clone(),
        u_dot_grad_w.clone(),
        ds_tt,
    )?;
    let solution = problem.solve(settings)?;

    let ds_ft = nonzero("FT entropy jump", solution.ds)?;
    let ft_ra_factor = (ds0 / ds_ft) * evolved_ra_factor;

    info!(
        "FT: dS = {}, dT_ad = {}, Ra factor = {} after {} Newton iterations",
        ds_ft, dt_ad_ft, ft_ra_factor, solution.iterations
    );

    Ok(Structure {
        t1_ft,
        ln_rho1_ft: solution.ln_rho1,
        ds_factor: ds_ft / ds_tt,
        dt_ad_factor: dt_ad_ft / dt_ad_tt,
        ft_ra_factor,
        diagnostics: StructureDiagnostics {
            dt_ad_tt,
            dt_ad_ft,
            ds0,
            ds_tt,
            ds_ft,
            evolved_ra_factor,
            iterations: solution.iterations,
        },
    })
}
