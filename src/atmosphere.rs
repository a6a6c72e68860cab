//! Ideal-gas background atmospheres for stratified convection.
//!
//! Every atmosphere owns its parameters; derived quantities (`Cp`, `Cv`, the
//! polytropic index, gravity) are computed once at construction from the
//! independent ones and never change afterwards.

use {
    crate::{
        domain::Chebyshev,
        error::{Error, Result},
    },
    ndarray::Array1,
    serde::{Deserialize, Serialize},
    std::fmt::Debug,
};

/// Thermodynamics of an ideal gas, `P = R ρ T`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdealGas {
    /// Gas constant
    pub r: f64,
    /// Adiabatic index (5/3 monatomic, 7/5 diatomic)
    pub gamma: f64,
    /// Specific heat at constant pressure
    pub cp: f64,
    /// Specific heat at constant volume
    pub cv: f64,
}

impl IdealGas {
    pub fn new(r: f64, gamma: f64) -> Result<Self> {
        if !r.is_finite() || r <= 0.0 {
            return Err(Error::Configuration(format!(
                "gas constant must be positive, got {}",
                r
            )));
        }
        if !gamma.is_finite() || gamma <= 1.0 {
            return Err(Error::Configuration(format!(
                "adiabatic index must exceed 1, got {}",
                gamma
            )));
        }

        Ok(IdealGas {
            r,
            gamma,
            cp: r * gamma / (gamma - 1.0),
            cv: r / (gamma - 1.0),
        })
    }
}

/// Background quantities evaluated on a vertical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundFields {
    pub z: Array1<f64>,
    pub t0: Array1<f64>,
    pub t0_z: Array1<f64>,
    pub rho0: Array1<f64>,
    pub ln_rho0: Array1<f64>,
    pub ln_rho0_z: Array1<f64>,
    /// Background entropy over `Cp`
    pub s0_over_cp: Array1<f64>,
    /// Jump of `s0/Cp` across the domain (or the requested bounds)
    pub delta_s_over_cp: f64,

    pub gas: IdealGas,
    pub g: f64,
    pub height: f64,
}

pub trait Atmosphere: Debug + Send + Sync {
    fn gas(&self) -> &IdealGas;

    /// Domain depth `Lz`; the atmosphere spans `[0, Lz]`
    fn height(&self) -> f64;

    fn gravity(&self) -> f64;

    fn temperature(&self, z: f64) -> f64;

    fn density(&self, z: f64) -> f64;

    fn pressure(&self, z: f64) -> f64 {
        self.gas().r * self.density(z) * self.temperature(z)
    }

    /// Evaluates the background on `column`.
    ///
    /// `delta_s_bounds` selects the `(bottom, top)` heights between which the
    /// entropy jump is measured, defaulting to the full column.
    fn build_atmosphere(
        &self,
        column: &Chebyshev,
        delta_s_bounds: Option<(f64, f64)>,
    ) -> Result<BackgroundFields> {
        let gas = *self.gas();

        let t0 = column.profile(|z| self.temperature(z));
        let rho0 = column.profile(|z| self.density(z));

        if t0.iter().chain(rho0.iter()).any(|x| !x.is_finite() || *x <= 0.0) {
            return Err(Error::Configuration(
                "background temperature and density must be positive and finite".into(),
            ));
        }

        let ln_rho0 = rho0.mapv(f64::ln);
        let t0_z = column.differentiate(t0.view())?;
        let ln_rho0_z = column.differentiate(ln_rho0.view())?;

        let s0_over_cp = (1.0 / gas.gamma) * t0.mapv(f64::ln)
            - ((gas.gamma - 1.0) / gas.gamma) * &ln_rho0;

        let delta_s_over_cp = match delta_s_bounds {
            None => column.right(s0_over_cp.view())? - column.left(s0_over_cp.view())?,
            Some((bottom, top)) => {
                column.interpolate(s0_over_cp.view(), top)?
                    - column.interpolate(s0_over_cp.view(), bottom)?
            }
        };

        Ok(BackgroundFields {
            z: column.grid().to_owned(),
            t0,
            t0_z,
            rho0,
            ln_rho0,
            ln_rho0_z,
            s0_over_cp,
            delta_s_over_cp,
            gas,
            g: self.gravity(),
            height: self.height(),
        })
    }
}

/// Polytropic stratification.
///
/// ```text
/// T  = 1 + ∇T z
/// ∇T = (exp(-nρ/m) - 1) / Lz
/// ρ  = T^m
/// g  = -R (1 + m) ∇T
/// ```
///
/// with `m = 1/(ɣ-1) - ε`, so the atmosphere spans `nρ` density scale heights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polytrope {
    pub gas: IdealGas,
    /// Number of density scale heights
    pub n_rho: f64,
    /// Superadiabatic excess
    pub epsilon: f64,
    /// Adiabatic polytropic index
    pub m_ad: f64,
    pub m: f64,
    pub grad_t: f64,
    pub height: f64,
    pub g: f64,
}

impl Polytrope {
    pub fn new(n_rho: f64, epsilon: f64, gamma: f64, r: f64, height: f64) -> Result<Self> {
        let gas = IdealGas::new(r, gamma)?;

        if !n_rho.is_finite() || !epsilon.is_finite() {
            return Err(Error::Configuration(format!(
                "non-finite stratification (nρ = {}, ε = {})",
                n_rho, epsilon
            )));
        }
        if !height.is_finite() || height <= 0.0 {
            return Err(Error::Configuration(format!(
                "domain height must be positive, got {}",
                height
            )));
        }

        let m_ad = 1.0 / (gamma - 1.0);
        let m = m_ad - epsilon;
        if m <= 0.0 {
            return Err(Error::Configuration(format!(
                "polytropic index m = {} must be positive (m_ad = {}, ε = {})",
                m, m_ad, epsilon
            )));
        }

        let grad_t = ((-n_rho / m).exp() - 1.0) / height;
        let top = 1.0 + grad_t * height;
        if !grad_t.is_finite() || !(top > 0.0) {
            return Err(Error::Configuration(format!(
                "temperature gradient {} gives a non-physical stratification",
                grad_t
            )));
        }

        Ok(Polytrope {
            gas,
            n_rho,
            epsilon,
            m_ad,
            m,
            grad_t,
            height,
            g: -r * (1.0 + m) * grad_t,
        })
    }
}

impl Atmosphere for Polytrope {
    fn gas(&self) -> &IdealGas {
        &self.gas
    }

    fn height(&self) -> f64 {
        self.height
    }

    fn gravity(&self) -> f64 {
        self.g
    }

    fn temperature(&self, z: f64) -> f64 {
        1.0 + self.grad_t * z
    }

    fn density(&self, z: f64) -> f64 {
        self.temperature(z).powf(self.m)
    }
}

/// Constructor arguments for an atmosphere, as read from the parameters file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AtmosphereParameters {
    Polytrope {
        /// Number of density scale heights
        n_rho: f64,
        /// Superadiabatic excess
        epsilon: f64,
        /// Adiabatic index
        gamma: f64,
        gas_constant: f64,
        height: f64,
    },
}

impl Default for AtmosphereParameters {
    fn default() -> Self {
        AtmosphereParameters::Polytrope {
            n_rho: 3.0,
            epsilon: 0.5,
            gamma: 5.0 / 3.0,
            gas_constant: 1.0,
            height: 1.0,
        }
    }
}

impl AtmosphereParameters {
    /// Constructs a fresh, independently owned atmosphere
    pub fn build(&self) -> Result<Box<dyn Atmosphere>> {
        match *self {
            AtmosphereParameters::Polytrope {
                n_rho,
                epsilon,
                gamma,
                gas_constant,
                height,
            } => Ok(Box::new(Polytrope::new(
                n_rho,
                epsilon,
                gamma,
                gas_constant,
                height,
            )?)),
        }
    }

    pub fn height(&self) -> f64 {
        match *self {
            AtmosphereParameters::Polytrope { height, .. } => height,
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, approx::assert_abs_diff_eq};

    fn default_polytrope() -> Polytrope {
        Polytrope::new(3.0, 0.5, 5.0 / 3.0, 1.0, 1.0).unwrap()
    }

    #[test]
    fn default_polytrope_constants() {
        let atmosphere = default_polytrope();

        assert_abs_diff_eq!(atmosphere.m_ad, 1.5, epsilon = 1.0E-14);
        assert_abs_diff_eq!(atmosphere.m, 1.0, epsilon = 1.0E-14);
        assert_abs_diff_eq!(atmosphere.grad_t, (-3.0f64).exp() - 1.0, epsilon = 1.0E-14);

        let t1 = atmosphere.temperature(1.0);
        assert_abs_diff_eq!(t1, 1.0 + atmosphere.grad_t, epsilon = 1.0E-14);
        assert_abs_diff_eq!(atmosphere.density(1.0), t1, epsilon = 1.0E-14);

        assert_abs_diff_eq!(atmosphere.gas.cp, 2.5, epsilon = 1.0E-14);
        assert_abs_diff_eq!(atmosphere.gas.cv, 1.5, epsilon = 1.0E-14);
    }

    #[test]
    fn bottom_is_normalised() {
        for &(n_rho, epsilon, gamma) in &[(3.0, 0.5, 5.0 / 3.0), (1.0, 0.0, 1.4), (5.0, 1e-4, 5.0 / 3.0)] {
            let atmosphere = Polytrope::new(n_rho, epsilon, gamma, 1.0, 1.0).unwrap();
            assert_eq!(atmosphere.temperature(0.0), 1.0);
            assert_eq!(atmosphere.density(0.0), 1.0);
        }
    }

    #[test]
    fn density_is_power_of_affine_temperature() {
        let atmosphere = Polytrope::new(2.0, 0.1, 1.4, 1.0, 2.0).unwrap();

        for i in 0..=20 {
            let z = 2.0 * i as f64 / 20.0;
            let t = atmosphere.temperature(z);
            assert_abs_diff_eq!(t, 1.0 + atmosphere.grad_t * z, epsilon = 1.0E-14);
            assert_abs_diff_eq!(atmosphere.density(z), t.powf(atmosphere.m), epsilon = 1.0E-14);
        }

        // Spans exactly nρ density scale heights
        assert_abs_diff_eq!(atmosphere.density(2.0).ln(), -2.0, epsilon = 1.0E-12);
    }

    #[test]
    fn pressure_is_ideal_gas() {
        let atmosphere = Polytrope::new(3.0, 0.5, 5.0 / 3.0, 2.5, 1.0).unwrap();

        for i in 0..=10 {
            let z = i as f64 / 10.0;
            assert_abs_diff_eq!(
                atmosphere.pressure(z),
                2.5 * atmosphere.density(z) * atmosphere.temperature(z),
                epsilon = 1.0E-14
            );
        }
    }

    #[test]
    fn gravity_balances_pressure_gradient() {
        let atmosphere = Polytrope::new(3.0, 0.5, 5.0 / 3.0, 1.0, 1.0).unwrap();
        let column = Chebyshev::new(32, (0.0, 1.0)).unwrap();

        let p = column.profile(|z| atmosphere.pressure(z));
        let dp = column.differentiate(p.view()).unwrap();

        for (z, dp) in column.grid().iter().zip(dp.iter()) {
            assert_abs_diff_eq!(*dp, -atmosphere.density(*z) * atmosphere.g, epsilon = 1.0E-9);
        }
    }

    #[test]
    fn rejects_non_physical_parameters() {
        assert!(matches!(
            Polytrope::new(3.0, 0.5, 1.0, 1.0, 1.0),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Polytrope::new(3.0, 0.5, 0.8, 1.0, 1.0),
            Err(Error::Configuration(_))
        ));
        // m = 1.5 - 1.5 = 0
        assert!(matches!(
            Polytrope::new(3.0, 1.5, 5.0 / 3.0, 1.0, 1.0),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Polytrope::new(f64::NAN, 0.5, 5.0 / 3.0, 1.0, 1.0),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Polytrope::new(3.0, 0.5, 5.0 / 3.0, 1.0, 0.0),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn instances_do_not_share_parameters() {
        let a = AtmosphereParameters::default().build().unwrap();
        let b = AtmosphereParameters::Polytrope {
            n_rho: 1.0,
            epsilon: 0.0,
            gamma: 1.4,
            gas_constant: 1.0,
            height: 1.0,
        }
        .build()
        .unwrap();

        assert_abs_diff_eq!(a.gas().gamma, 5.0 / 3.0, epsilon = 1.0E-15);
        assert_abs_diff_eq!(b.gas().gamma, 1.4, epsilon = 1.0E-15);
        assert_abs_diff_eq!(a.temperature(1.0), (-3.0f64).exp(), epsilon = 1.0E-14);
    }

    #[test]
    fn background_fields() {
        let atmosphere = default_polytrope();
        let column = Chebyshev::new(64, (0.0, 1.0)).unwrap();
        let background = atmosphere.build_atmosphere(&column, None).unwrap();

        for i in 0..64 {
            assert_abs_diff_eq!(background.t0_z[i], atmosphere.grad_t, epsilon = 1.0E-10);
            assert_abs_diff_eq!(
                background.ln_rho0_z[i],
                atmosphere.m * atmosphere.grad_t / background.t0[i],
                epsilon = 1.0E-6
            );
        }

        // s/Cp = (1/ɣ - (ɣ-1) m/ɣ) ln T = (ε(ɣ-1)/ɣ) ln T
        let expected = (0.5 * (2.0 / 3.0) / (5.0 / 3.0)) * (-3.0f64).exp().ln();
        assert_abs_diff_eq!(background.delta_s_over_cp, expected, epsilon = 1.0E-12);

        let bounded = atmosphere
            .build_atmosphere(&column, Some((0.25, 0.75)))
            .unwrap();
        let expected = 0.2 * (atmosphere.temperature(0.75) / atmosphere.temperature(0.25)).ln();
        assert_abs_diff_eq!(bounded.delta_s_over_cp, expected, epsilon = 1.0E-8);
    }

    #[test]
    fn adiabatic_background_is_isentropic() {
        let atmosphere = Polytrope::new(3.0, 0.0, 5.0 / 3.0, 1.0, 1.0).unwrap();
        let column = Chebyshev::new(16, (0.0, 1.0)).unwrap();
        let background = atmosphere.build_atmosphere(&column, None).unwrap();

        assert_abs_diff_eq!(background.delta_s_over_cp, 0.0, epsilon = 1.0E-13);
        for s in background.s0_over_cp.iter() {
            assert_abs_diff_eq!(*s, 0.0, epsilon = 1.0E-13);
        }
    }
}
