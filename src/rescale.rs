//! Rescaling a truncated-run state onto the full-run structure.

use {
    crate::{
        checkpoint::SimulationState,
        comm::{agree, Communicator},
        domain::Domain,
        error::{Error, Result},
    },
    log::info,
    ndarray::{ArrayView1, Axis},
};

/// Factors and target profiles applied by [`rescale_state`]
#[derive(Debug, Clone, Copy)]
pub struct Rescaling<'a> {
    /// FT temperature perturbation on the global vertical grid
    pub t1_ft: ArrayView1<'a, f64>,
    /// FT log-density perturbation on the global vertical grid
    pub ln_rho1_ft: ArrayView1<'a, f64>,
    pub dt_ad_factor: f64,
    pub ds_factor: f64,
}

impl<'a> Rescaling<'a> {
    fn validate(&self, domain: &Domain) -> Result<()> {
        if !self.ds_factor.is_finite() || self.ds_factor <= 0.0 {
            return Err(Error::Configuration(format!(
                "entropy jump factor must be positive and finite, got {}",
                self.ds_factor
            )));
        }
        if !self.dt_ad_factor.is_finite() {
            return Err(Error::Configuration(format!(
                "temperature jump factor must be finite, got {}",
                self.dt_ad_factor
            )));
        }

        let nz = domain.z.size();
        for (name, profile) in &[("T1_FT", self.t1_ft), ("ln_rho1_FT", self.ln_rho1_ft)] {
            if profile.len() != nz {
                return Err(Error::Configuration(format!(
                    "{} has {} points but the domain has {} in z",
                    name,
                    profile.len(),
                    nz
                )));
            }
        }

        Ok(())
    }
}

/// Moves the local slice of a TT state onto the FT structure, returning the
/// timestep to continue with.
///
/// `T1` keeps its horizontal fluctuation, scaled by `dt_ad_factor`, about the
/// new mean `T1_FT`. `ln_rho1` is replaced outright by `ln_rho1_FT` so the FT
/// run starts with exactly the mass of the background. Velocities and the
/// timestep scale with the free-fall velocity, `sqrt(ds_factor)`.
///
/// The horizontal mean is taken along x only. Every rank must call this
/// together since the mean is reduced across the group; a rank whose slice
/// fails its checks keeps its own error and the others return
/// [`Error::Remote`].
pub fn rescale_state<C: Communicator>(
    comm: &C,
    domain: &Domain,
    rescaling: Rescaling,
    state: &mut SimulationState,
    dt: f64,
) -> Result<f64> {
    let (nx, nz) = domain.shape();
    let layout = state.layout.clone();
    let checked = rescaling.validate(domain).and_then(|_| {
        if layout.z != (0..nz) {
            return Err(Error::Layout(format!(
                "vertical derivatives need whole columns, slice holds z {:?} of {}",
                layout.z, nz
            )));
        }
        if state.t1.dim() != layout.shape() {
            return Err(Error::Layout(format!(
                "T1 is {:?} but the slice is {:?}",
                state.t1.dim(),
                layout.shape()
            )));
        }
        Ok(())
    });
    agree(comm, checked, "check their slice for rescaling")?;

    let column_sums = state.t1.sum_axis(Axis(0));
    let mean = comm.all_reduce_sum(column_sums.to_vec())?;
    let mean = ndarray::Array1::from(mean) / nx as f64;

    let fluctuation = &state.t1 - &mean;
    state.t1 = fluctuation * rescaling.dt_ad_factor + domain.ncc(rescaling.t1_ft, &layout)?;
    state.t1_z = domain.z.differentiate_columns(state.t1.view())?;

    state.ln_rho1 = domain.ncc(rescaling.ln_rho1_ft, &layout)?;

    let velocity_factor = rescaling.ds_factor.sqrt();
    state.u *= velocity_factor;
    state.w *= velocity_factor;
    state.u_z = domain.z.differentiate_columns(state.u.view())?;
    state.w_z = domain.z.differentiate_columns(state.w.view())?;

    let dt = dt / velocity_factor;

    info!(
        "Rank {}: rescaled x {:?} by dT_ad factor {} and velocity factor {}, dt = {}",
        comm.rank(),
        layout.x,
        rescaling.dt_ad_factor,
        velocity_factor,
        dt
    );

    Ok(dt)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            comm::{SingleProcess, ThreadGroup},
            domain::GridLayout,
        },
        approx::assert_abs_diff_eq,
        ndarray::{s, Array1, Array2},
        std::f64::consts::PI,
    };

    const NX: usize = 8;
    const NZ: usize = 12;

    fn domain() -> Domain {
        Domain::new((NX, NZ), 1.0, 2.0).unwrap()
    }

    /// TT state with mean `T1 = z` and a zero-mean fluctuation `cos(kx) z²`
    fn tt_state(domain: &Domain, layout: GridLayout) -> SimulationState {
        let x = domain.x.grid();
        let z = domain.z.grid().to_owned();
        let k = 2.0 * PI / domain.x.length();

        let global = |f: &dyn Fn(f64, f64) -> f64| {
            Array2::from_shape_fn((NX, NZ), |(i, j)| f(x[i], z[j]))
                .slice(s![layout.x.clone(), layout.z.clone()])
                .to_owned()
        };

        let mut state = SimulationState::new(layout.clone());
        state.t1 = global(&|x, z| z + (k * x).cos() * z * z);
        state.ln_rho1 = global(&|x, z| 0.1 * (k * x).sin() * z);
        state.u = global(&|x, z| (k * x).sin() * z * z);
        state.w = global(&|x, z| (k * x).cos() * z * (1.0 - z));
        state
    }

    fn targets(domain: &Domain) -> (Array1<f64>, Array1<f64>) {
        (
            domain.z.profile(|z| z * z * z),
            domain.z.profile(|z| -0.5 * z),
        )
    }

    fn rescaling<'a>(
        targets: &'a (Array1<f64>, Array1<f64>),
        dt_ad_factor: f64,
        ds_factor: f64,
    ) -> Rescaling<'a> {
        Rescaling {
            t1_ft: targets.0.view(),
            ln_rho1_ft: targets.1.view(),
            dt_ad_factor,
            ds_factor,
        }
    }

    #[test]
    fn unit_factors_replace_the_mean() {
        let domain = domain();
        let targets = targets(&domain);
        let mut state = tt_state(&domain, domain.layout(0, 1).unwrap());
        let original = state.clone();

        let dt = rescale_state(&SingleProcess, &domain, rescaling(&targets, 1.0, 1.0), &mut state, 0.1)
            .unwrap();

        assert_eq!(dt, 0.1);
        assert_eq!(state.u, original.u);
        assert_eq!(state.w, original.w);

        let x = domain.x.grid();
        let z = domain.z.grid();
        let k = 2.0 * PI / domain.x.length();
        for i in 0..NX {
            for j in 0..NZ {
                let fluctuation = (k * x[i]).cos() * z[j] * z[j];
                assert_abs_diff_eq!(
                    state.t1[[i, j]],
                    z[j] * z[j] * z[j] + fluctuation,
                    epsilon = 1.0E-12
                );
                assert_abs_diff_eq!(
                    state.t1_z[[i, j]],
                    3.0 * z[j] * z[j] + 2.0 * (k * x[i]).cos() * z[j],
                    epsilon = 1.0E-9
                );
                assert_abs_diff_eq!(
                    state.u_z[[i, j]],
                    2.0 * (k * x[i]).sin() * z[j],
                    epsilon = 1.0E-9
                );
            }
        }
    }

    #[test]
    fn log_density_is_replaced() {
        let domain = domain();
        let targets = targets(&domain);
        let mut state = tt_state(&domain, domain.layout(0, 1).unwrap());

        rescale_state(&SingleProcess, &domain, rescaling(&targets, 0.5, 2.0), &mut state, 0.1)
            .unwrap();

        for row in state.ln_rho1.outer_iter() {
            assert_eq!(row, targets.1);
        }
    }

    #[test]
    fn entropy_factor_scales_velocity_and_timestep() {
        let domain = domain();
        let targets = targets(&domain);
        let mut state = tt_state(&domain, domain.layout(0, 1).unwrap());
        let original = state.clone();

        let dt = rescale_state(&SingleProcess, &domain, rescaling(&targets, 0.5, 4.0), &mut state, 0.1)
            .unwrap();

        assert_abs_diff_eq!(dt, 0.05, epsilon = 1.0E-15);
        assert_abs_diff_eq!(state.u, &original.u * 2.0, epsilon = 1.0E-15);
        assert_abs_diff_eq!(state.w, &original.w * 2.0, epsilon = 1.0E-15);

        // Fluctuation halves about the new mean
        let fluctuation = &state.t1 - &domain.ncc(targets.0.view(), &state.layout).unwrap();
        let original_fluctuation = &original.t1 - &domain.ncc(domain.z.grid(), &state.layout).unwrap();
        assert_abs_diff_eq!(fluctuation, original_fluctuation * 0.5, epsilon = 1.0E-12);
    }

    #[test]
    fn distributed_matches_single_process() {
        let domain = domain();
        let targets = targets(&domain);

        let mut whole = tt_state(&domain, domain.layout(0, 1).unwrap());
        rescale_state(&SingleProcess, &domain, rescaling(&targets, 0.5, 4.0), &mut whole, 0.1)
            .unwrap();

        let slices = ThreadGroup::new(3).unwrap().run(|comm| {
            let mut state = tt_state(&domain, domain.layout(comm.rank(), comm.size()).unwrap());
            rescale_state(&comm, &domain, rescaling(&targets, 0.5, 4.0), &mut state, 0.1).unwrap();
            state
        });

        for slice in slices {
            let expected = whole.t1.slice(s![slice.layout.x.clone(), ..]);
            assert_abs_diff_eq!(slice.t1, expected, epsilon = 1.0E-12);
            let expected = whole.w_z.slice(s![slice.layout.x.clone(), ..]);
            assert_abs_diff_eq!(slice.w_z, expected, epsilon = 1.0E-12);
        }
    }

    #[test]
    fn invalid_factors() {
        let domain = domain();
        let targets = targets(&domain);

        for &(dt_ad, ds) in &[(1.0, 0.0), (1.0, -1.0), (1.0, f64::NAN), (f64::INFINITY, 1.0)] {
            let mut state = tt_state(&domain, domain.layout(0, 1).unwrap());
            assert!(matches!(
                rescale_state(&SingleProcess, &domain, rescaling(&targets, dt_ad, ds), &mut state, 0.1),
                Err(Error::Configuration(_))
            ));
        }
    }

    #[test]
    fn short_profiles() {
        let domain = domain();
        let targets = (Array1::zeros(NZ - 1), Array1::zeros(NZ));
        let mut state = tt_state(&domain, domain.layout(0, 1).unwrap());

        assert!(matches!(
            rescale_state(&SingleProcess, &domain, rescaling(&targets, 1.0, 1.0), &mut state, 0.1),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn partial_columns() {
        let domain = domain();
        let targets = targets(&domain);
        let layout = GridLayout { x: 0..NX, z: 0..NZ / 2 };
        let mut state = tt_state(&domain, layout);

        assert!(matches!(
            rescale_state(&SingleProcess, &domain, rescaling(&targets, 1.0, 1.0), &mut state, 0.1),
            Err(Error::Layout(_))
        ));
    }

    #[test]
    fn one_rank_with_partial_columns_stops_the_group() {
        let domain = domain();
        let targets = targets(&domain);

        let results = ThreadGroup::new(3).unwrap().run(|comm| {
            let mut layout = domain.layout(comm.rank(), comm.size()).unwrap();
            if comm.rank() == 1 {
                layout.z = 0..4;
            }
            let mut state = tt_state(&domain, layout);
            rescale_state(&comm, &domain, rescaling(&targets, 0.5, 4.0), &mut state, 0.1)
        });

        assert!(matches!(results[0], Err(Error::Remote(_))));
        assert!(matches!(results[1], Err(Error::Layout(_))));
        assert!(matches!(results[2], Err(Error::Remote(_))));
    }
}
