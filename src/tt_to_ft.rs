//! Seeding a full-thermodynamics run from an equilibrated truncated run.
//!
//! [`tt_to_ft_preliminaries`] runs once, on the root rank, and shares its
//! result with every rank; [`tt_to_ft`] then runs independently on each
//! rank's slice of the state.

use {
    crate::{
        atmosphere::AtmosphereParameters,
        bvp::{structure_bvp, StructureDiagnostics},
        checkpoint::{Checkpoint, SimulationState},
        comm::{agree, Communicator},
        domain::Domain,
        error::{Error, Result},
        newton::NewtonSettings,
        rescale::{rescale_state, Rescaling},
        statistics::{load_tt, TimeWindow},
        utils::write_r8,
    },
    log::{error, info},
    ndarray::Array1,
    serde::{Deserialize, Serialize},
    std::{
        fs::{create_dir_all, File},
        io::{BufReader, BufWriter},
        path::{Path, PathBuf},
    },
};

pub const PRELIMINARIES_FILE: &str = "tt_to_ft.bin";
pub const FACTORS_FILE: &str = "tt_to_ft_factors.yaml";
pub const T1_PROFILE_FILE: &str = "t1_ft.r8";
pub const LN_RHO1_PROFILE_FILE: &str = "ln_rho1_ft.r8";

/// Everything every rank needs to rescale its slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preliminaries {
    /// TT checkpoint to restart from
    pub checkpoint: PathBuf,
    pub t1_ft: Array1<f64>,
    pub ln_rho1_ft: Array1<f64>,
    pub ds_factor: f64,
    pub dt_ad_factor: f64,
    /// Multiplies the TT Rayleigh number to give the FT one
    pub ft_ra_factor: f64,

    pub diagnostics: StructureDiagnostics,
    pub scalar_window: TimeWindow,
    pub profile_window: TimeWindow,
}

/// Summary written alongside the preliminaries for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factors {
    pub checkpoint: PathBuf,
    pub ds_factor: f64,
    pub dt_ad_factor: f64,
    pub ft_ra_factor: f64,
    pub newton_iterations: usize,
    pub complete_window: bool,
}

impl Preliminaries {
    pub fn factors(&self) -> Factors {
        Factors {
            checkpoint: self.checkpoint.clone(),
            ds_factor: self.ds_factor,
            dt_ad_factor: self.dt_ad_factor,
            ft_ra_factor: self.ft_ra_factor,
            newton_iterations: self.diagnostics.iterations,
            complete_window: self.scalar_window.is_complete() && self.profile_window.is_complete(),
        }
    }

    /// Writes the preliminaries, a YAML summary of the factors and the raw FT
    /// profiles into `dir`
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(Error::io(dir))?;

        let path = dir.join(PRELIMINARIES_FILE);
        let file = File::create(&path).map_err(Error::io(&path))?;
        bincode::serialize_into(BufWriter::new(file), self).map_err(Error::encode(&path))?;

        let path = dir.join(FACTORS_FILE);
        let file = File::create(&path).map_err(Error::io(&path))?;
        serde_yaml::to_writer(BufWriter::new(file), &self.factors()).map_err(Error::yaml(&path))?;

        write_r8(dir.join(T1_PROFILE_FILE), &self.t1_ft.to_vec())?;
        write_r8(dir.join(LN_RHO1_PROFILE_FILE), &self.ln_rho1_ft.to_vec())?;

        info!("Saved TT-to-FT preliminaries to {}", dir.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(PRELIMINARIES_FILE);
        let file = File::open(&path).map_err(Error::io(&path))?;
        bincode::deserialize_from(BufReader::new(file)).map_err(Error::decode(&path))
    }
}

/// What the root rank shares: its result or why it has none
#[derive(Debug, Serialize, Deserialize)]
enum Outcome<T> {
    Ok(T),
    Failed(String),
}

fn compute_preliminaries(
    atmosphere: &AtmosphereParameters,
    path: &Path,
    avg_time: f64,
    settings: NewtonSettings,
) -> Result<Preliminaries> {
    let statistics = load_tt(path, avg_time, atmosphere.height())?;
    let structure = structure_bvp(
        atmosphere,
        &statistics.profiles,
        &statistics.scalars,
        settings,
    )?;

    info!(
        "Restarting from {} with dS factor {}, dT_ad factor {}, FT Ra factor {}",
        statistics.checkpoint.display(),
        structure.ds_factor,
        structure.dt_ad_factor,
        structure.ft_ra_factor
    );

    Ok(Preliminaries {
        checkpoint: statistics.checkpoint,
        t1_ft: structure.t1_ft,
        ln_rho1_ft: structure.ln_rho1_ft,
        ds_factor: structure.ds_factor,
        dt_ad_factor: structure.dt_ad_factor,
        ft_ra_factor: structure.ft_ra_factor,
        diagnostics: structure.diagnostics,
        scalar_window: statistics.scalar_window,
        profile_window: statistics.profile_window,
    })
}

/// Loads the TT statistics from the run at `path` and solves for the FT
/// structure on the root rank, then broadcasts the result.
///
/// Every rank returns together: with the same preliminaries, or with an error
/// when the root failed ([`Error::Remote`] on the other ranks).
pub fn tt_to_ft_preliminaries<C: Communicator>(
    comm: &C,
    atmosphere: &AtmosphereParameters,
    path: &Path,
    avg_time: f64,
    settings: NewtonSettings,
) -> Result<Preliminaries> {
    if !comm.is_root() {
        return match comm.broadcast::<Outcome<Preliminaries>>(None)? {
            Outcome::Ok(preliminaries) => Ok(preliminaries),
            Outcome::Failed(message) => Err(Error::Remote(message)),
        };
    }

    let result = compute_preliminaries(atmosphere, path, avg_time, settings);
    let outcome = match &result {
        Ok(preliminaries) => Outcome::Ok(preliminaries.clone()),
        Err(e) => {
            error!("TT-to-FT preliminaries failed: {}", e);
            Outcome::Failed(e.to_string())
        }
    };
    comm.broadcast(Some(&outcome))?;

    result
}

/// Restarts this rank's slice of `state` from the preliminaries' checkpoint
/// and rescales it onto the FT structure, returning the new timestep.
///
/// Restart failures are agreed across the group before rescaling so no rank
/// is left waiting in a collective.
pub fn tt_to_ft<C: Communicator, K: Checkpoint>(
    comm: &C,
    checkpoint: &mut K,
    state: &mut SimulationState,
    domain: &Domain,
    preliminaries: &Preliminaries,
) -> Result<f64> {
    let restart = checkpoint.restart(&preliminaries.checkpoint, state);
    let dt = agree(
        comm,
        restart,
        &format!("restart from {}", preliminaries.checkpoint.display()),
    )?;

    rescale_state(
        comm,
        domain,
        Rescaling {
            t1_ft: preliminaries.t1_ft.view(),
            ln_rho1_ft: preliminaries.ln_rho1_ft.view(),
            dt_ad_factor: preliminaries.dt_ad_factor,
            ds_factor: preliminaries.ds_factor,
        },
        state,
        dt,
    )
}
