//! Simulation state snapshots.

use {
    crate::{
        domain::{Domain, GridLayout},
        error::{Error, Result},
    },
    log::info,
    ndarray::{s, Array2},
    serde::{Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        fs::{create_dir_all, File},
        io::{BufReader, BufWriter},
        path::Path,
    },
};

/// Names of the perturbation fields held by a checkpoint
pub const STATE_FIELDS: [&str; 7] = ["T1", "T1_z", "ln_rho1", "u", "u_z", "w", "w_z"];

/// Perturbation fields on one process's grid-space slice, indexed `(x, z)`
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub layout: GridLayout,

    pub t1: Array2<f64>,
    pub t1_z: Array2<f64>,
    pub ln_rho1: Array2<f64>,
    pub u: Array2<f64>,
    pub u_z: Array2<f64>,
    pub w: Array2<f64>,
    pub w_z: Array2<f64>,
}

impl SimulationState {
    /// All-zero state covering `layout`
    pub fn new(layout: GridLayout) -> Self {
        let shape = layout.shape();
        SimulationState {
            layout,
            t1: Array2::zeros(shape),
            t1_z: Array2::zeros(shape),
            ln_rho1: Array2::zeros(shape),
            u: Array2::zeros(shape),
            u_z: Array2::zeros(shape),
            w: Array2::zeros(shape),
            w_z: Array2::zeros(shape),
        }
    }

    pub fn field(&self, name: &str) -> Result<&Array2<f64>> {
        Ok(match name {
            "T1" => &self.t1,
            "T1_z" => &self.t1_z,
            "ln_rho1" => &self.ln_rho1,
            "u" => &self.u,
            "u_z" => &self.u_z,
            "w" => &self.w,
            "w_z" => &self.w_z,
            _ => return Err(Error::DataAvailability(format!("no state field \"{}\"", name))),
        })
    }

    pub fn field_mut(&mut self, name: &str) -> Result<&mut Array2<f64>> {
        Ok(match name {
            "T1" => &mut self.t1,
            "T1_z" => &mut self.t1_z,
            "ln_rho1" => &mut self.ln_rho1,
            "u" => &mut self.u,
            "u_z" => &mut self.u_z,
            "w" => &mut self.w,
            "w_z" => &mut self.w_z,
            _ => return Err(Error::DataAvailability(format!("no state field \"{}\"", name))),
        })
    }
}

/// Restores a simulation state from a saved snapshot
pub trait Checkpoint {
    /// Fills the local slice of `state` from the snapshot at `path`, returning
    /// the timestep the snapshot was taken with
    fn restart(&mut self, path: &Path, state: &mut SimulationState) -> Result<f64>;
}

/// Full-domain snapshot as stored on disk
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub sim_time: f64,
    pub dt: f64,
    pub iteration: u64,
    pub fields: BTreeMap<String, Array2<f64>>,
}

impl CheckpointFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::io(path))?;
        bincode::deserialize_from(BufReader::new(file)).map_err(Error::decode(path))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            create_dir_all(dir).map_err(Error::io(dir))?;
        }
        let file = File::create(path).map_err(Error::io(path))?;
        bincode::serialize_into(BufWriter::new(file), self).map_err(Error::encode(path))
    }

    /// Snapshot of a single-process state covering the whole domain
    pub fn from_state(state: &SimulationState, sim_time: f64, dt: f64, iteration: u64) -> Result<Self> {
        let fields = STATE_FIELDS
            .iter()
            .map(|name| -> Result<(String, Array2<f64>)> {
                Ok(((*name).to_owned(), state.field(name)?.clone()))
            })
            .collect::<Result<_>>()?;

        Ok(CheckpointFile {
            sim_time,
            dt,
            iteration,
            fields,
        })
    }
}

/// [`Checkpoint`] backed by [`CheckpointFile`]s on a given domain
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    domain: Domain,
    /// Metadata of the most recently restarted snapshot
    pub sim_time: f64,
    pub iteration: u64,
}

impl FileCheckpoint {
    pub fn new(domain: Domain) -> Self {
        FileCheckpoint {
            domain,
            sim_time: 0.0,
            iteration: 0,
        }
    }
}

impl Checkpoint for FileCheckpoint {
    fn restart(&mut self, path: &Path, state: &mut SimulationState) -> Result<f64> {
        let file = CheckpointFile::read(path)?;
        let shape = self.domain.shape();
        let layout = state.layout.clone();

        if layout.x.end > shape.0 || layout.z.end > shape.1 {
            return Err(Error::Layout(format!(
                "slice {:?} lies outside the {:?} domain",
                layout, shape
            )));
        }

        for name in STATE_FIELDS.iter() {
            let global = file.fields.get(*name).ok_or_else(|| {
                Error::DataAvailability(format!(
                    "checkpoint {} has no field \"{}\"",
                    path.display(),
                    name
                ))
            })?;

            if global.dim() != shape {
                return Err(Error::Layout(format!(
                    "checkpoint field \"{}\" is {:?}, domain is {:?}",
                    name,
                    global.dim(),
                    shape
                )));
            }

            state
                .field_mut(name)?
                .assign(&global.slice(s![layout.x.clone(), layout.z.clone()]));
        }

        self.sim_time = file.sim_time;
        self.iteration = file.iteration;

        info!(
            "Restarted from {} at t = {}, iteration {}, dt = {}",
            path.display(),
            file.sim_time,
            file.iteration,
            file.dt
        );

        Ok(file.dt)
    }
}
