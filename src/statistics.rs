//! Time-averaged statistics of an equilibrated truncated (TT) run.
//!
//! Reads the run directory written by the TT simulation:
//!
//! ```text
//! <run>/checkpoint/checkpoint_s<N>.bin
//! <run>/final_checkpoint/final_checkpoint_s<N>.bin   (optional, preferred)
//! <run>/scalar/scalar_s<N>.bin
//! <run>/profiles/profiles_s<N>.bin
//! ```

use {
    crate::{
        error::{Error, Result},
        output::{sorted_output_files, OutputFile},
    },
    log::{info, warn},
    ndarray::{Array1, Axis},
    rayon::prelude::*,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

/// Scalar tasks averaged for the BVP
pub const SCALAR_TASKS: [&str; 2] = ["Nu", "s_over_cp_z"];

/// Profile tasks averaged for the BVP
pub const PROFILE_TASKS: [&str; 2] = ["UdotGradw", "T1"];

/// Ordered name → value mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Averages<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for Averages<T> {
    fn default() -> Self {
        Averages { entries: vec![] }
    }
}

impl<T> Averages<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`, keeping first-insertion order
    pub fn insert<S: Into<String>>(&mut self, name: S, value: T) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Result<&T> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::DataAvailability(format!("no average for \"{}\"", name)))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut T> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::DataAvailability(format!("no average for \"{}\"", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type ProfileSet = Averages<Array1<f64>>;
pub type ScalarSet = Averages<f64>;

/// Trailing span of simulation time covered by a set of output files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
    pub requested: f64,
    pub writes: usize,
    /// Contributing files, oldest first
    pub files: Vec<PathBuf>,
}

impl TimeWindow {
    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    /// False when the files ran out before the requested duration was reached
    pub fn is_complete(&self) -> bool {
        self.span() >= self.requested
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtStatistics {
    /// Checkpoint to seed the full run from
    pub checkpoint: PathBuf,
    pub profiles: ProfileSet,
    pub scalars: ScalarSet,
    pub scalar_window: TimeWindow,
    pub profile_window: TimeWindow,
}

/// Newest checkpoint, preferring `final_checkpoint/` over `checkpoint/`
pub fn latest_checkpoint<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();

    for dir in &["final_checkpoint", "checkpoint"] {
        if let Some(newest) = sorted_output_files(path.join(dir))?.pop() {
            return Ok(newest);
        }
    }

    Err(Error::DataAvailability(format!(
        "no checkpoint files found in {}",
        path.display()
    )))
}

/// Walks `files` (sorted oldest first) from the newest backwards until they
/// span at least `avg_time`, returning the window and the contributing files
/// in chronological order.
pub fn select_window(files: &[PathBuf], avg_time: f64) -> Result<(TimeWindow, Vec<OutputFile>)> {
    let mut selected = vec![];
    let mut end = None;
    let mut start = 0.0;
    let mut writes = 0;

    for path in files.iter().rev() {
        let file = OutputFile::read(path)?;

        let (first, last) = match (file.scales.sim_time.first(), file.scales.sim_time.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(Error::DataAvailability(format!(
                    "{} contains no writes",
                    path.display()
                )))
            }
        };

        let end = *end.get_or_insert(last);
        start = first;
        writes += file.writes();
        selected.push((path.clone(), file));

        if end - first >= avg_time {
            break;
        }
    }

    let end = end.ok_or_else(|| Error::DataAvailability("no output files found".into()))?;

    selected.reverse();
    let (paths, files): (Vec<_>, Vec<_>) = selected.into_iter().unzip();

    Ok((
        TimeWindow {
            start,
            end,
            requested: avg_time,
            writes,
            files: paths,
        },
        files,
    ))
}

/// Arithmetic mean of a scalar task over every write of `files`
pub fn average_scalar(files: &[OutputFile], name: &str) -> Result<f64> {
    let mut sum = 0.0;
    let mut count = 0;

    for file in files {
        let task = file.task(name)?;
        if task.ncols() != 1 {
            return Err(Error::Layout(format!(
                "scalar task \"{}\" has {} points per write",
                name,
                task.ncols()
            )));
        }
        sum += task.sum();
        count += task.nrows();
    }

    if count == 0 {
        return Err(Error::DataAvailability(format!("no writes of \"{}\"", name)));
    }

    Ok(sum / count as f64)
}

/// Mean profile of a task over every write of `files`, point by point
pub fn average_profile(files: &[OutputFile], name: &str) -> Result<Array1<f64>> {
    let mut sum: Option<Array1<f64>> = None;
    let mut count = 0;

    for file in files {
        let task = file.task(name)?;

        if let Some(grid) = file.vertical_grid() {
            if grid.len() != task.ncols() {
                return Err(Error::Layout(format!(
                    "profile \"{}\" has {} points on a {} point grid",
                    name,
                    task.ncols(),
                    grid.len()
                )));
            }
        }

        let file_sum = task.sum_axis(Axis(0));
        if let Some(s) = sum.as_ref() {
            if s.len() != file_sum.len() {
                return Err(Error::Layout(format!(
                    "profile \"{}\" changes length from {} to {} points",
                    name,
                    s.len(),
                    file_sum.len()
                )));
            }
        }

        sum = Some(match sum.take() {
            Some(s) => s + &file_sum,
            None => file_sum,
        });
        count += task.nrows();
    }

    match sum {
        Some(sum) if count > 0 => Ok(sum / count as f64),
        _ => Err(Error::DataAvailability(format!("no writes of \"{}\"", name))),
    }
}

/// Loads the averaged profiles and scalars needed for the TT-to-FT BVP.
///
/// * `path` - TT run directory
/// * `avg_time` - simulation time to average over, counted back from the
///   newest write
/// * `lz` - depth of the domain; the averaged entropy gradient is multiplied
///   by it to give the entropy jump
///
/// A window that cannot reach `avg_time` is averaged over whatever exists and
/// flagged incomplete.
pub fn load_tt<P: AsRef<Path>>(path: P, avg_time: f64, lz: f64) -> Result<TtStatistics> {
    let path = path.as_ref();

    if !avg_time.is_finite() || avg_time < 0.0 {
        return Err(Error::Configuration(format!(
            "averaging time must be non-negative, got {}",
            avg_time
        )));
    }
    if !lz.is_finite() || lz <= 0.0 {
        return Err(Error::Configuration(format!(
            "domain depth must be positive, got {}",
            lz
        )));
    }

    let checkpoint = latest_checkpoint(path)?;

    let scalar_files = sorted_output_files(path.join("scalar"))?;
    let profile_files = sorted_output_files(path.join("profiles"))?;

    if scalar_files.is_empty() || profile_files.is_empty() {
        return Err(Error::DataAvailability(format!(
            "{} has {} scalar and {} profile files",
            path.display(),
            scalar_files.len(),
            profile_files.len()
        )));
    }

    let (scalar_window, scalar_data) = select_window(&scalar_files, avg_time)?;
    let (profile_window, profile_data) = select_window(&profile_files, avg_time)?;

    for (kind, window) in &[("scalar", &scalar_window), ("profile", &profile_window)] {
        if window.is_complete() {
            info!(
                "Averaging {} {} writes over t = [{}, {}] from {} files",
                window.writes,
                kind,
                window.start,
                window.end,
                window.files.len()
            );
        } else {
            warn!(
                "Partial {} window: requested {} but only t = [{}, {}] is available",
                kind, window.requested, window.start, window.end
            );
        }
    }

    let scalar_values = SCALAR_TASKS
        .par_iter()
        .map(|name| average_scalar(&scalar_data, name))
        .collect::<Result<Vec<f64>>>()?;
    let profile_values = PROFILE_TASKS
        .par_iter()
        .map(|name| average_profile(&profile_data, name))
        .collect::<Result<Vec<Array1<f64>>>>()?;

    let mut scalars = ScalarSet::new();
    for (name, value) in SCALAR_TASKS.iter().zip(scalar_values) {
        scalars.insert(*name, value);
    }

    let mut profiles = ProfileSet::new();
    for (name, value) in PROFILE_TASKS.iter().zip(profile_values) {
        profiles.insert(*name, value);
    }

    // volume-averaged entropy gradient * Lz = entropy jump (over Cp)
    *scalars.get_mut("s_over_cp_z")? *= lz;

    Ok(TtStatistics {
        checkpoint,
        profiles,
        scalars,
        scalar_window,
        profile_window,
    })
}
