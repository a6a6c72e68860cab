//! On-disk simulation output.
//!
//! Each file holds one set of writes: the `scales` (simulation time of every
//! write and the vertical grid keyed by resolution scale) and the `tasks`
//! (one `(writes, points)` array per named quantity; scalar tasks have a
//! single point). Files are named `<stem>_s<N>.bin` where `N` is the
//! increasing write-set index.

use {
    crate::error::{Error, Result},
    ndarray::Array2,
    serde::{Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        fs::{self, File},
        io::{BufReader, BufWriter, ErrorKind},
        path::{Path, PathBuf},
    },
};

pub const OUTPUT_EXTENSION: &str = "bin";

/// Key of the vertical grid at the base resolution
pub const BASE_SCALE: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scales {
    pub sim_time: Vec<f64>,
    pub z: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputFile {
    pub scales: Scales,
    pub tasks: BTreeMap<String, Array2<f64>>,
}

impl OutputFile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::io(path))?;
        bincode::deserialize_from(BufReader::new(file)).map_err(Error::decode(path))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(Error::io(path))?;
        bincode::serialize_into(BufWriter::new(file), self).map_err(Error::encode(path))
    }

    pub fn writes(&self) -> usize {
        self.scales.sim_time.len()
    }

    /// Looks up a task, checking it has one row per write
    pub fn task(&self, name: &str) -> Result<&Array2<f64>> {
        let task = self
            .tasks
            .get(name)
            .ok_or_else(|| Error::DataAvailability(format!("no task named \"{}\"", name)))?;

        if task.nrows() != self.writes() {
            return Err(Error::Layout(format!(
                "task \"{}\" has {} rows for {} writes",
                name,
                task.nrows(),
                self.writes()
            )));
        }

        Ok(task)
    }

    pub fn vertical_grid(&self) -> Option<&[f64]> {
        self.scales.z.get(BASE_SCALE).map(Vec::as_slice)
    }
}

/// Write-set index embedded in a `<stem>_s<N>.<ext>` filename
pub fn write_index(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let (_, index) = stem.rsplit_once("_s")?;
    index.parse().ok()
}

pub fn output_path<P: AsRef<Path>>(dir: P, stem: &str, index: u64) -> PathBuf {
    dir.as_ref()
        .join(format!("{}_s{}.{}", stem, index, OUTPUT_EXTENSION))
}

/// Sorts output files by their write-set index, numerically.
///
/// Paths without an index sort first.
pub fn sort_file_list(mut files: Vec<PathBuf>) -> Vec<PathBuf> {
    files.sort_by_key(|f| write_index(f));
    files
}

/// Output files in `dir`, oldest first. A missing directory has no files.
pub fn sorted_output_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(Error::io(dir)(e)),
    };

    let mut files = vec![];
    for entry in entries {
        let path = entry.map_err(Error::io(dir))?.path();

        let is_output = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(OUTPUT_EXTENSION)
            && write_index(&path).is_some();

        if is_output {
            files.push(path);
        }
    }

    Ok(sort_file_list(files))
}
