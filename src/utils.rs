use {
    crate::error::{Error, Result},
    byteorder::{ByteOrder, LittleEndian},
    std::{fs::File, io::Write, path::Path},
};

#[cfg(test)]
use {
    crate::output::{output_path, OutputFile, BASE_SCALE},
    ndarray::Array2,
    std::fs::create_dir_all,
};

/// Writes `values` as raw little-endian f64s, preceded by one zero record
pub fn write_r8<P: AsRef<Path>>(path: P, values: &[f64]) -> Result<()> {
    let path = path.as_ref();

    let mut bytes = vec![0u8; 8 * (values.len() + 1)];
    for (chunk, x) in bytes.chunks_mut(8).skip(1).zip(values) {
        LittleEndian::write_f64(chunk, *x);
    }

    File::create(path)
        .and_then(|mut f| f.write_all(&bytes))
        .map_err(Error::io(path))
}

#[cfg(test)]
pub(crate) fn assert_approx_eq_slice(a: &[f64], b: &[f64], epsilon: f64) {
    assert_eq!(a.len(), b.len());
    for (i, e) in a.iter().enumerate() {
        approx::assert_abs_diff_eq!(*e, b[i], epsilon = epsilon);
    }
}

/// Writes one output file of `tasks` sampled at `times` into `dir`
#[cfg(test)]
pub(crate) fn write_outputs(
    dir: &Path,
    stem: &str,
    index: u64,
    times: &[f64],
    vertical_grid: Option<Vec<f64>>,
    tasks: Vec<(&str, Array2<f64>)>,
) {
    create_dir_all(dir).unwrap();

    let mut file = OutputFile::default();
    file.scales.sim_time = times.to_vec();
    if let Some(grid) = vertical_grid {
        file.scales.z.insert(BASE_SCALE.to_owned(), grid);
    }
    for (name, data) in tasks {
        file.tasks.insert(name.to_owned(), data);
    }

    file.write(output_path(dir, stem, index)).unwrap();
}

/// Writes `<run>/scalar/scalar_s<index>.bin` with one value per write per task
#[cfg(test)]
pub(crate) fn write_scalar_outputs(
    run: &Path,
    index: u64,
    times: &[f64],
    tasks: Vec<(&str, Vec<f64>)>,
) {
    let tasks = tasks
        .into_iter()
        .map(|(name, values)| {
            let n = values.len();
            (name, Array2::from_shape_vec((n, 1), values).unwrap())
        })
        .collect();

    write_outputs(&run.join("scalar"), "scalar", index, times, None, tasks);
}
