//! Grids, per-process layouts and the few spectral operations the rescaling
//! pipeline needs: vertical differentiation, boundary values and
//! interpolation on a Chebyshev column, and building horizontally constant
//! coefficient fields from vertical profiles.

use {
    crate::error::{Error, Result},
    ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis},
    serde::{Deserialize, Serialize},
    std::{f64::consts::PI, ops::Range},
};

/// Chebyshev-Gauss-Lobatto basis on `[bottom, top]`, grid stored bottom to top
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chebyshev {
    pub interval: (f64, f64),
    grid: Array1<f64>,
    // Barycentric interpolation weights
    weights: Array1<f64>,
    derivative: Array2<f64>,
}

impl Chebyshev {
    pub fn new(size: usize, interval: (f64, f64)) -> Result<Self> {
        let (bottom, top) = interval;

        if size < 3 {
            return Err(Error::Layout(format!(
                "a Chebyshev column needs at least 3 points, got {}",
                size
            )));
        }
        if !bottom.is_finite() || !top.is_finite() || top <= bottom {
            return Err(Error::Configuration(format!(
                "invalid vertical interval [{}, {}]",
                bottom, top
            )));
        }

        let n = (size - 1) as f64;
        let half = 0.5 * (top - bottom);

        // sin form keeps the nodes exactly symmetric about the midpoint
        let grid = Array1::from_shape_fn(size, |j| {
            let t = (PI * (2.0 * j as f64 - n) / (2.0 * n)).sin();
            bottom + half * (1.0 + t)
        });

        let weights = Array1::from_shape_fn(size, |j| {
            let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
            if j == 0 || j == size - 1 {
                0.5 * sign
            } else {
                sign
            }
        });

        let mut derivative = Array2::<f64>::zeros((size, size));
        for i in 0..size {
            let mut diagonal = 0.0;
            for j in 0..size {
                if i != j {
                    let d = (weights[j] / weights[i]) / (grid[i] - grid[j]);
                    derivative[[i, j]] = d;
                    diagonal -= d;
                }
            }
            derivative[[i, i]] = diagonal;
        }

        Ok(Chebyshev {
            interval,
            grid,
            weights,
            derivative,
        })
    }

    pub fn size(&self) -> usize {
        self.grid.len()
    }

    pub fn grid(&self) -> ArrayView1<f64> {
        self.grid.view()
    }

    /// Collocation differentiation matrix, `d/dz` in physical units
    pub fn derivative_matrix(&self) -> ArrayView2<f64> {
        self.derivative.view()
    }

    /// Samples a closed-form profile on the grid
    pub fn profile<F: Fn(f64) -> f64>(&self, f: F) -> Array1<f64> {
        self.grid.mapv(f)
    }

    pub fn differentiate(&self, values: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_len(values.len())?;
        Ok(self.derivative.dot(&values))
    }

    /// Differentiates every column of an `(x, z)` field along z
    pub fn differentiate_columns(&self, field: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_len(field.len_of(Axis(1)))?;
        Ok(field.dot(&self.derivative.t()))
    }

    pub fn left(&self, values: ArrayView1<f64>) -> Result<f64> {
        self.check_len(values.len())?;
        Ok(values[0])
    }

    pub fn right(&self, values: ArrayView1<f64>) -> Result<f64> {
        self.check_len(values.len())?;
        Ok(values[values.len() - 1])
    }

    /// Evaluates the interpolating polynomial of `values` at `z`
    pub fn interpolate(&self, values: ArrayView1<f64>, z: f64) -> Result<f64> {
        self.check_len(values.len())?;

        let (bottom, top) = self.interval;
        if !(bottom..=top).contains(&z) {
            return Err(Error::Layout(format!(
                "z = {} lies outside [{}, {}]",
                z, bottom, top
            )));
        }

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for ((zj, wj), fj) in self.grid.iter().zip(&self.weights).zip(values.iter()) {
            let dz = z - zj;
            if dz == 0.0 {
                return Ok(*fj);
            }
            let c = wj / dz;
            numerator += c * fj;
            denominator += c;
        }

        Ok(numerator / denominator)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.size() {
            return Err(Error::Layout(format!(
                "profile has {} points, column has {}",
                len,
                self.size()
            )));
        }
        Ok(())
    }
}

/// Periodic basis on `[left, right)` with a uniform grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fourier {
    pub size: usize,
    pub interval: (f64, f64),
}

impl Fourier {
    pub fn new(size: usize, interval: (f64, f64)) -> Result<Self> {
        if size == 0 {
            return Err(Error::Layout("a Fourier basis needs at least 1 point".into()));
        }
        if !(interval.1 > interval.0) {
            return Err(Error::Configuration(format!(
                "invalid horizontal interval [{}, {})",
                interval.0, interval.1
            )));
        }
        Ok(Fourier { size, interval })
    }

    pub fn length(&self) -> f64 {
        self.interval.1 - self.interval.0
    }

    pub fn grid(&self) -> Array1<f64> {
        let dx = self.length() / self.size as f64;
        Array1::from_shape_fn(self.size, |i| self.interval.0 + dx * i as f64)
    }
}

/// Portion of the global `(x, z)` grid owned by one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    pub x: Range<usize>,
    pub z: Range<usize>,
}

impl GridLayout {
    pub fn shape(&self) -> (usize, usize) {
        (self.x.len(), self.z.len())
    }
}

/// Cartesian box: Fourier in x, Chebyshev in z on `[0, height]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub x: Fourier,
    pub z: Chebyshev,
}

impl Domain {
    /// Box running over `[-height*aspect/2, height*aspect/2) x [0, height]`
    pub fn new(resolution: (usize, usize), height: f64, aspect: f64) -> Result<Self> {
        if !(aspect > 0.0) {
            return Err(Error::Configuration(format!("invalid aspect ratio {}", aspect)));
        }
        let half_width = 0.5 * height * aspect;

        Ok(Domain {
            x: Fourier::new(resolution.0, (-half_width, half_width))?,
            z: Chebyshev::new(resolution.1, (0.0, height))?,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x.size, self.z.size())
    }

    /// Grid-space layout of `rank` among `size` processes.
    ///
    /// x is split into contiguous blocks so every process holds whole vertical
    /// columns; the first `nx % size` ranks take one extra point.
    pub fn layout(&self, rank: usize, size: usize) -> Result<GridLayout> {
        let nx = self.x.size;

        if size == 0 || rank >= size {
            return Err(Error::Layout(format!("rank {} of {} processes", rank, size)));
        }
        if size > nx {
            return Err(Error::Layout(format!(
                "{} processes cannot share {} horizontal points",
                size, nx
            )));
        }

        let base = nx / size;
        let extra = nx % size;
        let start = rank * base + rank.min(extra);
        let len = base + if rank < extra { 1 } else { 0 };

        Ok(GridLayout {
            x: start..start + len,
            z: 0..self.z.size(),
        })
    }

    /// Non-constant coefficient that varies only in z, restricted to `layout`
    pub fn ncc(&self, profile: ArrayView1<f64>, layout: &GridLayout) -> Result<Array2<f64>> {
        if profile.len() != self.z.size() {
            return Err(Error::Layout(format!(
                "profile has {} points, domain has {} in z",
                profile.len(),
                self.z.size()
            )));
        }

        let local = profile.slice(ndarray::s![layout.z.clone()]);
        Ok(local
            .broadcast((layout.x.len(), layout.z.len()))
            .ok_or_else(|| Error::Layout("cannot broadcast profile over layout".into()))?
            .to_owned())
    }
}
