use {
    crate::{atmosphere::AtmosphereParameters, newton::NewtonSettings},
    serde::{Deserialize, Serialize},
    std::path::PathBuf,
};

/// Run parameters
#[derive(Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub atmosphere: AtmosphereParameters,
    pub domain: DomainParameters,
    pub tt_to_ft: TtToFt,
    pub environment: Environment,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainParameters {
    /// Fourier modes in x
    pub horizontal_resolution: usize,
    /// Chebyshev points in z
    pub vertical_resolution: usize,
    /// Width over height
    pub aspect: f64,
}

impl Default for DomainParameters {
    fn default() -> Self {
        DomainParameters {
            horizontal_resolution: 128,
            vertical_resolution: 64,
            aspect: 4.0,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TtToFt {
    /// Directory of the truncated run to seed from
    pub truncated_run: PathBuf,
    /// Simulation time to average statistics over
    pub averaging_time: f64,
    pub newton: NewtonSettings,
}

impl Default for TtToFt {
    fn default() -> Self {
        TtToFt {
            truncated_run: PathBuf::from("tt_run"),
            averaging_time: 50.0,
            newton: NewtonSettings::default(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Where the full run's initial state and the TT-to-FT products are written
    pub output_directory: PathBuf,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            output_directory: PathBuf::from("ft_run"),
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, std::fs::File};

    #[test]
    fn defaults() {
        assert_eq!(
            Parameters::default(),
            serde_yaml::from_reader::<_, Parameters>(
                File::open("src/testdata/defaults.yaml").unwrap()
            )
            .unwrap()
        );
    }

    #[test]
    fn missing_sections_take_defaults() {
        let params = serde_yaml::from_str::<Parameters>(
            "tt_to_ft:\n  truncated_run: runs/tt\n  averaging_time: 10.0\n  newton:\n    tolerance: 1.0e-8\n    max_iterations: 20\n",
        )
        .unwrap();

        assert_eq!(params.atmosphere, AtmosphereParameters::default());
        assert_eq!(params.domain, DomainParameters::default());
        assert_eq!(params.tt_to_ft.truncated_run, PathBuf::from("runs/tt"));
        assert_eq!(params.tt_to_ft.newton.max_iterations, 20);
    }

    #[test]
    fn atmosphere_is_tagged() {
        let atmosphere = serde_yaml::from_str::<AtmosphereParameters>(
            "type: polytrope\nn_rho: 5.0\nepsilon: 1.0e-4\ngamma: 1.4\ngas_constant: 1.0\nheight: 2.0\n",
        )
        .unwrap();

        assert_eq!(atmosphere.height(), 2.0);
        assert!(serde_yaml::from_str::<AtmosphereParameters>("type: isothermal\n").is_err());
    }
}
