#[macro_use]
extern crate clap;

use {
    anyhow::{bail, Result},
    fully_compressible::{
        checkpoint::{CheckpointFile, FileCheckpoint, SimulationState},
        comm::SingleProcess,
        domain::Domain,
        output::output_path,
        parameters::Parameters,
        tt_to_ft::{tt_to_ft, tt_to_ft_preliminaries, Preliminaries},
    },
    log::{error, info},
    simplelog::{Config as LogConfig, LevelFilter, TermLogger, TerminalMode},
    std::fs::{create_dir_all, File},
};

#[quit::main]
fn main() {
    let matches = clap_app!(fully_compressible =>
        (version: crate_version!())
        (@arg PARAMETERS: -p --parameters +takes_value +required "Path to file containing run parameters.")
        (@subcommand preliminaries =>
            (about: "Averages the truncated run's statistics and solves for the full-thermodynamics structure.")
        )
        (@subcommand rescale =>
            (about: "Rescales the truncated run's checkpoint onto previously computed preliminaries.")
        )
        (@subcommand tt_to_ft =>
            (about: "Computes the preliminaries and writes the rescaled initial state of the full run.")
        )
    )
    .get_matches();

    TermLogger::init(
        LevelFilter::Debug,
        LogConfig::default(),
        TerminalMode::Mixed,
    )
    .expect("Failed to initialize logger");

    let params = {
        // Should never panic as clap should return an error if the argument was not supplied
        let path = matches
            .value_of("PARAMETERS")
            .expect("Path to parameters file not supplied");

        let file = File::open(path).unwrap_or_else(|e| {
            error!("Failed to open {}: \"{}\"", path, e);
            quit::with_code(1);
        });

        let params = serde_yaml::from_reader::<_, Parameters>(file).unwrap_or_else(|e| {
            error!("Failed to parse parameters from {}: \"{}\"", path, e);
            quit::with_code(1);
        });

        info!(
            "Successfully loaded run parameters from \"{}\": \n{:#?}",
            path, params
        );

        params
    };

    run_subcommand(matches.subcommand_name(), params).unwrap_or_else(|e| {
        error!("Error: \"{}\"", e);
        quit::with_code(1);
    });
}

fn preliminaries(params: &Parameters) -> Result<Preliminaries> {
    let preliminaries = tt_to_ft_preliminaries(
        &SingleProcess,
        &params.atmosphere,
        &params.tt_to_ft.truncated_run,
        params.tt_to_ft.averaging_time,
        params.tt_to_ft.newton,
    )?;
    preliminaries.save(&params.environment.output_directory)?;

    Ok(preliminaries)
}

fn rescale(params: &Parameters, preliminaries: &Preliminaries) -> Result<()> {
    let domain = Domain::new(
        (
            params.domain.horizontal_resolution,
            params.domain.vertical_resolution,
        ),
        params.atmosphere.height(),
        params.domain.aspect,
    )?;

    let mut checkpoint = FileCheckpoint::new(domain.clone());
    let mut state = SimulationState::new(domain.layout(0, 1)?);
    let dt = tt_to_ft(
        &SingleProcess,
        &mut checkpoint,
        &mut state,
        &domain,
        preliminaries,
    )?;

    let path = output_path(
        params.environment.output_directory.join("checkpoint"),
        "checkpoint",
        1,
    );
    CheckpointFile::from_state(&state, checkpoint.sim_time, dt, checkpoint.iteration)?
        .write(&path)?;

    info!(
        "Wrote FT initial state to {}; start with dt = {} and Ra multiplied by {}",
        path.display(),
        dt,
        preliminaries.ft_ra_factor
    );

    Ok(())
}

fn run_subcommand(subcmd: Option<&str>, params: Parameters) -> Result<()> {
    let subcmd = match subcmd {
        Some(s) => s,
        None => bail!("No subcommand selected"),
    };

    create_dir_all(&params.environment.output_directory)?;

    info!("Starting {}", subcmd);

    match subcmd {
        "preliminaries" => {
            preliminaries(&params)?;
        }
        "rescale" => {
            let preliminaries = Preliminaries::load(&params.environment.output_directory)?;
            rescale(&params, &preliminaries)?;
        }
        "tt_to_ft" => {
            let preliminaries = preliminaries(&params)?;
            rescale(&params, &preliminaries)?;
        }
        _ => {
            // Should be unreachable due to clap catching this error
            bail!("Unrecognized subcommand");
        }
    }

    info!("Finished {}", subcmd);

    Ok(())
}
