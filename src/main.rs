use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use rm3100_runmag::cli::Cli;
use rm3100_runmag::clock::SystemClock;
use rm3100_runmag::config::Config;
use rm3100_runmag::output::gain_table;
use rm3100_runmag::runner::Runner;
use rm3100_runmag::sbc::list_known_buses;

#[cfg(not(any(feature = "real-sensors", feature = "fake-sensors")))]
compile_error!("activer la feature `real-sensors` ou `fake-sensors`");

#[cfg(feature = "fake-sensors")]
fn open_bus(bus: u8) -> Result<rm3100_runmag::sensors::sim::SimBus> {
    use rm3100_runmag::sensors::sim::SimBus;

    debug!("[I2C] Bus {} simulé [FAKE]", bus);
    // ~ champ terrestre (10, -2.5, 22.5) µT à gain 150
    Ok(SimBus::new().with_sample([1500, -375, 3375]).with_noise())
}

#[cfg(all(feature = "real-sensors", not(feature = "fake-sensors")))]
fn open_bus(bus: u8) -> Result<rm3100_runmag::i2c::BusHandle> {
    rm3100_runmag::i2c::BusHandle::open(bus).context("Ouverture du bus I2C impossible")
}

fn init_logging(args: &Cli) {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run(args: Cli) -> Result<()> {
    if args.list_buses {
        print!("{}", list_known_buses());
        return Ok(());
    }
    if args.gain_table {
        print!("{}", gain_table());
        return Ok(());
    }

    // Configuration : fichier puis ligne de commande
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::new(),
    };
    config.apply_args(&args);
    config.validate()?;

    if let Some(path) = &args.save_config {
        config.save_to_file(path)?;
        info!("[CONFIG] Configuration sauvegardée dans {:?}", path);
    }

    let mut runner = Runner::new(config.clone())?;
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let bus_number = config.bus;

    // Le bus appartient à ce seul thread, fermé à la fin de la tâche
    let mut worker = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut bus = open_bus(bus_number)?;
        runner.execute(&mut bus, &SystemClock, &worker_token)
    });

    let result = tokio::select! {
        result = &mut worker => result,
        _ = signal::ctrl_c() => {
            info!("[RUN] Signal de contrôle C reçu");
            token.cancel();
            worker.await
        }
    };

    let emitted = result.context("Tâche d'acquisition interrompue")??;
    debug!("[RUN] {} ligne(s) écrite(s)", emitted);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help et --version sortent aussi par ici
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[RUNMAG] Erreur: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
