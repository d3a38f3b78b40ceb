mod command;
mod error;
mod frame;
mod mailer;
mod monitor;
mod status;
mod transport;
mod ups;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use command::Command;
use monitor::{Monitor, MonitorSettings};
use transport::{Parity, PortSettings};
use ups::{Reply, UPS};

const MAILER_CONFIG: &str = "mailer.toml";

#[derive(Deserialize, Serialize, Debug, Default, PartialEq)]
struct Settings {
    port: PortSettings,
    monitor: MonitorSettings,
}

/// Talk to a Megatec protocol UPS over a serial line.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Settings file, merged over the built in defaults.
    #[clap(short, long, default_value = "megatec.toml")]
    config: PathBuf,

    #[clap(flatten)]
    port: PortArgs,

    #[clap(subcommand)]
    action: Option<Action>,
}

/// Serial options that override the settings file when given.
#[derive(clap::Args, Serialize, Debug, Default)]
struct PortArgs {
    /// Serial device that has a Megatec UPS connected to it.
    #[clap(long = "dev")]
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<String>,

    #[clap(long = "baud")]
    #[serde(skip_serializing_if = "Option::is_none")]
    baud_rate: Option<u32>,

    #[clap(long = "dbits")]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_bits: Option<u8>,

    #[clap(long = "sbits")]
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_bits: Option<u8>,

    #[clap(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    parity: Option<Parity>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Action {
    /// Print the current status as JSON.
    Query,
    /// Run a ten second self test.
    Test,
    /// Run a self test for the given minutes.
    TestFor { minutes: u32 },
    /// Run a self test until the battery is low.
    TestUntilLow,
    CancelTest,
    ToggleBeeper,
    /// Shut the UPS output down after a delay in minutes.
    Shutdown {
        delay: f32,
        /// Minutes after shutdown to restore output.
        #[clap(long)]
        restore: Option<u32>,
    },
    CancelShutdown,
    /// Print the manufacturer, model and firmware version as JSON.
    Info,
    /// Print the rated values as JSON.
    Rating,
    /// Poll the UPS, logging and mailing status changes.
    Monitor,
}

impl Action {
    fn command(self) -> Option<Command> {
        Some(match self {
            Action::Query => Command::Query,
            Action::Test => Command::Test,
            Action::TestFor { minutes } => Command::TestFor { minutes },
            Action::TestUntilLow => Command::TestUntilLow,
            Action::CancelTest => Command::CancelTest,
            Action::ToggleBeeper => Command::ToggleBeeper,
            Action::Shutdown {
                delay,
                restore: None,
            } => Command::Shutdown { delay },
            Action::Shutdown {
                delay,
                restore: Some(restore),
            } => Command::ShutdownRestore { delay, restore },
            Action::CancelShutdown => Command::CancelShutdown,
            Action::Info => Command::Info,
            Action::Rating => Command::Rating,
            Action::Monitor => return None,
        })
    }
}

fn load_settings(config: &Path, overrides: &PortArgs) -> Result<Settings, figment::Error> {
    Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file(config))
        .merge(Serialized::default("port", overrides))
        .extract()
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&cli.config, &cli.port)
        .with_context(|| format!("Failed to read config {}", cli.config.display()))?;
    log::debug!("{:#?}", settings);

    let mut ups = UPS::open(&settings.port)
        .with_context(|| format!("Failed to open UPS on {}", settings.port.device))?;

    let action = cli.action.unwrap_or(Action::Query);
    let res = match action.command() {
        Some(command) => execute(&mut ups, command),
        None => watch(&mut ups, settings.monitor),
    };

    ups.close();
    res
}

fn execute(ups: &mut UPS<Box<dyn serialport::SerialPort>>, command: Command) -> anyhow::Result<()> {
    match ups
        .execute(command)
        .with_context(|| format!("UPS command {:?} failed", command))?
    {
        Reply::Ack => log::info!("UPS accepted {:?}.", command),
        reply => println!("{}", serde_json::to_string(&reply)?),
    }
    Ok(())
}

fn watch(ups: &mut UPS<Box<dyn serialport::SerialPort>>, settings: MonitorSettings) -> anyhow::Result<()> {
    let mailer = match mailer::MailerSettings::load(Path::new(MAILER_CONFIG))
        .context("Failed to read smtp config")?
    {
        Some(mailer_settings) => Some(mailer::Mailer::new(mailer_settings)?),
        None => {
            log::info!("No {} found, email alerts disabled.", MAILER_CONFIG);
            None
        }
    };

    Monitor::new(ups, settings, mailer.as_ref())
        .context("Invalid monitor shutdown settings")?
        .run()
        .context("UPS monitor stopped")
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
