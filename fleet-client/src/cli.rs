use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use crate::commands::{self, Context};
use crate::config::Config;
use crate::provision::{
    self, Collaborators, InitRequest, ReconfigureRequest,
    privileged::Elevator,
    stage::ProcessStageInvoker,
};
use crate::server::FleetApi;
use crate::util::{
    format, logging,
    shutdown::{SHUTDOWN, until_shutdown},
};

#[derive(Parser)]
#[command(name = "fleet")]
#[command(version, about = "Provision and configure devices of a fleet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read and write the config.json of a provisioned device
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Device provisioning and management commands
    #[command(subcommand)]
    Device(DeviceCommands),

    /// List devices
    Devices {
        /// Only devices of this application
        #[arg(short, long, visible_alias = "app")]
        application: Option<String>,
    },

    /// List applications
    Apps,

    /// OS image stages used by `device init`
    #[command(subcommand)]
    Os(OsCommands),

    /// Show version information
    Version,
}

#[derive(Args, Clone)]
struct DriveOpts {
    /// Device type
    #[arg(short = 't', long = "type")]
    device_type: String,

    /// Drive or boot filesystem of the device
    #[arg(short, long)]
    drive: Option<PathBuf>,
}

impl From<DriveOpts> for commands::config::DriveArgs {
    fn from(opts: DriveOpts) -> Self {
        Self {
            device_type: opts.device_type,
            drive: opts.drive,
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Read the config.json of a provisioned device
    Read {
        #[command(flatten)]
        drive: DriveOpts,
    },

    /// Set one dotted key in the config.json of a provisioned device
    Write {
        key: String,
        value: String,
        #[command(flatten)]
        drive: DriveOpts,
    },

    /// Replace the config.json of a provisioned device with a local file
    Inject {
        file: PathBuf,
        #[command(flatten)]
        drive: DriveOpts,
    },

    /// Re-run configuration of a provisioned device
    Reconfigure {
        #[command(flatten)]
        drive: DriveOpts,
        /// Show advanced options
        #[arg(short = 'v', long)]
        advanced: bool,
    },

    /// Generate a config.json for a device or an application
    Generate {
        /// Device UUID
        #[arg(long)]
        device: Option<String>,
        /// Application name
        #[arg(short, long, visible_alias = "app")]
        application: Option<String>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// Download, register, configure and flash a new device
    Init {
        #[arg(short, long, visible_alias = "app")]
        application: Option<String>,
        /// Drive to flash; asked interactively when omitted
        #[arg(short, long)]
        drive: Option<PathBuf>,
        /// Show advanced configuration options
        #[arg(short = 'v', long)]
        advanced: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Register a device under an application
    Register {
        application: String,
        #[arg(short, long)]
        uuid: Option<String>,
    },

    /// Show a device
    Info { uuid: String },

    /// Remove a device
    Rm {
        uuid: String,
        #[arg(short, long)]
        yes: bool,
    },

    /// Rename a device
    Rename { uuid: String, name: Option<String> },

    /// Blink the identification LED of a device
    Identify { uuid: String },

    /// Reboot a device
    Reboot { uuid: String },
}

#[derive(Subcommand)]
enum OsCommands {
    /// Download the OS image of a device type
    Download {
        device_type: String,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write the config.json of a device into an image
    Configure {
        image: PathBuf,
        uuid: String,
        #[arg(short = 'v', long)]
        advanced: bool,
    },

    /// Write an image to a drive
    Initialize {
        image: PathBuf,
        #[arg(short = 't', long = "type")]
        device_type: String,
        #[arg(short, long)]
        drive: Option<PathBuf>,
        #[arg(short, long)]
        yes: bool,
    },
}

fn print_json(document: &fleet_shared::config::ConfigDocument) -> Result<()> {
    println!("{}", document.to_json_pretty()?);
    Ok(())
}

pub async fn cli() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("fleet version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load()?;
    logging::init_tracing(&config.log_level);
    let ctx = Context::new(config)?;

    let self_managed = stops_own_stages(&cli.command);
    let work = run_command(&ctx, cli.command);
    if self_managed {
        return work.await;
    }
    until_shutdown(&SHUTDOWN, work)
        .await
        .unwrap_or_else(|| Err(anyhow!("interrupted")))
}

/// Commands that stop their stage processes on Ctrl+C and clean up after
/// them, instead of being dropped mid-flight.
fn stops_own_stages(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Device(DeviceCommands::Init { .. })
            | Commands::Config(ConfigCommands::Reconfigure { .. })
    )
}

async fn run_command(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Config(cmd) => config_command(ctx, cmd).await?,
        Commands::Device(cmd) => device_command(ctx, cmd).await?,
        Commands::Devices { application } => {
            let devices = ctx.api.devices(application.as_deref()).await?;
            format::print_devices_table(&devices);
        }
        Commands::Apps => {
            let applications = ctx.api.applications().await?;
            format::print_applications_table(&applications);
        }
        Commands::Os(cmd) => os_command(ctx, cmd).await?,
        Commands::Version => {}
    }

    Ok(())
}

async fn config_command(ctx: &Context, cmd: ConfigCommands) -> Result<()> {
    let blob = ctx.blob();
    match cmd {
        ConfigCommands::Read { drive } => {
            let document = commands::config::read(&blob, &ctx.prompter, drive.into()).await?;
            print_json(&document)?;
        }
        ConfigCommands::Write { key, value, drive } => {
            commands::config::write(&blob, &ctx.prompter, drive.into(), &key, &value).await?;
            println!("Done");
        }
        ConfigCommands::Inject { file, drive } => {
            commands::config::inject(&blob, &ctx.prompter, drive.into(), &file).await?;
            println!("Done");
        }
        ConfigCommands::Reconfigure { drive, advanced } => {
            let stages = ProcessStageInvoker::current(&ctx.config)?;
            provision::reconfigure(
                &blob,
                &stages,
                &ctx.prompter,
                ReconfigureRequest {
                    device_type: drive.device_type,
                    drive: drive.drive,
                    advanced,
                },
                &SHUTDOWN,
            )
            .await?;
            println!("Done");
        }
        ConfigCommands::Generate {
            device,
            application,
            output,
        } => {
            let request = commands::config::GenerateRequest {
                device,
                application,
                output,
            };
            let document = commands::config::generate(
                &ctx.api,
                &ctx.prompter,
                ctx.config.api_url(),
                &request,
            )
            .await?;
            if request.output.is_none() {
                print_json(&document)?;
            }
        }
    }
    Ok(())
}

async fn device_command(ctx: &Context, cmd: DeviceCommands) -> Result<()> {
    match cmd {
        DeviceCommands::Init {
            application,
            drive,
            advanced,
            yes,
        } => {
            let stages = ProcessStageInvoker::current(&ctx.config)?;
            let elevator = Elevator::from_config(stages.exe().clone(), &ctx.config);
            let uuid = commands::device::init(
                Collaborators {
                    api: &ctx.api,
                    stages: &stages,
                    elevator: &elevator,
                    prompter: &ctx.prompter,
                },
                InitRequest {
                    application,
                    drive,
                    advanced,
                    yes,
                },
                SHUTDOWN.clone(),
            )
            .await?;
            println!("{}", uuid);
        }
        DeviceCommands::Register { application, uuid } => {
            let device = commands::device::register(&ctx.api, &application, uuid).await?;
            println!("{}", device.uuid);
        }
        DeviceCommands::Info { uuid } => {
            let device = ctx.api.device(&uuid).await?;
            format::print_device(&device);
        }
        DeviceCommands::Rm { uuid, yes } => {
            commands::device::remove(&ctx.api, &ctx.prompter, &uuid, yes).await?
        }
        DeviceCommands::Rename { uuid, name } => {
            commands::device::rename(&ctx.api, &ctx.prompter, &uuid, name).await?
        }
        DeviceCommands::Identify { uuid } => ctx.api.identify_device(&uuid).await?,
        DeviceCommands::Reboot { uuid } => ctx.api.reboot_device(&uuid).await?,
    }
    Ok(())
}

async fn os_command(ctx: &Context, cmd: OsCommands) -> Result<()> {
    match cmd {
        OsCommands::Download {
            device_type,
            output,
        } => {
            commands::os::download(&ctx.api, &device_type, &output)
                .await
                .with_context(|| format!("failed to download {} image", device_type))?;
        }
        OsCommands::Configure {
            image,
            uuid,
            advanced,
        } => {
            commands::os::configure(
                &ctx.api,
                &ctx.blob(),
                &ctx.prompter,
                ctx.config.api_url(),
                &commands::os::ConfigureRequest {
                    image,
                    uuid,
                    advanced,
                },
            )
            .await?;
        }
        OsCommands::Initialize {
            image,
            device_type,
            drive,
            yes,
        } => {
            commands::os::initialize(
                &ctx.blob(),
                &ctx.prompter,
                commands::os::InitializeRequest {
                    image,
                    device_type,
                    drive,
                    yes,
                },
            )
            .await?;
        }
    }
    Ok(())
}
