//! ---
//! renew_section: "05-networking-external-interfaces"
//! renew_subsection: "binary"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Entrypoint of renewctl, the operator CLI for inspecting Renew update state."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use renew_logging as logging;
use renew_versioning::VersionInfo;

mod update;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Renew administrative control utility",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Update inspection actions")]
    Update(update::UpdateCommand),
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    match cli.command {
        Some(Commands::Update(cmd)) => update::run(cmd)?,
        None => println!("{}", VersionInfo::current().cli_string()),
    }
    Ok(())
}
