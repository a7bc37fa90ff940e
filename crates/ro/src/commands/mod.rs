pub mod grf;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle GRF containers
    Grf {
        #[command(subcommand)]
        command: grf::GrfCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Grf { command } => command.handle(),
        }
    }
}
