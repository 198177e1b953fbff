use super::*;

mod pool;

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Subcommand {
    #[command(about = "Run the stratum pool server")]
    Pool(pool::PoolCommand),
}

impl Subcommand {
    pub(crate) async fn run(self, options: Options, cancel: CancellationToken) -> Result {
        match self {
            Subcommand::Pool(command) => command.run(options, cancel).await,
        }
    }
}
