use super::*;

#[derive(Debug, Parser)]
#[command(name = "lode", about = "SHA-256 Stratum mining pool server", version)]
pub(crate) struct Arguments {
    #[command(flatten)]
    pub(crate) options: Options,
    #[command(subcommand)]
    pub(crate) subcommand: Subcommand,
}

impl Arguments {
    pub(crate) async fn run(self, cancel: CancellationToken) -> Result {
        self.subcommand.run(self.options, cancel).await
    }
}
