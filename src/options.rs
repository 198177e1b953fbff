use super::*;

#[derive(Clone, Debug, Parser)]
pub(crate) struct Options {
    #[arg(
        long,
        default_value = "config.json",
        help = "Load pool configuration from <CONFIG>."
    )]
    pub(crate) config: PathBuf,
}
