use super::*;

#[derive(Debug, Parser)]
pub(crate) struct PoolCommand {}

impl PoolCommand {
    pub(crate) async fn run(self, options: Options, cancel: CancellationToken) -> Result {
        let settings = Settings::load(&options.config)?;

        info!(
            "starting pool for {} ({})",
            settings.coin.name, settings.coin.symbol
        );

        Pool::new(settings, Arc::new(AcceptAll)).run(cancel).await
    }
}
