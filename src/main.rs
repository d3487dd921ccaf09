#[tokio::main]
async fn main() -> anyhow::Result<()> {
    asset_aggregator_lib::run().await
}
