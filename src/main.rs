use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    fnvsanity::cli::run().await
}
