use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    certdash::cli::start().await
}
