use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    vidgen_app::run_from_env().await
}
