#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = gradeboard::run().await {
        eprintln!("gradeboard fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
