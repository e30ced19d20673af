#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = gradeboard::run_report_cli().await {
        eprintln!("gradeboard-report fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
