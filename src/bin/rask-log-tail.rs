use anyhow::Context;
use rask_log_shipper::app::TailApp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = TailApp::from_args(std::env::args_os()).context("invalid arguments")?;
    app.run().await.context("rask-log-tail failed")?;
    Ok(())
}
