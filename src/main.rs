use anyhow::Context;
use rask_log_shipper::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let report = app::main().await.context("rask-log-shipper failed")?;
    if report.abandoned_lines > 0 {
        eprintln!(
            "rask-log-shipper: {} line(s) in {} batch(es) were not delivered",
            report.abandoned_lines, report.abandoned_batches
        );
    }
    // The stdin reader may still be parked in a blocking read
    std::process::exit(0)
}
