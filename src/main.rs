use ordersweep::SweepError;
use ordersweep::config::{fetch_config, sweep_tasks};
use ordersweep::credentials::populate_env_from_keychain;
use ordersweep::sweep::Sweep;

#[tokio::main]
async fn main() -> Result<(), SweepError> {
    // Initialize tracing subscriber for logging output.
    tracing_subscriber::fmt::init();

    populate_env_from_keychain()?;
    let app_config = fetch_config()?;
    let tasks = sweep_tasks(std::env::args().skip(1))?;

    let sweep = Sweep::from_config(app_config)?;
    let report = sweep.run(tasks).await;

    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}
