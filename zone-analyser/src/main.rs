/*!
Zone analyser for a single monitor
*/

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zone_analyser::{AnalyserConfig, MonitorSession, SessionSummary};

fn print_summary(summary: &SessionSummary, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{}", summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("zone-analyser")
        .version(clap::crate_version!())
        .about("Loads detection plugins and configures them for a monitor's zones")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Analyser configuration file (TOML)")
                .value_name("FILE")
                .required(true)
        )
        .arg(
            Arg::new("monitor")
                .short('m')
                .long("monitor")
                .help("Monitor id, overrides the configuration file")
                .value_name("ID")
                .value_parser(value_parser!(u32))
        )
        .arg(
            Arg::new("db")
                .short('d')
                .long("db")
                .help("Path to the zone configuration database")
                .value_name("PATH")
        )
        .arg(
            Arg::new("plugins")
                .short('p')
                .long("plugins")
                .help("Directory to load plugin modules from")
                .value_name("DIR")
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the session summary as JSON")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("watch")
                .short('w')
                .long("watch")
                .help("Reload the monitor periodically until interrupted")
                .action(ArgAction::SetTrue)
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from).unwrap_or_default();
    let mut config = AnalyserConfig::load(&config_path)?;

    if let Some(&monitor) = matches.get_one::<u32>("monitor") {
        config.monitor.id = monitor;
    }
    if let Some(db) = matches.get_one::<String>("db") {
        config.store.path = PathBuf::from(db);
    }
    if let Some(dir) = matches.get_one::<String>("plugins") {
        config.plugins.dir = PathBuf::from(dir);
    }
    let json = matches.get_flag("json");
    let watch = matches.get_flag("watch");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let monitor_id = config.monitor.id;
    let interval = config.reload_interval();
    let mut session = MonitorSession::open(config)?;

    let summary = session.start()?;
    print_summary(&summary, json)?;

    if !watch {
        return Ok(());
    }

    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match session.reload() {
                    Ok(summary) => print_summary(&summary, json)?,
                    Err(e) => error!("Reload of monitor {} failed: {}", monitor_id, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown");
                break;
            }
        }
    }

    Ok(())
}
