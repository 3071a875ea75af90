use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use vn_sim::vn_config::{run_scenario, ExitStatus, ScenarioConfig};
use vn_sim::vn_trace::ConsoleTraceSink;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    SimpleLogger::new().with_level(LevelFilter::Info).init()?;

    info!("starting");

    let config = ScenarioConfig::two_lan_vpn();
    match run_scenario(&config, None, Box::new(ConsoleTraceSink::new(true))) {
        Ok(report) => {
            report.print_summary();
            Ok(())
        }
        Err(e) => {
            error!("setup failed: {}", e);
            std::process::exit(ExitStatus::SetupFailure.code());
        }
    }
}
