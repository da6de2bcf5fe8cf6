//! setu-link device probe
//!
//! Small diagnostic: attach to the configured bridge, report its FPGA
//! version and build date, and wait briefly for PTP synchronization.

use setu_link::{AppConfig, DeviceSession, Result, Timeout};
use std::env;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `setu-link <path>` (positional)
/// - `setu-link --config <path>` (flag-based)
/// - `setu-link -c <path>` (short flag)
///
/// Defaults to `/etc/setu-link.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/setu-link.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = AppConfig::from_file(&config_path)?;

    // RUST_LOG still wins over the configured level
    let target = match config.logging.output.as_str() {
        "stdout" => env_logger::Target::Stdout,
        _ => env_logger::Target::Stderr,
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .target(target)
    .init();
    log::info!("Using config: {}", config_path);

    let device_info = config.device.device_info()?;
    log::info!(
        "Probing device {} at {}:{}",
        device_info.serial_number,
        device_info.peer_ip,
        device_info.control_port
    );

    let session = DeviceSession::new(device_info).with_timeouts(config.timeouts);
    session.start()?;

    let version = session.fpga_version()?;
    let date = session.fpga_date()?;
    println!("fpga_version: {version:#x}");
    println!("fpga_date:    {date:#x}");

    let synchronized = session.ptp_synchronize(Timeout::new(
        std::time::Duration::from_secs(2),
        std::time::Duration::from_millis(100),
    ))?;
    println!("ptp_synchronized: {synchronized}");

    session.stop();
    Ok(())
}
