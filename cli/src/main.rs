//! uptimemon CLI — inspect monitor configuration and guardian sets.
//!
//! Usage:
//! ```bash
//! uptimemon info
//! uptimemon guardians
//! uptimemon config
//! ```

use std::env;
use std::process;

use uptimemon_core::{GuardianDirectory, MonitorConfig};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "guardians" => cmd_guardians(),
        "config" => cmd_config(),
        "version" | "--version" | "-V" => {
            println!("uptimemon {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("uptimemon {}", env!("CARGO_PKG_VERSION"));
    println!("Guardian uptime monitor for cross-chain messages\n");
    println!("USAGE:");
    println!("    uptimemon <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info       Show monitor configuration info");
    println!("    guardians  List the bundled mainnet guardian set");
    println!("    config     Print the default configuration as JSON");
    println!("    version    Print version");
    println!("    help       Print this help");
}

fn cmd_info() {
    let config = MonitorConfig::default();
    println!("uptimemon v{}", env!("CARGO_PKG_VERSION"));
    println!("  Expiry window: {}h", config.expiry_secs / 3600);
    println!("  Flush: every {}s or {} observations", config.flush_interval_secs, config.flush_batch_size);
    println!("  Sweep interval: {}s", config.sweep_interval_secs);
    println!("  Cleanup interval: {}h", config.cleanup_interval_secs / 3600);
    println!("  Storage backends: RocksDB (feature: rocks), PostgreSQL (feature: postgres)");
    println!("  Guardians: {} (mainnet set)", GuardianDirectory::mainnet().len());
}

fn cmd_guardians() {
    let directory = GuardianDirectory::mainnet();
    for entry in uptimemon_core::guardian::mainnet_entries() {
        println!("{:>3}  {:<20} {}", entry.index, entry.name, entry.address);
    }
    println!("\n{} guardians", directory.len());
}

fn cmd_config() {
    let config = MonitorConfig::default();
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("failed to render config: {e}");
            process::exit(1);
        }
    }
}
