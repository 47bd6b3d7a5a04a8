use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How often contacts past the retention window are dropped
const EXPIRY_PERIOD: Duration = Duration::from_secs(60 * 60);

#[derive(clap::Parser)]
#[command(name = "yct-hub")]
#[command(about = "YCT contact tracer device, simulated on the host")]
struct Cli {
    /// Data directory, defaults to ~/.yct
    #[arg(long, env = "YCT_HOME", global = true)]
    home: Option<PathBuf>,
    /// Identity of the simulated device
    #[arg(long, default_value = "ESP32-HUB", global = true)]
    device_name: String,
    /// Broker account owning the feeds
    #[arg(long, default_value = "yct", global = true)]
    io_username: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the web server
    Run {
        #[arg(long, default_value = "127.0.0.1:9000")]
        listen: std::net::SocketAddr,
        /// Network reported by the scan page, repeatable
        #[arg(long = "network")]
        networks: Vec<String>,
    },
    /// Erase the flash and recreate the default documents
    Format,
    /// Print the health status, contacts and positive list
    Status,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli: Cli = clap::Parser::parse();
    let yct_home = match cli.home.or_else(|| dirs::home_dir().map(|h| h.join(".yct"))) {
        Some(home) => home,
        None => {
            eprintln!("Could not determine home directory, set YCT_HOME");
            std::process::exit(1);
        }
    };

    let networks = match &cli.command {
        Commands::Run { networks, .. } => networks.clone(),
        _ => Vec::new(),
    };
    let mut hub = match yct_hub::Hub::open(
        &yct_home,
        yct_hub::Settings {
            device_name: cli.device_name,
            io_username: cli.io_username,
            networks,
        },
    ) {
        Ok(hub) => hub,
        Err(e) => {
            eprintln!("Failed to open {}: {e}", yct_home.display());
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Run { listen, .. } => {
            let hub = Arc::new(tokio::sync::Mutex::new(hub));
            tokio::spawn(yct_hub::run_expiry(hub.clone(), EXPIRY_PERIOD));
            if let Err(e) = yct_hub::http::run_server(listen, hub).await {
                eprintln!("Server failed: {e}");
                std::process::exit(1);
            }
        }
        Commands::Format => {
            if let Err(e) = hub.format() {
                eprintln!("Format failed: {e}");
                std::process::exit(1);
            }
            println!("Formatted {}", yct_home.display());
        }
        Commands::Status => {
            if let Err(e) = print_status(&hub) {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
}

fn print_status(hub: &yct_hub::Hub) -> Result<(), yct_core::StoreError> {
    let device = hub.device();
    println!("{}: {}", device.identity(), hub.status()?);
    for record in device.contacts()?.records() {
        println!(
            "  contact {} - {} at {}",
            record.id_a,
            record.id_b,
            record.observed_at.format(yct_core::TIMESTAMP_FORMAT)
        );
    }
    for id in device.positives()?.ids() {
        println!("  positive {id}");
    }
    for line in device.tracking_log()? {
        println!("  {line}");
    }
    Ok(())
}
