use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use env_logger::Target;
use whip_whep_relay::config::RelayConfig;
use whip_whep_relay::engine::rtc::RtcEngine;
use whip_whep_relay::media::io::Writer;
use whip_whep_relay::relay::RelayTrack;
use whip_whep_relay::server::{self, RelayService};
use whip_whep_relay::session::{Negotiator, SessionRegistry};

#[derive(Parser)]
#[command(name = "whip-whep-relay")]
#[command(author = "Rain Liu <yliu@webrtc.rs>")]
#[command(version = "0.1.0")]
#[command(about = "Relays one WHIP publisher to any number of WHEP viewers.", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(short, long, default_value_t = format!(""))]
    output_log_file: String,
    /// http server port, overrides the config file
    #[arg(long)]
    port: Option<u16>,
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// directory served for GET requests
    #[arg(long)]
    static_dir: Option<PathBuf>,
    /// disable static file serving
    #[arg(long)]
    no_static: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;

    if cli.debug {
        env_logger::Builder::new()
            .target(if !cli.output_log_file.is_empty() {
                Target::Pipe(Box::new(
                    OpenOptions::new()
                        .create(true)
                        .write(true)
                        .truncate(true)
                        .open(&cli.output_log_file)?,
                ))
            } else {
                Target::Stdout
            })
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log_level)
            .init();
    }

    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listen.set_port(port);
    }
    if cli.no_static {
        config.static_dir = None;
    } else if let Some(dir) = cli.static_dir {
        config.static_dir = Some(dir);
    }
    config.validate()?;

    let relay = RelayTrack::new(
        config.codec.capability(),
        config.track_id.clone(),
        config.stream_id.clone(),
        config.consumer_buffer,
    );
    let engine = Arc::new(RtcEngine::new(&config));
    let registry = SessionRegistry::new();
    let negotiator = Arc::new(Negotiator::new(
        engine,
        Arc::clone(&relay),
        Arc::clone(&registry),
        config.clone(),
    ));
    let service = Arc::new(RelayService::new(negotiator, config.static_dir.clone()));

    println!("Press ctrl-c to stop");
    server::serve(service, config.listen, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("waiting for ctrl-c: {err}");
        }
        println!();
    })
    .await?;

    registry.close_all().await?;
    relay.close().await?;

    Ok(())
}
