//! Binary entry point: opens the serial link, wakes the toy, speaks the
//! given lines and puts it back to sleep.

use std::path::PathBuf;
use std::thread;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use furby::config::{load_app_config, CONFIG_PATH};
use furby::furby::Furby;
use furby::speech::Speech;
use furby::transport::SerialTransport;

/// Command-line options.
#[derive(Parser)]
#[command(version, about = "Make a Furby talk over its serial link")]
struct Args {
    /// Configuration file.
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Serial device, overriding the configuration.
    #[arg(long)]
    device: Option<String>,

    /// Synthesis voice, overriding the configuration.
    #[arg(long)]
    voice: Option<String>,

    /// Run the homing sequence before anything else.
    #[arg(long)]
    home: bool,

    /// Lines to say, in order.
    text: Vec<String>,
}

/// Bootstraps environment and logging, then runs one wake/say/sleep cycle.
fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config = load_app_config(&args.config);
    if let Some(device) = args.device {
        config.serial.port = device;
    }
    if let Some(voice) = args.voice {
        config.speech.voice = voice;
    }

    let transport = SerialTransport::open(
        &config.serial.port,
        config.serial.baud,
        config.serial.read_timeout(),
    )?;
    let speech = Speech::from_config(&config.speech);
    let mut furby = Furby::new(transport, &config, speech)?;

    let events = furby.light_events();
    thread::spawn(move || {
        for level in events {
            info!("Light: {}", level);
        }
    });

    if args.home {
        furby.control().home()?;
    }
    furby.wakeup()?;
    for line in &args.text {
        furby.say(line)?;
    }
    furby.sleep()
}
