use std::net::IpAddr;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use knock::{demo_sequence, Knock, ListenerConfig, RetryPolicy, SimpleSender, StealthSender};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "knock", version, about = "Port knocking sender and listener")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for hosts to knock the sequence
    Listen {
        /// Address the step listeners bind to
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
        /// Knock step as transport:port[:hexpayload], repeat in order
        #[arg(long = "knock", value_name = "KNOCK")]
        knocks: Vec<Knock>,
        /// Exit after the first successful knock
        #[arg(long)]
        once: bool,
        /// How long to wait for a step's payload
        #[arg(long, default_value_t = 2000)]
        read_timeout_ms: u64,
    },

    /// Knock the sequence on a host
    Send {
        host: String,
        /// Knock step as transport:port[:hexpayload], repeat in order
        #[arg(long = "knock", value_name = "KNOCK")]
        knocks: Vec<Knock>,
        /// Send raw SYN probes instead of connecting (needs CAP_NET_RAW)
        #[arg(long)]
        stealth: bool,
        /// Tries per knock, 1 means no retry
        #[arg(long, default_value_t = 1)]
        attempts: u32,
        /// Connect timeout per knock
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
}

fn or_demo(knocks: Vec<Knock>) -> Vec<Knock> {
    if knocks.is_empty() {
        demo_sequence()
    } else {
        knocks
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Listen { bind, knocks, once, read_timeout_ms } => {
            let knocks = or_demo(knocks);
            let config = ListenerConfig {
                bind_addr: bind,
                read_timeout: Duration::from_millis(read_timeout_ms),
                ..Default::default()
            };

            let handle = knock::start_with(&knocks, config).context("failed to start listener")?;
            while let Some(source) = handle.wait_for_success() {
                println!("{} is the one who knocks", source);
                if once {
                    break;
                }
            }
            handle.stop();
        }
        Command::Send { host, knocks, stealth, attempts, timeout_ms } => {
            let knocks = or_demo(knocks);
            let retry = RetryPolicy::with_attempts(attempts);

            let sent = if stealth {
                let mut sender = StealthSender::new().context("failed to open raw socket")?;
                knock::send_with(&host, &knocks, &mut sender, &retry)
            } else {
                let mut sender = SimpleSender::new(Duration::from_millis(timeout_ms));
                knock::send_with(&host, &knocks, &mut sender, &retry)
            };
            sent.with_context(|| format!("failed to knock on {}", host))?;
        }
    }

    Ok(())
}

// -- Unit tests --
