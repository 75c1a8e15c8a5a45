use std::time::Duration;

use clap::{Parser, Subcommand};
use rcard_apdu_core::NormalizeDefaults;
use rcard_client::{CardManager, CardType, RunConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

mod commands;
mod utils;

use commands::*;
use utils::HexBytes;

#[derive(Parser)]
#[command(version, about = "Exchange APDUs with physical, simulated and virtual smart cards")]
struct Cli {
    /// Card backend to connect to
    #[arg(short = 't', long, default_value = "physical")]
    card_type: CardType,

    /// Reader name (case-insensitive substring) for the physical backend
    #[arg(short, long)]
    reader: Option<String>,

    /// Reader index for reader based backends
    #[arg(short = 'i', long, default_value_t = 0)]
    reader_index: usize,

    /// Application identifier to select after connecting, in hex
    #[arg(short, long)]
    aid: Option<HexBytes>,

    /// Do not select the application after connecting
    #[arg(long)]
    no_select: bool,

    /// Virtual card host for the vsmartcard backend (listens when omitted)
    #[arg(long)]
    remote: Option<String>,

    /// Virtual card port for the vsmartcard backend
    #[arg(long, default_value_t = rcard_transport_vsmartcard::DEFAULT_PORT)]
    remote_port: u16,

    /// Connect and read deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not add an explicit zero Lc to commands without data
    #[arg(long)]
    no_fix_lc: bool,

    /// Force Ne on commands with data
    #[arg(long)]
    fix_ne: bool,

    /// Ne value forced by --fix-ne
    #[arg(long)]
    default_ne: Option<u16>,

    /// Log every APDU with timing
    #[arg(short, long)]
    debug: bool,

    /// Trace level output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available PC/SC readers
    Readers,

    /// Print the ATR and protocol of the card
    Atr,

    /// Send one or more APDUs given in hex
    Send {
        /// Command APDUs, e.g. 00A4040007A0000000031010
        #[arg(required = true)]
        apdus: Vec<HexBytes>,

        /// Send the whole list this many times
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: u32,
    },

    /// Present the card to a vsmartcard reader (VPCD) as a virtual card
    Vicc {
        /// VPCD host to connect to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// VPCD port
        #[arg(short = 'P', long, default_value_t = rcard_transport_vsmartcard::DEFAULT_PORT)]
        port: u16,

        /// Wait for the VPCD to connect instead of dialing it
        #[arg(short = 'R', long)]
        reversed: bool,
    },
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let timeout = self.timeout.map(Duration::from_secs);
        let mut config = RunConfig::new()
            .with_card_type(self.card_type)
            .with_target_reader_index(self.reader_index)
            .with_remote_vicc_port(self.remote_port)
            .with_do_select(!self.no_select)
            .with_connect_timeout(timeout)
            .with_read_timeout(timeout);
        config.reader_name.clone_from(&self.reader);
        config.remote_address.clone_from(&self.remote);
        config.aid = self.aid.clone().map(HexBytes::into_bytes);
        config
    }

    fn connect(&self) -> anyhow::Result<CardManager> {
        let config = self.run_config();
        let manager = CardManager::new(self.debug, None);
        let options = manager.options().with_defaults(NormalizeDefaults::from_env());
        let mut manager = manager.with_options(options);
        manager
            .set_fix_lc(!self.no_fix_lc)
            .set_fix_ne(self.fix_ne.then_some(true))
            .set_default_ne(self.default_ne);

        info!(card_type = %config.card_type, "Connecting");
        connect_command(&mut manager, &config)?;
        Ok(manager)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.debug)?;

    match &cli.command {
        Commands::Readers => list_readers_command()?,
        Commands::Atr => atr_command(&mut cli.connect()?)?,
        Commands::Send { apdus, repeat } => send_command(&mut cli.connect()?, apdus, *repeat)?,
        Commands::Vicc {
            host,
            port,
            reversed,
        } => {
            let timeout = cli.timeout.map(Duration::from_secs);
            vicc_command(&mut cli.connect()?, host, *port, *reversed, timeout)?
        }
    }

    Ok(())
}

/// Log target of the APDU trace enabled by `--debug`
const APDU_LOG_DIRECTIVE: &str = "rcard_apdu_core::wrapping=info";

fn setup_logging(verbose: bool, debug: bool) -> anyhow::Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, debug, &env)?)
        .with_ansi(true)
        .init();
    Ok(())
}

/// `--verbose` forces trace; otherwise `RUST_LOG` applies with info as the
/// fallback, and `--debug` always lets the APDU trace through
fn log_filter(verbose: bool, debug: bool, env: &str) -> anyhow::Result<EnvFilter> {
    if verbose {
        return Ok(EnvFilter::new("trace"));
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(env);
    Ok(if debug {
        filter.add_directive(APDU_LOG_DIRECTIVE.parse()?)
    } else {
        filter
    })
}
