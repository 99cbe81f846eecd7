mod daemon;

use smtp_sink::{CommandNotifier, Config, MailServer, Notifier, SpamBlocklist};

use structopt::StructOpt;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "smtp-sink",
    about = "A minimal SMTP receiver that captures raw transcripts to disk",
    author = "2026, Philippe TEMESI <https://www.tems.be>",
    version = "0.1.0"
)]
pub struct Opt {
    /// Run as daemon
    #[structopt(short = "d", long = "daemon")]
    pub daemon: bool,

    /// PID file used in daemon mode
    #[structopt(long = "pid-file", default_value = "/tmp/smtp-sink.pid", parse(from_os_str))]
    pub pid_file: PathBuf,

    /// Listening ports (can be specified multiple times, default: 25)
    #[structopt(short = "p", long = "port", default_value = "25", number_of_values = 1)]
    pub ports: Vec<u16>,

    /// Listening address (default: 0.0.0.0)
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: String,

    /// Host name announced in the 220 banner
    #[structopt(long = "helo", default_value = "smtp.local")]
    pub helo: String,

    /// Directory to save received mail
    #[structopt(short = "o", long = "out", default_value = "mail", parse(from_os_str))]
    pub out: PathBuf,

    /// Directory for per-connection spool files (default: system temp dir)
    #[structopt(long = "spool", parse(from_os_str))]
    pub spool: Option<PathBuf>,

    /// Blocklist file, one DNS suffix per line
    #[structopt(short = "b", long = "blocklist", parse(from_os_str))]
    pub blocklist: Option<PathBuf>,

    /// Accept peers found on the blocklist instead of dropping them
    #[structopt(long = "no-spam-check")]
    pub no_spam_check: bool,

    /// Recipient address that triggers the alert
    #[structopt(long = "alert")]
    pub alert: Option<String>,

    /// Shell command run for the alert; {from} and {to} are substituted
    #[structopt(long = "alert-command")]
    pub alert_command: Option<String>,

    /// Idle timeout in seconds
    #[structopt(long = "timeout", default_value = "300")]
    pub timeout: u64,

    /// Log file path
    #[structopt(long = "logs", parse(from_os_str))]
    pub log_file: Option<PathBuf>,

    /// Verbose mode - display SMTP details
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Enable raw display (not filtered) - DANGEROUS
    #[structopt(short = "r", long = "raw")]
    pub raw_display: bool,
}

impl Opt {
    fn to_config(&self) -> Config {
        let defaults = Config::default();
        Config {
            address: self.address.clone(),
            ports: self.ports.clone(),
            hostname: self.helo.clone(),
            output_dir: self.out.clone(),
            spool_dir: self.spool.clone().unwrap_or(defaults.spool_dir),
            spam_detection: !self.no_spam_check,
            alert_address: self.alert.clone().filter(|a| !a.is_empty()),
            idle_timeout: Duration::from_secs(self.timeout),
            max_line_length: defaults.max_line_length,
            verbose: self.verbose,
            raw_display: self.raw_display,
            log_file: self.log_file.clone(),
        }
    }
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    let config = opt.to_config();

    println!("==========================================");
    println!("smtp-sink v{}", env!("CARGO_PKG_VERSION"));
    println!("==========================================");

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", config.output_dir))?;
    std::fs::create_dir_all(&config.spool_dir)
        .with_context(|| format!("Failed to create spool directory: {:?}", config.spool_dir))?;

    let blocklist = match &opt.blocklist {
        Some(path) => SpamBlocklist::load(path)?,
        None => SpamBlocklist::default(),
    };

    if opt.daemon {
        daemon::daemonize(&opt.pid_file)?;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run(opt, config, blocklist))
}

async fn run(opt: Opt, config: Config, blocklist: SpamBlocklist) -> Result<()> {
    let notifier = opt
        .alert_command
        .map(|command| Arc::new(CommandNotifier::new(command)) as Arc<dyn Notifier>);

    let server = Arc::new(MailServer::new(config, blocklist, notifier)?);
    let logger = server.logger();
    let config = &server.config;

    logger.server(&format!(
        "Ports: {:?}  Spam detection: {}  Output: {:?}  Verbose: {}",
        config.ports, config.spam_detection, server.store().dir(), config.verbose
    )).await;
    logger.server(&format!(
        "Blocklist suffixes: {}  Stored messages: {}",
        server.blocklist().len(),
        server.store().count()?
    )).await;
    if config.spam_detection && server.blocklist().is_empty() {
        logger.server("No blocklist suffixes loaded, every peer is accepted").await;
    }
    if let Some(alert) = &config.alert_address {
        logger.server(&format!("Alert address: {}", alert)).await;
    }
    logger.server("Waiting for connections...").await;

    server.clone().run().await
}
