use std::path::PathBuf;
use std::time::Duration;

use crate::reader::MAX_LINE_LENGTH;

/// Settings every session reads. Built once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub ports: Vec<u16>,
    /// Name announced in the 220 banner.
    pub hostname: String,
    pub output_dir: PathBuf,
    pub spool_dir: PathBuf,
    /// Drop blocklisted peers before the banner.
    pub spam_detection: bool,
    /// Recipient that triggers the notifier.
    pub alert_address: Option<String>,
    pub idle_timeout: Duration,
    pub max_line_length: usize,
    pub verbose: bool,
    pub raw_display: bool,
    pub log_file: Option<PathBuf>,
}

impl Config {
    pub fn banner(&self) -> String {
        format!("220 {} SMTP service ready\r\n", self.hostname)
    }

    pub fn is_alert_recipient(&self, recipient: &str) -> bool {
        self.alert_address.as_deref() == Some(recipient)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            ports: vec![25],
            hostname: "smtp.local".to_string(),
            output_dir: PathBuf::from("mail"),
            spool_dir: std::env::temp_dir(),
            spam_detection: true,
            alert_address: None,
            idle_timeout: Duration::from_secs(300),
            max_line_length: MAX_LINE_LENGTH,
            verbose: false,
            raw_display: false,
            log_file: None,
        }
    }
}
