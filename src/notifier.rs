use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

/// Side effect fired when a message for the watched recipient was stored.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, sender: &str) -> Result<()>;
}

/// Runs a shell command, e.g. a text-to-speech player.
///
/// `{to}` and `{from}` in the template are replaced by the envelope
/// addresses, which are also exported as `MAIL_TO` and `MAIL_FROM`. The
/// addresses have already been reduced to `[A-Za-z0-9@.]`.
pub struct CommandNotifier {
    template: String,
}

impl CommandNotifier {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, recipient: &str, sender: &str) -> String {
        self.template
            .replace("{to}", recipient)
            .replace("{from}", sender)
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn notify(&self, recipient: &str, sender: &str) -> Result<()> {
        let command = self.render(recipient, sender);
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(&command)
            .env("MAIL_TO", recipient)
            .env("MAIL_FROM", sender)
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to run alert command: {}", command))?;

        if !status.success() {
            bail!("Alert command exited with {}", status);
        }
        Ok(())
    }
}
