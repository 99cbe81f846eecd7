use crate::blocklist::SpamBlocklist;
use crate::command::Reply;
use crate::config::Config;
use crate::notifier::Notifier;
use crate::reader::{Line, LineReader};
use crate::session::{Session, Step};
use crate::store::{Envelope, MessageStore, Spool, MIN_MESSAGE_SIZE};
use crate::utils::Logger;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, Context};
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;

pub struct MailServer {
    pub config: Arc<Config>,
    logger: Logger,
    blocklist: Arc<SpamBlocklist>,
    store: MessageStore,
    notifier: Option<Arc<dyn Notifier>>,
}

impl MailServer {
    pub fn new(
        config: Config,
        blocklist: SpamBlocklist,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        let logger = Logger::new(config.log_file.clone(), config.verbose, config.raw_display)?;

        let store = MessageStore::new(&config.output_dir);
        store.ensure_dir()?;

        Ok(Self {
            config: Arc::new(config),
            logger,
            blocklist: Arc::new(blocklist),
            store,
            notifier,
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn blocklist(&self) -> &SpamBlocklist {
        &self.blocklist
    }

    /// Runs one connection from the blocklist check to finalization.
    ///
    /// Transport errors end the conversation but never skip finalization.
    /// Errors returned from here are storage errors.
    pub async fn handle_client<S>(&self, stream: S, client_addr: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let listed = self.blocklist.is_blocked(client_addr.ip()).await;
        if listed {
            if self.config.spam_detection {
                self.logger.log(&client_addr, "Listed on blocklist, dropped").await;
                return Ok(());
            }
            self.logger.log(&client_addr, "New connection (listed on blocklist, spam detection off)").await;
        } else {
            self.logger.log(&client_addr, "New connection").await;
        }

        let mut spool = Spool::create(&self.config.spool_dir)?;
        self.logger.debug(&client_addr, &format!("Spooling to {:?}", spool.path())).await;

        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = LineReader::new(reader, self.config.max_line_length);

        if let Err(e) = writer.write_all(self.config.banner().as_bytes()).await {
            self.logger.log(&client_addr, &format!("Write error: {}", e)).await;
            return Ok(());
        }

        let mut session = Session::new(client_addr, listed);
        self.converse(&mut session, &mut reader, &mut writer, &mut spool).await?;

        self.logger.log_verbose(
            &client_addr,
            "SESSION CLOSED",
            &format!(
                "From: {}\nTo: {}\nBytes: {}\nListed: {}",
                session.mail_from,
                session.rcpt_to,
                spool.len(),
                session.listed
            ),
        ).await;

        self.finish(&session, spool).await
    }

    async fn converse<R, W>(
        &self,
        session: &mut Session,
        reader: &mut LineReader<R>,
        writer: &mut W,
        spool: &mut Spool,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let client_addr = session.client_addr;

        loop {
            let line = match time::timeout(self.config.idle_timeout, reader.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    self.logger.log(&client_addr, &format!("Read error: {}", e)).await;
                    if let Some(fragment) = reader.take_pending() {
                        spool.append(fragment.bytes()).context("Failed to write spool")?;
                    }
                    break;
                }
                Err(_) => {
                    self.logger.log(&client_addr, "Idle timeout").await;
                    if let Some(fragment) = reader.take_pending() {
                        spool.append(fragment.bytes()).context("Failed to write spool")?;
                    }
                    let _ = writer.write_all(Reply::ServiceNotAvailable.line().as_bytes()).await;
                    break;
                }
            };

            spool.append(line.bytes()).context("Failed to write spool")?;

            let bytes = match line {
                Line::Complete(bytes) => bytes,
                Line::Overflow(bytes) => {
                    self.logger.debug(&client_addr, &format!("Overlong input ({} bytes) kept as data", bytes.len())).await;
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&bytes);
            let step = session.on_line(&text);

            match step {
                Step::Silent => {}
                Step::Reply(reply) => {
                    self.logger.debug(&client_addr, &format!(">> {}", text.trim_end())).await;
                    self.logger.debug(&client_addr, &format!("<< {}", reply)).await;
                    if let Err(e) = writer.write_all(reply.line().as_bytes()).await {
                        self.logger.log(&client_addr, &format!("Write error: {}", e)).await;
                        break;
                    }
                }
                Step::Quit(reply) => {
                    self.logger.debug(&client_addr, &format!("<< {}", reply)).await;
                    let _ = writer.write_all(reply.line().as_bytes()).await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Persists the transcript if it is large enough, then fires the
    /// notifier for the watched recipient. The spool is removed either way.
    async fn finish(&self, session: &Session, mut spool: Spool) -> Result<()> {
        let client_addr = session.client_addr;
        let size = spool.sync().context("Failed to sync spool")?;

        if size <= MIN_MESSAGE_SIZE {
            self.logger.debug(&client_addr, &format!("Discarded {} byte transcript", size)).await;
            return Ok(());
        }

        let envelope = Envelope {
            to: session.rcpt_to.clone(),
            from: session.mail_from.clone(),
            remote_ip: session.remote_ip.clone(),
            timestamp: Utc::now().timestamp(),
        };

        let store = self.store.clone();
        let task_envelope = envelope.clone();
        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let reader = spool.reader().context("Failed to reopen spool")?;
            store.finalize(reader, &task_envelope)
        })
        .await
        .context("Finalize task panicked")??;

        self.logger.log(&client_addr, &format!("Email saved to: {:?}", path)).await;

        if self.config.is_alert_recipient(&envelope.to) {
            self.alert(client_addr, envelope).await;
        }

        Ok(())
    }

    async fn alert(&self, client_addr: SocketAddr, envelope: Envelope) {
        self.logger.log(&client_addr, &format!("Mail for {} from {}", envelope.to, envelope.from)).await;

        if let Some(notifier) = &self.notifier {
            let notifier = notifier.clone();
            let logger = self.logger.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&envelope.to, &envelope.from).await {
                    logger.log(&client_addr, &format!("Alert failed: {:#}", e)).await;
                }
            });
        }
    }

    /// Accepts connections forever, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, client_addr)) => {
                    let this = self.clone();

                    tokio::spawn(async move {
                        if let Err(e) = this.handle_client(stream, client_addr).await {
                            this.logger.log(&client_addr, &format!("Error: {:#}", e)).await;
                        }
                    });
                }
                Err(e) => {
                    self.logger.server(&format!("Accept error: {}", e)).await;
                }
            }
        }
    }

    async fn run_server(self: Arc<Self>, port: u16) -> Result<()> {
        let addr = format!("{}:{}", self.config.address, port);
        let listener = TcpListener::bind(&addr).await
            .with_context(|| format!("Failed to bind to {}", addr))?;

        self.logger.server(&format!("Listening on {}", addr)).await;
        self.serve(listener).await
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut handles = vec![];

        for port in self.config.ports.clone() {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = this.clone().run_server(port).await {
                    this.logger.server(&format!("Server on port {} failed: {:#}", port, e)).await;
                }
            });
            handles.push(handle);
        }

        for handle in handles {
            handle.await?;
        }

        Ok(())
    }
}
