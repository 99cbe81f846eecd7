//! End-to-end sessions against a server bound to an ephemeral port

use async_trait::async_trait;
use smtp_sink::{Config, MailServer, Notifier, Resolve, SpamBlocklist};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

struct StaticResolver(HashSet<String>);

#[async_trait]
impl Resolve for StaticResolver {
    async fn resolves(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

struct RecordingNotifier(mpsc::UnboundedSender<(String, String)>);

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, sender: &str) -> anyhow::Result<()> {
        let _ = self.0.send((recipient.to_string(), sender.to_string()));
        Ok(())
    }
}

/// Blocklist that lists 127.0.0.1 under `.bl.test`.
fn loopback_blocklist() -> SpamBlocklist {
    let listed = ["1.0.0.127.bl.test".to_string()].into_iter().collect();
    SpamBlocklist::with_resolver(vec![".bl.test".into()], Arc::new(StaticResolver(listed)))
}

struct TestServer {
    addr: String,
    dir: TempDir,
}

impl TestServer {
    fn out(&self) -> PathBuf {
        self.dir.path().join("mail")
    }

    fn spool(&self) -> PathBuf {
        self.dir.path().join("spool")
    }
}

async fn start_test_server(
    tweak: impl FnOnce(&mut Config),
    blocklist: SpamBlocklist,
    notifier: Option<Arc<dyn Notifier>>,
) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");
    std::fs::create_dir_all(&spool).unwrap();

    let mut config = Config {
        address: "127.0.0.1".into(),
        ports: Vec::new(),
        hostname: "test.local".into(),
        output_dir: dir.path().join("mail"),
        spool_dir: spool,
        ..Config::default()
    };
    tweak(&mut config);

    let server = Arc::new(MailServer::new(config, blocklist, notifier).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(server.serve(listener));

    TestServer { addr, dir }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        line
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn command(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read_reply().await
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

async fn wait_for_files(dir: &Path, count: usize) -> Vec<String> {
    for _ in 0..100 {
        let files = list_files(dir);
        if files.len() >= count {
            return files;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    list_files(dir)
}

#[tokio::test]
async fn test_full_transaction_is_persisted() {
    let server = start_test_server(|_| {}, SpamBlocklist::default(), None).await;
    let mut client = Client::connect(&server.addr).await;

    assert!(client.read_reply().await.starts_with("220 test.local"));
    assert!(client.command("MAIL FROM:<a@x.com>\r\n").await.starts_with("250"));
    assert!(client.command("RCPT TO:<b@y.com>\r\n").await.starts_with("250"));
    assert!(client.command("DATA\r\n").await.starts_with("354"));
    client.send("hello world\r\n").await;
    assert!(client.command(".\r\n").await.starts_with("250"));
    assert!(client.command("QUIT\r\n").await.starts_with("221"));

    let files = wait_for_files(&server.out(), 1).await;
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("b@y.com--a@x.com--1.0.0.127--"), "{}", files[0]);
    assert!(files[0].ends_with(".txt"));

    let content = std::fs::read_to_string(server.out().join(&files[0])).unwrap();
    assert_eq!(
        content,
        "MAIL FROM:<a@x.com>\r\nRCPT TO:<b@y.com>\r\nDATA\r\nhello world\r\n.\r\nQUIT\r\n"
    );
}

#[tokio::test]
async fn test_quit_only_leaves_nothing() {
    let server = start_test_server(|_| {}, SpamBlocklist::default(), None).await;
    let mut client = Client::connect(&server.addr).await;

    assert!(client.read_reply().await.starts_with("220"));
    assert!(client.command("QUIT\r\n").await.starts_with("221"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(list_files(&server.out()).is_empty());
    assert!(list_files(&server.spool()).is_empty());
}

#[tokio::test]
async fn test_short_session_before_data_is_discarded() {
    let server = start_test_server(|_| {}, SpamBlocklist::default(), None).await;
    let mut client = Client::connect(&server.addr).await;

    client.read_reply().await;
    client.command("HELO me\r\n").await;
    client.command("MAIL FROM:<a@x.com>\r\n").await;
    client.command("QUIT\r\n").await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(list_files(&server.out()).is_empty());
}

#[tokio::test]
async fn test_disconnect_still_finalizes() {
    let server = start_test_server(|_| {}, SpamBlocklist::default(), None).await;
    let mut client = Client::connect(&server.addr).await;

    client.read_reply().await;
    client.command("MAIL FROM:<sender@example.org>\r\n").await;
    client.command("RCPT TO:<rcpt@example.net>\r\n").await;
    client.command("DATA\r\n").await;
    client.send("Subject: cut short\r\n").await;
    drop(client);

    let files = wait_for_files(&server.out(), 1).await;
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("rcpt@example.net--sender@example.org--1.0.0.127--"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(list_files(&server.spool()).is_empty());
}

#[tokio::test]
async fn test_replies_follow_verb_table() {
    let server = start_test_server(|_| {}, SpamBlocklist::default(), None).await;
    let mut client = Client::connect(&server.addr).await;

    client.read_reply().await;
    for (line, code) in [
        ("EHLO me\r\n", "250"),
        ("HELO me\r\n", "250"),
        ("RSET\r\n", "250"),
        ("VRFY root\r\n", "250"),
        ("EXPN staff\r\n", "502"),
        ("HELP\r\n", "502"),
        ("NOOP\r\n", "250"),
        ("XYZZY plugh\r\n", "250"),
        ("QUIT\r\n", "221"),
    ] {
        let reply = client.command(line).await;
        assert!(reply.starts_with(code), "{} -> {}", line.trim_end(), reply);
    }
}

#[tokio::test]
async fn test_blocked_peer_gets_no_banner() {
    let server = start_test_server(|_| {}, loopback_blocklist(), None).await;
    let mut client = Client::connect(&server.addr).await;

    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), client.reader.read_to_end(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(read.is_err() || buf.is_empty(), "{:?}", String::from_utf8_lossy(&buf));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(list_files(&server.out()).is_empty());
}

#[tokio::test]
async fn test_blocked_peer_accepted_without_spam_detection() {
    let server = start_test_server(|c| c.spam_detection = false, loopback_blocklist(), None).await;
    let mut client = Client::connect(&server.addr).await;

    assert!(client.read_reply().await.starts_with("220"));
    client.command("MAIL FROM:<listed@spam.example>\r\n").await;
    client.command("RCPT TO:<victim@example.net>\r\n").await;
    client.command("QUIT\r\n").await;

    let files = wait_for_files(&server.out(), 1).await;
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_notifier_fires_for_alert_recipient() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier(tx));
    let server = start_test_server(
        |c| c.alert_address = Some("me@home.net".into()),
        SpamBlocklist::default(),
        Some(notifier),
    )
    .await;

    for rcpt in ["someone@else.net", "me@home.net"] {
        let mut client = Client::connect(&server.addr).await;
        client.read_reply().await;
        client.command("MAIL FROM:<friend@x.com>\r\n").await;
        client.command(&format!("RCPT TO:<{}>\r\n", rcpt)).await;
        client.command("QUIT\r\n").await;
    }

    let (recipient, sender) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("notifier never fired")
        .unwrap();
    assert_eq!(recipient, "me@home.net");
    assert_eq!(sender, "friend@x.com");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_overlong_line_is_not_a_command() {
    let server = start_test_server(|c| c.max_line_length = 16, SpamBlocklist::default(), None).await;
    let mut client = Client::connect(&server.addr).await;

    client.read_reply().await;
    client.send(&format!("{}QUIT\r\n", "x".repeat(20))).await;
    assert!(client.command("NOOP\r\n").await.starts_with("250"));
    assert!(client.command("QUIT\r\n").await.starts_with("221"));
}

#[tokio::test]
async fn test_idle_timeout_closes_session() {
    let server = start_test_server(
        |c| c.idle_timeout = Duration::from_millis(200),
        SpamBlocklist::default(),
        None,
    )
    .await;
    let mut client = Client::connect(&server.addr).await;

    client.read_reply().await;
    client.command("MAIL FROM:<slowpoke@x.com>\r\n").await;
    client.command("RCPT TO:<waiting@y.com>\r\n").await;

    assert!(client.read_reply().await.starts_with("421"));
    let files = wait_for_files(&server.out(), 1).await;
    assert_eq!(files.len(), 1);
}

async fn noop_session(addr: &str, padding: usize) {
    let mut client = Client::connect(addr).await;
    client.read_reply().await;
    let noop = format!("NOOP {}\r\n", "x".repeat(padding));
    assert!(client.command(&noop).await.starts_with("250"));
    assert!(client.command("QUIT\r\n").await.starts_with("221"));
}

#[tokio::test]
async fn test_fifty_bytes_is_the_discard_threshold() {
    let server = start_test_server(|_| {}, SpamBlocklist::default(), None).await;

    // 44 + 6 bytes
    noop_session(&server.addr, 37).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(list_files(&server.out()).is_empty());

    // 45 + 6 bytes
    noop_session(&server.addr, 38).await;
    let files = wait_for_files(&server.out(), 1).await;
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("invalid@addr--invalid@addr--1.0.0.127--"), "{}", files[0]);
    let size = std::fs::metadata(server.out().join(&files[0])).unwrap().len();
    assert_eq!(size, 51);
}

#[tokio::test]
async fn test_spool_failure_aborts_before_banner() {
    let server = start_test_server(
        |c| c.spool_dir = c.output_dir.join("missing").join("spool"),
        SpamBlocklist::default(),
        None,
    )
    .await;
    let mut client = Client::connect(&server.addr).await;

    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), client.reader.read_to_end(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(read.is_err() || buf.is_empty(), "{:?}", String::from_utf8_lossy(&buf));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(list_files(&server.out()).is_empty());
}

#[tokio::test]
async fn test_idle_timeout_keeps_unterminated_body() {
    let server = start_test_server(
        |c| c.idle_timeout = Duration::from_millis(200),
        SpamBlocklist::default(),
        None,
    )
    .await;
    let mut client = Client::connect(&server.addr).await;

    client.read_reply().await;
    assert!(client.command("DATA\r\n").await.starts_with("354"));
    let body = "x".repeat(82);
    client.send(&body).await;

    assert!(client.read_reply().await.starts_with("421"));
    let files = wait_for_files(&server.out(), 1).await;
    assert_eq!(files.len(), 1);

    let content = std::fs::read_to_string(server.out().join(&files[0])).unwrap();
    assert_eq!(content, format!("DATA\r\n{}", body));
}
