//! Telnet session state machine.
//!
//! A session starts in [`SessionState::AwaitingName`]. The first valid name
//! registers the client, spawns its listener and moves the session to
//! [`SessionState::Active`], where every line is parsed and dispatched. An
//! exit command, end of input or a read error closes the session.

use crate::metrics;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use telechat_core::ignore;
use telechat_core::{
    ChatMessage, Distributor, MessageKind, RegistryError, SharedIgnoreSet,
};
use telechat_protocol::{help_text, prompt, Command, LineCodec, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Asks for a name.
pub const NAME_PROMPT: &str = "Please enter name\r\n#:";
/// The name contained whitespace.
pub const NAME_HAS_SPACES: &str = "Name cannot contain spaces\r\n#:";
/// The name is in use.
pub const NAME_TAKEN: &str = "User already exists in chat\r\n#:";
/// Reply to `/exit`.
pub const CLOSING: &str = "closing connection";
/// Sent to connections over the client limit.
pub const REFUSED: &str =
    "Connection Refused. Too many current clients. Please try again later.\r\n";

const READ_BUFFER_SIZE: usize = 1024;

/// Where a session is in its lifecycle.
#[derive(Debug)]
pub enum SessionState {
    /// Waiting for a valid, unused name.
    AwaitingName,
    /// Registered and listening.
    Active {
        /// Client name.
        name: String,
        /// Ignore set shared with the listener.
        ignores: SharedIgnoreSet,
    },
    /// Finished; the client has left the registry.
    Closed,
}

/// Whether to keep reading after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One telnet connection.
pub struct Session<W> {
    peer: String,
    state: SessionState,
    distributor: Arc<Distributor>,
    writer: Arc<Mutex<W>>,
    codec: LineCodec,
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a session in the `AwaitingName` state.
    pub fn new(
        peer: impl Into<String>,
        distributor: Arc<Distributor>,
        writer: W,
        codec: LineCodec,
    ) -> Self {
        Self {
            peer: peer.into(),
            state: SessionState::AwaitingName,
            distributor,
            writer: Arc::new(Mutex::new(writer)),
            codec,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the session until it closes.
    pub async fn run<R>(mut self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        if let Err(e) = self.write(NAME_PROMPT).await {
            debug!(peer = %self.peer, error = %e, "Failed to send name prompt");
            self.close().await;
            return;
        }

        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        'read: loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    debug!(peer = %self.peer, "Connection closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "Read failed");
                    metrics::record_error("read");
                    break;
                }
            }

            loop {
                let line = match self.codec.decode_from(&mut buf) {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(peer = %self.peer, error = %e, "Discarded input line");
                        if self.reject_line(&e).await.is_err() {
                            break 'read;
                        }
                        continue;
                    }
                };

                match self.handle_line(&line).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break 'read,
                    Err(e) => {
                        debug!(peer = %self.peer, error = %e, "Write failed");
                        metrics::record_error("write");
                        break 'read;
                    }
                }
            }
        }

        self.close().await;
    }

    async fn handle_line(&mut self, line: &str) -> io::Result<Flow> {
        match &self.state {
            SessionState::AwaitingName => {
                self.handle_name(line).await?;
                Ok(Flow::Continue)
            }
            SessionState::Active { name, ignores } => {
                let name = name.clone();
                let ignores = Arc::clone(ignores);
                self.dispatch(&name, &ignores, line).await
            }
            SessionState::Closed => Ok(Flow::Close),
        }
    }

    async fn handle_name(&mut self, line: &str) -> io::Result<()> {
        if line.is_empty() {
            return self.write(NAME_PROMPT).await;
        }

        match self.distributor.join(line) {
            Ok(listener) => {
                let ignores = listener.ignores();
                tokio::spawn(listener.run(Arc::clone(&self.writer)));

                info!(peer = %self.peer, user = %line, "User has entered chat");
                self.state = SessionState::Active {
                    name: line.to_string(),
                    ignores,
                };
                self.write(&prompt(line)).await
            }
            Err(RegistryError::InvalidName(_)) => {
                info!(peer = %self.peer, "Name cannot contain spaces");
                self.write(&format!("{NAME_HAS_SPACES}{NAME_PROMPT}")).await
            }
            Err(e) => {
                info!(peer = %self.peer, user = %line, error = %e, "Name rejected");
                self.write(&format!("{NAME_TAKEN}{NAME_PROMPT}")).await
            }
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        ignores: &SharedIgnoreSet,
        line: &str,
    ) -> io::Result<Flow> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                debug!(user = %name, error = %e, "Rejected command");
                self.reply(name, &e.to_string()).await?;
                return Ok(Flow::Continue);
            }
        };

        let registry = self.distributor.registry();
        match command {
            Command::Exit => {
                self.write(CLOSING).await?;
                info!(user = %name, "Closing client");
                return Ok(Flow::Close);
            }
            Command::ShowUsers => {
                let listing: String = registry
                    .user_names()
                    .iter()
                    .map(|user| format!("{user}\r\n"))
                    .collect();
                self.reply(name, &listing).await?;
            }
            Command::Ignore(peer) => {
                ignore::lock(ignores).ignore(&peer);
                self.reply(name, &format!("now ignoring user {peer}\n"))
                    .await?;
            }
            Command::Unignore => {
                ignore::lock(ignores).reset();
                self.reply(name, "now allowing messages from all users")
                    .await?;
            }
            Command::Channel { channel, text } => {
                let msg = ChatMessage::new(name, text);
                let started = Instant::now();
                let result = self.distributor.publish_channel(&msg, channel).await;
                metrics::record_publish(MessageKind::Channel, started, &result);

                // A subscribed sender already got the message and its prompt.
                let delivered_to_self =
                    result.is_ok() && registry.channels_of(name).contains(&channel);
                if !delivered_to_self {
                    self.reply(name, "").await?;
                }
            }
            Command::PrivateMessage { recipient, text } => {
                let msg = ChatMessage::new(name, text);
                let started = Instant::now();
                let result = self.distributor.publish_private(&msg, &recipient).await;
                metrics::record_publish(MessageKind::Pm, started, &result);
                self.reply(name, "").await?;
            }
            Command::Subscribe(channel) => {
                let reply = match registry.subscribe(name, channel) {
                    Ok(()) => format!("now subscribing to channel {channel}\n"),
                    Err(e) => e.to_string(),
                };
                self.reply(name, &reply).await?;
            }
            Command::Unsubscribe => {
                if let Err(e) = registry.unsubscribe_all(name) {
                    warn!(user = %name, error = %e, "Unsubscribe failed");
                }
                self.reply(name, "ceased subscribing to all channels")
                    .await?;
            }
            Command::Help => {
                self.reply(name, &help_text()).await?;
            }
            Command::Broadcast(text) => {
                let msg = ChatMessage::new(name, text);
                let started = Instant::now();
                let result = self.distributor.publish_broadcast(&msg).await;
                metrics::record_publish(MessageKind::Broadcast, started, &result);

                // On success the sender's own listener echoes it with a prompt.
                if result.is_err() {
                    self.reply(name, "").await?;
                }
            }
            Command::Empty => {
                self.reply(name, "").await?;
            }
        }

        Ok(Flow::Continue)
    }

    async fn reject_line(&self, error: &ProtocolError) -> io::Result<()> {
        let notice = format!("{error}\r\n");
        match &self.state {
            SessionState::Active { name, .. } => self.reply(name, &notice).await,
            _ => self.write(&format!("{notice}{NAME_PROMPT}")).await,
        }
    }

    /// Write a reply followed by the prompt.
    async fn reply(&self, name: &str, text: &str) -> io::Result<()> {
        self.write(&format!("{text}{}", prompt(name))).await
    }

    async fn write(&self, text: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await
    }

    async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Active { name, .. } = state {
            self.distributor.leave(&name);
            info!(peer = %self.peer, user = %name, "User has left chat");
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use telechat_core::{HistoryQuery, WEB_CLIENT_NAME};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    struct TestClient {
        input: WriteHalf<DuplexStream>,
        output: ReadHalf<DuplexStream>,
        task: JoinHandle<()>,
    }

    impl TestClient {
        fn connect(distributor: &Arc<Distributor>) -> Self {
            Self::connect_with(distributor, LineCodec::default())
        }

        fn connect_with(distributor: &Arc<Distributor>, codec: LineCodec) -> Self {
            let (client, server) = tokio::io::duplex(8192);
            let (server_read, server_write) = tokio::io::split(server);
            let (output, input) = tokio::io::split(client);

            let session = Session::new("test", Arc::clone(distributor), server_write, codec);
            let task = tokio::spawn(session.run(server_read));
            Self {
                input,
                output,
                task,
            }
        }

        async fn send(&mut self, line: &str) {
            self.input
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
        }

        /// Read until `needle` has arrived, returning everything read.
        async fn expect(&mut self, needle: &str) -> String {
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            let read = async {
                loop {
                    let n = self.output.read(&mut buf).await.unwrap();
                    assert!(n > 0, "session closed before {needle:?} arrived");
                    seen.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&seen).contains(needle) {
                        break;
                    }
                }
            };
            tokio::time::timeout(Duration::from_secs(2), read)
                .await
                .unwrap_or_else(|_| {
                    panic!("timed out waiting for {needle:?}")
                });
            String::from_utf8(seen).unwrap()
        }

        async fn join(distributor: &Arc<Distributor>, name: &str) -> Self {
            let mut client = Self::connect(distributor);
            client.expect(NAME_PROMPT).await;
            client.send(name).await;
            client.expect(&format!("{name}#: ")).await;
            client
        }
    }

    fn distributor() -> Arc<Distributor> {
        let distributor = Arc::new(Distributor::in_memory());
        distributor.register_pseudo(WEB_CLIENT_NAME).unwrap();
        distributor
    }

    #[tokio::test]
    async fn test_name_validation() {
        let distributor = distributor();
        let _alice = TestClient::join(&distributor, "alice").await;

        let mut client = TestClient::connect(&distributor);
        client.expect(NAME_PROMPT).await;

        client.send("bad name").await;
        client
            .expect(&format!("{NAME_HAS_SPACES}{NAME_PROMPT}"))
            .await;

        client.send("alice").await;
        client.expect(&format!("{NAME_TAKEN}{NAME_PROMPT}")).await;

        client.send("bob").await;
        client.expect("\r\nbob#: ").await;
        assert!(distributor.registry().contains("bob"));
    }

    #[tokio::test]
    async fn test_local_commands() {
        let distributor = distributor();
        let mut alice = TestClient::join(&distributor, "alice").await;
        let _bob = TestClient::join(&distributor, "bob").await;

        alice.send("/showusers").await;
        let listing = alice.expect("bob\r\n").await;
        assert!(listing.contains("alice\r\n"));
        assert!(!listing.contains(WEB_CLIENT_NAME));

        alice.send("/subscribe 5").await;
        alice.expect("now subscribing to channel 5\n").await;
        alice.send("/subscribe 5").await;
        alice.expect("channel 5 has already been added").await;
        alice.send("/unsubscribe").await;
        alice.expect("ceased subscribing to all channels").await;
        assert!(distributor.registry().channels_of("alice").is_empty());

        alice.send("/ignore bob").await;
        alice.expect("now ignoring user bob\n").await;
        alice.send("/unignore").await;
        alice.expect("now allowing messages from all users").await;

        alice.send("/help").await;
        alice.expect("/help: displays this information\r\n\r\n").await;

        alice.send("/subscribe 99999999999").await;
        alice.expect("invalid channel number: 99999999999").await;
    }

    #[tokio::test]
    async fn test_messages_flow_between_sessions() {
        let distributor = distributor();
        let mut alice = TestClient::join(&distributor, "alice").await;
        let mut bob = TestClient::join(&distributor, "bob").await;

        alice.send("hello").await;
        bob.expect("#: hello\r\nbob#: ").await;
        alice.expect("#: hello\r\nalice#: ").await;

        bob.send("/subscribe 5").await;
        bob.expect("now subscribing to channel 5\n").await;
        alice.send("/channel 5 hi").await;
        bob.expect("Channel: 5 ").await;
        alice.expect("alice#: ").await;

        alice.send("/pm bob secret").await;
        bob.expect("Private Message: alice ").await;
        // The sender's prompt follows the stored record.
        alice.expect("alice#: ").await;

        let records = distributor
            .store()
            .history(&HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_exit_leaves_registry() {
        let distributor = distributor();
        let mut alice = TestClient::join(&distributor, "alice").await;

        alice.send("/QUIT").await;
        alice.expect(CLOSING).await;
        alice.task.await.unwrap();

        assert!(!distributor.registry().contains("alice"));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_registry() {
        let distributor = distributor();
        let mut alice = TestClient::join(&distributor, "alice").await;

        alice.input.shutdown().await.unwrap();
        alice.task.await.unwrap();
        assert!(!distributor.registry().contains("alice"));
    }

    #[tokio::test]
    async fn test_split_input_and_long_lines() {
        let distributor = distributor();
        let mut client = TestClient::connect_with(&distributor, LineCodec::new(16));
        client.expect(NAME_PROMPT).await;

        // Keystroke-at-a-time clients.
        for byte in b"carol\r\n" {
            client.input.write_all(&[*byte]).await.unwrap();
        }
        client.expect("\r\ncarol#: ").await;

        client.send(&"x".repeat(40)).await;
        client.expect("exceeds maximum 16").await;

        client.send("/showusers").await;
        client.expect("carol\r\n").await;
    }

    #[tokio::test]
    async fn test_long_line_tail_is_not_dispatched() {
        let distributor = distributor();
        let mut client = TestClient::connect_with(&distributor, LineCodec::new(16));
        client.expect(NAME_PROMPT).await;
        client.send("carol").await;
        client.expect("\r\ncarol#: ").await;

        client.input.write_all("x".repeat(20).as_bytes()).await.unwrap();
        client.expect("exceeds maximum 16").await;

        // Rest of the oversized line, arriving in a later read.
        client.send("/exit").await;
        client.send("/showusers").await;
        client.expect("carol\r\n").await;
        assert!(distributor.registry().contains("carol"));
    }
}
