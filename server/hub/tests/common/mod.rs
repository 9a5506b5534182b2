#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use lm_hub::{Config, Hub};
use lm_proto::frame::{read_frame, write_frame, MAX_FRAME_BYTES};
use lm_proto::message::{decode, ChatRecord, Decoded, Envelope, FileRecord, Message, ParticipantRecord};

pub const RECV_DEADLINE: Duration = Duration::from_secs(5);

pub fn test_config(spool_dir: PathBuf) -> Config {
    Config {
        bind_address: "127.0.0.1".into(),
        control_port: 0,
        video_port: 0,
        audio_port: 0,
        spool_dir,
        max_file_size: 100 * 1024 * 1024,
        chat_history_size: 500,
        heartbeat_soft_s: 20,
        heartbeat_hard_s: 30,
        max_participants: 100,
        host_name: "host".into(),
        metrics_listen: None,
        write_soft_ms: 5_000,
        write_hard_ms: 15_000,
        transfer_idle_s: 30,
        transfer_accept_s: 30,
        read_body_s: 10,
        login_s: 10,
        shutdown_flush_ms: 100,
    }
}

pub async fn spawn_hub(spool_dir: PathBuf) -> Hub {
    Hub::spawn(test_config(spool_dir)).await.expect("spawn hub")
}

/// Snapshot delivered by `login_success`.
#[derive(Debug)]
pub struct Login {
    pub client_id: u32,
    pub participants: Vec<ParticipantRecord>,
    pub chat_history: Vec<ChatRecord>,
    pub shared_files: BTreeMap<String, FileRecord>,
    pub host_id: u32,
}

#[derive(Debug)]
pub struct TestReader {
    rd: OwnedReadHalf,
}

#[derive(Debug)]
pub struct TestWriter {
    wr: OwnedWriteHalf,
}

#[derive(Debug)]
pub struct TestClient {
    pub login: Login,
    reader: TestReader,
    writer: TestWriter,
}

impl TestWriter {
    pub async fn send(&mut self, msg: Message) {
        let env = Envelope::now(msg);
        write_frame(&mut self.wr, &env.encode().unwrap()).await.expect("send frame");
    }

    /// Write an arbitrary payload inside a well-formed frame.
    pub async fn send_raw(&mut self, payload: &[u8]) {
        write_frame(&mut self.wr, payload).await.expect("send raw frame");
    }
}

impl TestReader {
    pub async fn recv(&mut self) -> Message {
        let payload = timeout(RECV_DEADLINE, read_frame(&mut self.rd, MAX_FRAME_BYTES, None))
            .await
            .expect("message in time")
            .expect("read frame");
        match decode(&payload).expect("valid message") {
            Decoded::Known(env) => env.msg,
            Decoded::Unknown(tag) => panic!("unknown message tag {tag}"),
        }
    }

    /// Skip messages until `pred` matches; panics after the deadline.
    pub async fn recv_until(&mut self, pred: impl Fn(&Message) -> bool) -> Message {
        let deadline = tokio::time::Instant::now() + RECV_DEADLINE;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("expected message before deadline");
            let payload = timeout(remaining, read_frame(&mut self.rd, MAX_FRAME_BYTES, None))
                .await
                .expect("message before deadline")
                .expect("read frame");
            if let Decoded::Known(env) = decode(&payload).expect("valid message") {
                if pred(&env.msg) {
                    return env.msg;
                }
            }
        }
    }

    /// True if the connection delivers nothing for `window`.
    pub async fn silent_for(&mut self, window: Duration) -> bool {
        matches!(
            timeout(window, read_frame(&mut self.rd, MAX_FRAME_BYTES, None)).await,
            Err(_)
        )
    }

    /// Wait for the server to drop the connection, draining any frames still
    /// in flight.
    pub async fn expect_closed(&mut self) {
        let deadline = tokio::time::Instant::now() + RECV_DEADLINE;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .expect("connection closed before deadline");
            match timeout(remaining, read_frame(&mut self.rd, MAX_FRAME_BYTES, None)).await {
                Ok(Err(_)) => return,
                Ok(Ok(_)) => continue,
                Err(_) => panic!("connection not closed before deadline"),
            }
        }
    }
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, name: &str) -> TestClient {
        Self::try_connect(addr, name).await.expect("login accepted")
    }

    /// Connect and log in; `Err(reason)` on `login_error`.
    pub async fn try_connect(addr: SocketAddr, name: &str) -> Result<TestClient, String> {
        let stream = TcpStream::connect(addr).await.expect("connect control port");
        let (rd, wr) = stream.into_split();
        let mut reader = TestReader { rd };
        let mut writer = TestWriter { wr };

        writer.send(Message::Login { name: name.to_string() }).await;

        match reader.recv().await {
            Message::LoginSuccess { client_id, participants, chat_history, shared_files, host_id } => {
                Ok(TestClient {
                    login: Login { client_id, participants, chat_history, shared_files, host_id },
                    reader,
                    writer,
                })
            }
            Message::LoginError { reason } => Err(reason),
            other => panic!("unexpected login reply: {other:?}"),
        }
    }

    pub fn id(&self) -> u32 {
        self.login.client_id
    }

    /// Separate halves so a test can keep writing while another task blocks
    /// on reads.
    pub fn split(self) -> (TestReader, TestWriter, Login) {
        (self.reader, self.writer, self.login)
    }

    pub async fn send(&mut self, msg: Message) {
        self.writer.send(msg).await;
    }

    pub async fn send_raw(&mut self, payload: &[u8]) {
        self.writer.send_raw(payload).await;
    }

    pub async fn recv(&mut self) -> Message {
        self.reader.recv().await
    }

    pub async fn recv_until(&mut self, pred: impl Fn(&Message) -> bool) -> Message {
        self.reader.recv_until(pred).await
    }

    pub async fn silent_for(&mut self, window: Duration) -> bool {
        self.reader.silent_for(window).await
    }

    pub async fn expect_closed(&mut self) {
        self.reader.expect_closed().await
    }
}
