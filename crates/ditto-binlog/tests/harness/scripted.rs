//! Scripted replication sessions
//!
//! Each `open()` on [`ScriptedConnector`] consumes the next session script.
//! A transport whose script runs out answers with EOF, and once every
//! session is used up `open()` keeps returning empty (EOF-only) sessions.

use async_trait::async_trait;
use bytes::Bytes;
use ditto_binlog::common::{BinlogPosition, CdcError, Result};
use ditto_binlog::mysql::{ReplicationConnector, ReplicationTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::binlog::eof_packet;

/// One scripted transport reaction
#[derive(Debug, Clone)]
pub enum Step {
    /// Return this framed packet
    Packet(Bytes),
    /// Fail the read as if the server went away
    Drop,
    /// Fail the read with a non-retriable error
    Fail(String),
    /// Block until the read is abandoned
    Hang,
}

#[derive(Debug, Default)]
struct Shared {
    sessions: VecDeque<Vec<Step>>,
    /// Commands sent per opened session
    commands: Vec<Vec<Bytes>>,
    closes: usize,
}

#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    shared: Arc<Mutex<Shared>>,
    head: BinlogPosition,
    checksum: bool,
    refuse_opens: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    pub fn new(head: BinlogPosition) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            head,
            checksum: false,
            refuse_opens: Arc::new(Mutex::new(0)),
        }
    }

    /// Report CRC32 checksums as negotiated on every session.
    pub fn with_checksum(mut self) -> Self {
        self.checksum = true;
        self
    }

    /// Queue the script for the next opened connection.
    pub fn session(self, steps: Vec<Step>) -> Self {
        self.shared.lock().unwrap().sessions.push_back(steps);
        self
    }

    /// Refuse the next `count` opens with a retriable error.
    pub fn refuse_next_opens(&self, count: usize) {
        *self.refuse_opens.lock().unwrap() = count;
    }

    pub fn opens(&self) -> usize {
        self.shared.lock().unwrap().commands.len()
    }

    /// Commands sent on the `session`-th opened connection
    pub fn commands(&self, session: usize) -> Vec<Bytes> {
        self.shared.lock().unwrap().commands[session].clone()
    }

    pub fn closes(&self) -> usize {
        self.shared.lock().unwrap().closes
    }

    /// `(file, offset)` of the dump request sent on `session`
    pub fn dump_start(&self, session: usize) -> (String, u32) {
        let commands = self.commands(session);
        let frame = &commands[0];
        assert_eq!(frame[4], 0x12, "first command is COM_BINLOG_DUMP");
        let offset = u32::from_le_bytes(frame[5..9].try_into().unwrap());
        let file = String::from_utf8(frame[15..].to_vec()).unwrap();
        (file, offset)
    }

    /// Non-blocking flag of the dump request sent on `session`
    pub fn dump_non_blocking(&self, session: usize) -> bool {
        let frame = &self.commands(session)[0];
        u16::from_le_bytes(frame[9..11].try_into().unwrap()) & 0x01 != 0
    }
}

pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    session: usize,
    steps: VecDeque<Step>,
    checksum: bool,
    closed: bool,
}

#[async_trait]
impl ReplicationTransport for ScriptedTransport {
    async fn send_command(&mut self, frame: Bytes) -> Result<()> {
        self.shared.lock().unwrap().commands[self.session].push(frame);
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(CdcError::ConnectionClosed);
        }
        match self.steps.pop_front() {
            Some(Step::Packet(packet)) => Ok(packet),
            Some(Step::Drop) => Err(CdcError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            ))),
            Some(Step::Fail(message)) => Err(CdcError::replication(message)),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(eof_packet()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.shared.lock().unwrap().closes += 1;
        }
        Ok(())
    }

    fn checksum_enabled(&self) -> bool {
        self.checksum
    }
}

#[async_trait]
impl ReplicationConnector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn open(&self) -> Result<ScriptedTransport> {
        {
            let mut refuse = self.refuse_opens.lock().unwrap();
            if *refuse > 0 {
                *refuse -= 1;
                return Err(CdcError::connection_refused("scripted refusal"));
            }
        }

        let mut shared = self.shared.lock().unwrap();
        let steps = shared.sessions.pop_front().unwrap_or_default();
        shared.commands.push(Vec::new());
        Ok(ScriptedTransport {
            shared: Arc::clone(&self.shared),
            session: shared.commands.len() - 1,
            steps: steps.into(),
            checksum: self.checksum,
            closed: false,
        })
    }

    async fn head_position(&self) -> Result<BinlogPosition> {
        Ok(self.head.clone())
    }
}
