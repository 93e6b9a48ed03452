//! MySQL replication client
//!
//! Implements the client side of the MySQL protocol needed for replication:
//! - Handshake and authentication (mysql_native_password, caching_sha2_password)
//! - COM_QUERY for session setup (checksum negotiation)
//! - COM_REGISTER_SLAVE
//! - Raw packet transport for the binlog dump phase
//!
//! Handshake internals use `anyhow`; errors are converted to [`CdcError`]
//! at the [`ReplicationTransport`] boundary.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::common::{CdcError, Validator, CONNECTION_TIMEOUT_SECS, IO_TIMEOUT_SECS};

use super::codec::{
    encode_frame, parse_error_payload, PacketHeader, COM_QUERY, COM_REGISTER_SLAVE,
    MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE,
};
use super::reader::PayloadReader;
use super::transport::ReplicationTransport;

/// utf8mb4_general_ci
const UTF8MB4_COLLATION: u8 = 45;

/// MySQL capability flags
#[derive(Debug, Clone, Copy)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    pub const CLIENT_LONG_PASSWORD: u32 = 0x00000001;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x00000008;
    pub const CLIENT_PROTOCOL_41: u32 = 0x00000200;
    pub const CLIENT_TRANSACTIONS: u32 = 0x00002000;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x00008000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x00080000;
    pub const CLIENT_DEPRECATE_EOF: u32 = 0x01000000;

    pub fn new(flags: u32) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// MySQL handshake packet (initial greeting from server)
#[derive(Debug)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capability_flags: CapabilityFlags,
    pub character_set: u8,
    pub status_flags: u16,
    /// Scramble used by the auth plugins (both parts joined)
    pub auth_data: Vec<u8>,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(data);

        let protocol_version = reader.u8()?;
        if protocol_version != 10 {
            bail!("Unsupported handshake protocol version {}", protocol_version);
        }
        let server_version = read_null_terminated(&mut reader)?;
        let connection_id = reader.u32_le()?;
        let mut auth_data = reader.bytes(8)?.to_vec();
        reader.skip(1)?; // filler

        let cap_lower = reader.u16_le()? as u32;
        let character_set = reader.u8()?;
        let status_flags = reader.u16_le()?;
        let cap_upper = reader.u16_le()? as u32;
        let capability_flags = CapabilityFlags::new((cap_upper << 16) | cap_lower);

        let auth_data_len = reader.u8()? as usize;
        reader.skip(10)?; // reserved

        // Part 2 is max(13, len - 8) bytes, null-terminated
        let part2_len = auth_data_len.saturating_sub(8).max(13);
        let part2 = reader.bytes(part2_len.min(reader.remaining()))?;
        let part2_end = part2.iter().position(|&b| b == 0).unwrap_or(part2.len());
        auth_data.extend_from_slice(&part2[..part2_end]);

        let auth_plugin_name = if capability_flags.has(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            read_null_terminated(&mut reader)?
        } else {
            String::new()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capability_flags,
            character_set,
            status_flags,
            auth_data,
            auth_plugin_name,
        })
    }
}

/// Read a null-terminated string; a missing terminator ends at the buffer end.
fn read_null_terminated(reader: &mut PayloadReader<'_>) -> Result<String> {
    let rest = reader.rest();
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let value = String::from_utf8_lossy(&rest[..end]).into_owned();
    // Put back what follows the terminator
    let consumed = (end + 1).min(rest.len());
    *reader = PayloadReader::new(&rest[consumed..]);
    Ok(value)
}

fn server_error(payload: &[u8]) -> anyhow::Error {
    match parse_error_payload(payload) {
        Ok((code, sql_state, message)) => anyhow::Error::new(CdcError::Server {
            code,
            sql_state,
            message,
        }),
        Err(e) => anyhow::Error::new(CdcError::Codec(e)),
    }
}

/// Convert handshake-phase errors into the public error type, keeping typed
/// server and I/O errors intact.
pub(crate) fn into_cdc_error(err: anyhow::Error) -> CdcError {
    let err = match err.downcast::<CdcError>() {
        Ok(cdc) => return cdc,
        Err(err) => err,
    };
    match err.downcast::<std::io::Error>() {
        Ok(io) => CdcError::Io(io),
        Err(err) => CdcError::replication(format!("{:#}", err)),
    }
}

/// MySQL client connection used for replication
pub struct MySqlBinlogClient {
    stream: BufReader<TcpStream>,
    sequence_id: u8,
    server_version: String,
    connection_id: u32,
    checksum: bool,
    closed: bool,
}

impl std::fmt::Debug for MySqlBinlogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlBinlogClient")
            .field("sequence_id", &self.sequence_id)
            .field("server_version", &self.server_version)
            .field("connection_id", &self.connection_id)
            .field("checksum", &self.checksum)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl MySqlBinlogClient {
    /// Connect to MySQL server and authenticate
    ///
    /// # Security
    ///
    /// - Validates host and user name before anything is sent
    /// - Applies a connection timeout and I/O timeouts during the handshake
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: Option<&str>,
    ) -> Result<Self> {
        Validator::validate_host(host)?;
        Validator::validate_user(user)?;

        let addr = format!("{}:{}", host, port);
        info!("Connecting to MySQL at {}", addr);

        let tcp_stream = Self::connect_tcp(&addr).await?;
        let mut client = Self {
            stream: BufReader::new(tcp_stream),
            sequence_id: 0,
            server_version: String::new(),
            connection_id: 0,
            checksum: false,
            closed: false,
        };

        let handshake_data = client.read_payload_timed().await?;
        if handshake_data.first() == Some(&0xFF) {
            return Err(server_error(&handshake_data));
        }
        let handshake =
            HandshakePacket::parse(&handshake_data).context("Failed to parse handshake packet")?;

        info!(
            "Connected to MySQL {} (connection_id={})",
            handshake.server_version, handshake.connection_id
        );
        debug!("Auth plugin: {}", handshake.auth_plugin_name);

        client.server_version = handshake.server_version.clone();
        client.connection_id = handshake.connection_id;
        client.authenticate(user, password, &handshake).await?;

        Ok(client)
    }

    /// Connect TCP with timeout
    async fn connect_tcp(addr: &str) -> Result<TcpStream> {
        match timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e).context("Failed to connect to MySQL server"),
            Err(_) => Err(anyhow::Error::new(CdcError::timeout(format!(
                "connecting to {} after {}s",
                addr, CONNECTION_TIMEOUT_SECS
            )))),
        }
    }

    /// Read one envelope: header and payload.
    async fn read_envelope(&mut self) -> Result<(PacketHeader, Vec<u8>)> {
        let mut raw_header = [0u8; PACKET_HEADER_SIZE];
        self.stream.read_exact(&mut raw_header).await?;
        let header = PacketHeader::parse(&raw_header)?;
        self.sequence_id = header.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; header.length];
        self.stream.read_exact(&mut payload).await?;
        Ok((header, payload))
    }

    /// Read a full payload, merging continuation envelopes of
    /// `MAX_PAYLOAD_SIZE`-byte packets.
    async fn read_payload(&mut self) -> Result<Vec<u8>> {
        let (mut header, mut payload) = self.read_envelope().await?;
        while header.length == MAX_PAYLOAD_SIZE {
            let (next_header, next) = self.read_envelope().await?;
            Validator::validate_message_size(payload.len() + next.len())?;
            payload.extend_from_slice(&next);
            header = next_header;
        }
        Ok(payload)
    }

    /// Read a payload during the handshake / command phase.
    async fn read_payload_timed(&mut self) -> Result<Vec<u8>> {
        match timeout(Duration::from_secs(IO_TIMEOUT_SECS), self.read_payload()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::Error::new(CdcError::timeout(format!(
                "no response from server after {}s",
                IO_TIMEOUT_SECS
            )))),
        }
    }

    /// Write a MySQL packet with the current sequence id
    async fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        let frame = encode_frame(data, self.sequence_id)?;
        self.stream.get_mut().write_all(&frame).await?;
        self.stream.get_mut().flush().await?;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }

    /// Authenticate with the server
    async fn authenticate(
        &mut self,
        user: &str,
        password: Option<&str>,
        handshake: &HandshakePacket,
    ) -> Result<()> {
        let client_flags = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_TRANSACTIONS
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_DEPRECATE_EOF;

        let auth_response = match handshake.auth_plugin_name.as_str() {
            "mysql_native_password" => Self::mysql_native_password(password, &handshake.auth_data),
            "caching_sha2_password" => Self::caching_sha2_password(password, &handshake.auth_data),
            other => {
                warn!(
                    "Unknown auth plugin: {}, trying mysql_native_password",
                    other
                );
                Self::mysql_native_password(password, &handshake.auth_data)
            }
        };

        let mut response = BytesMut::with_capacity(128);
        response.put_u32_le(client_flags);
        response.put_u32_le(MAX_PAYLOAD_SIZE as u32);
        response.put_u8(UTF8MB4_COLLATION);
        response.put_slice(&[0u8; 23]);
        response.put_slice(user.as_bytes());
        response.put_u8(0);
        response.put_u8(auth_response.len() as u8);
        response.put_slice(&auth_response);
        response.put_slice(handshake.auth_plugin_name.as_bytes());
        response.put_u8(0);

        self.write_packet(&response).await?;
        let resp = self.read_payload_timed().await?;

        match resp.first() {
            Some(0x00) => {
                debug!("Authentication successful");
                Ok(())
            }
            Some(0xFF) => Err(server_error(&resp)).context("Authentication failed"),
            Some(0xFE) => {
                // Auth switch request: plugin name, then scramble
                let body = &resp[1..];
                let name_end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                let plugin_name = String::from_utf8_lossy(&body[..name_end]).into_owned();
                let mut auth_data = body.get(name_end + 1..).unwrap_or_default();
                if auth_data.last() == Some(&0) {
                    auth_data = &auth_data[..auth_data.len() - 1];
                }

                debug!("Auth switch to plugin: {}", plugin_name);
                let auth_data = auth_data.to_vec();
                self.handle_auth_switch(&plugin_name, &auth_data, password)
                    .await
            }
            Some(0x01) if handshake.auth_plugin_name == "caching_sha2_password" => {
                self.finish_caching_sha2(&resp).await
            }
            Some(other) => bail!("Unexpected auth response: 0x{:02X}", other),
            None => bail!("Empty auth response"),
        }
    }

    /// Handle auth switch request
    async fn handle_auth_switch(
        &mut self,
        plugin: &str,
        auth_data: &[u8],
        password: Option<&str>,
    ) -> Result<()> {
        let auth_response = match plugin {
            "mysql_native_password" => Self::mysql_native_password(password, auth_data),
            "caching_sha2_password" => Self::caching_sha2_password(password, auth_data),
            _ => bail!("Unsupported auth plugin for switch: {}", plugin),
        };

        self.write_packet(&auth_response).await?;

        let resp = self.read_payload_timed().await?;
        match resp.first() {
            Some(0x00) => Ok(()),
            Some(0x01) if plugin == "caching_sha2_password" => self.finish_caching_sha2(&resp).await,
            Some(0xFF) => Err(server_error(&resp)).context("Auth switch failed"),
            _ => bail!("Unexpected auth switch response"),
        }
    }

    /// caching_sha2_password answers with `0x01 0x03` (fast auth success,
    /// followed by OK) or `0x01 0x04` (full auth, which needs TLS or RSA).
    async fn finish_caching_sha2(&mut self, resp: &[u8]) -> Result<()> {
        match resp.get(1) {
            Some(0x03) => {
                debug!("Fast auth success");
                let ok = self.read_payload_timed().await?;
                match ok.first() {
                    Some(0x00) => Ok(()),
                    Some(0xFF) => Err(server_error(&ok)).context("Authentication failed"),
                    _ => bail!("Unexpected packet after fast auth"),
                }
            }
            _ => bail!("caching_sha2_password full authentication requires a secure connection"),
        }
    }

    /// mysql_native_password authentication
    fn mysql_native_password(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
        match password {
            None | Some("") => vec![],
            Some(pwd) => {
                // SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
                let stage1 = Sha1::digest(pwd.as_bytes());
                let stage2 = Sha1::digest(stage1);

                let mut hasher = Sha1::new();
                hasher.update(salt);
                hasher.update(stage2);
                let stage3 = hasher.finalize();

                stage1
                    .iter()
                    .zip(stage3.iter())
                    .map(|(a, b)| a ^ b)
                    .collect()
            }
        }
    }

    /// caching_sha2_password authentication
    fn caching_sha2_password(password: Option<&str>, salt: &[u8]) -> Vec<u8> {
        match password {
            None | Some("") => vec![],
            Some(pwd) => {
                // XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + salt))
                let hash1 = Sha256::digest(pwd.as_bytes());
                let hash2 = Sha256::digest(hash1);

                let mut hasher = Sha256::new();
                hasher.update(hash2);
                hasher.update(salt);
                let hash3 = hasher.finalize();

                hash1.iter().zip(hash3.iter()).map(|(a, b)| a ^ b).collect()
            }
        }
    }

    async fn send_query(&mut self, sql: &str) -> Result<()> {
        self.sequence_id = 0;

        let mut packet = BytesMut::with_capacity(sql.len() + 1);
        packet.put_u8(COM_QUERY);
        packet.put_slice(sql.as_bytes());
        self.write_packet(&packet).await
    }

    /// Execute a statement, discarding any result set
    pub async fn query(&mut self, sql: &str) -> Result<()> {
        self.send_query(sql).await?;

        let resp = self.read_payload_timed().await?;
        match resp.first() {
            Some(0x00) => Ok(()),
            Some(0xFF) => Err(server_error(&resp)).with_context(|| format!("Query failed: {}", sql)),
            _ => {
                // Result set: column definitions and rows end with an
                // 0xFE-marked OK packet (CLIENT_DEPRECATE_EOF)
                loop {
                    let packet = self.read_payload_timed().await?;
                    match packet.first() {
                        Some(0xFE) if packet.len() < MAX_PAYLOAD_SIZE => return Ok(()),
                        Some(0xFF) => return Err(server_error(&packet)),
                        _ => continue,
                    }
                }
            }
        }
    }

    /// Execute a query and return the first column of its first row
    /// (`None` for SQL NULL or an empty result).
    pub async fn query_first_value(&mut self, sql: &str) -> Result<Option<String>> {
        self.send_query(sql).await?;

        let resp = self.read_payload_timed().await?;
        let column_count = match resp.first() {
            Some(0x00) => return Ok(None),
            Some(0xFF) => {
                return Err(server_error(&resp)).with_context(|| format!("Query failed: {}", sql))
            }
            _ => PayloadReader::new(&resp).lenenc_int()?,
        };
        for _ in 0..column_count {
            self.read_payload_timed().await?;
        }

        let mut value = None;
        let mut first_row = true;
        loop {
            let packet = self.read_payload_timed().await?;
            match packet.first() {
                Some(0xFE) if packet.len() < MAX_PAYLOAD_SIZE => return Ok(value),
                Some(0xFF) => return Err(server_error(&packet)),
                // 0xFB marks NULL in a text row
                Some(0xFB) => first_row = false,
                Some(_) if first_row => {
                    first_row = false;
                    let mut reader = PayloadReader::new(&packet);
                    let len = reader.lenenc_len()?;
                    value = Some(String::from_utf8_lossy(reader.bytes(len)?).into_owned());
                }
                _ => continue,
            }
        }
    }

    /// Tell the server this replica understands binlog checksums and learn
    /// whether events will carry one.
    ///
    /// Without this the server refuses to stream checksummed binlogs. For
    /// MariaDB, the checksum variable MUST be set before
    /// `@mariadb_slave_capability`. Returns `true` when the server writes
    /// CRC32 checksums.
    pub async fn negotiate_checksum(&mut self) -> Result<bool> {
        let announced = if self.is_mariadb() {
            let announced = match self.query("SET @master_binlog_checksum = 'CRC32'").await {
                Ok(()) => true,
                Err(e) => {
                    debug!("MariaDB binlog checksum set failed: {}", e);
                    false
                }
            };
            // Capability bits: 1 = checksums, 4 = start past ignorable events
            if let Err(e) = self.query("SET @mariadb_slave_capability = 5").await {
                debug!("MariaDB slave capability set failed: {}", e);
            }
            announced
        } else {
            // `@source_*` since MySQL 8.0.26, `@master_*` before
            match self
                .query("SET @source_binlog_checksum = @@global.binlog_checksum")
                .await
            {
                Ok(()) => true,
                Err(e) => match self
                    .query("SET @master_binlog_checksum = @@global.binlog_checksum")
                    .await
                {
                    Ok(()) => true,
                    Err(e2) => {
                        debug!(
                            "Binlog checksum negotiation failed (may be MySQL < 5.6.5): {} / {}",
                            e, e2
                        );
                        false
                    }
                },
            }
        };

        // A server that never heard the announcement sends no checksums
        self.checksum = announced
            && match self.query_first_value("SELECT @@global.binlog_checksum").await {
                Ok(value) => value.is_some_and(|v| v.eq_ignore_ascii_case("CRC32")),
                Err(e) => {
                    warn!("Could not read binlog_checksum, assuming NONE: {}", e);
                    false
                }
            };
        debug!("Binlog checksum: {}", if self.checksum { "CRC32" } else { "NONE" });
        Ok(self.checksum)
    }

    /// Register as a replication replica
    pub async fn register_replica(&mut self, server_id: u32) -> Result<()> {
        self.sequence_id = 0;

        let mut packet = BytesMut::with_capacity(18);
        packet.put_u8(COM_REGISTER_SLAVE);
        packet.put_u32_le(server_id);
        packet.put_u8(0); // hostname length
        packet.put_u8(0); // user length
        packet.put_u8(0); // password length
        packet.put_u16_le(0); // port
        packet.put_u32_le(0); // replication rank (ignored)
        packet.put_u32_le(0); // master id (0 = use this connection's server id)

        self.write_packet(&packet).await?;

        let resp = self.read_payload_timed().await?;
        match resp.first() {
            Some(0x00) => {
                info!("Registered as replica with server_id={}", server_id);
                Ok(())
            }
            Some(0xFF) => Err(server_error(&resp)).context("Failed to register as replica"),
            _ => bail!("Unexpected response to COM_REGISTER_SLAVE"),
        }
    }

    /// Get server version
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Get connection ID
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn is_mariadb(&self) -> bool {
        self.server_version.contains("MariaDB")
    }

    /// Whether the server was found to write CRC32 event checksums
    pub fn checksum_enabled(&self) -> bool {
        self.checksum
    }
}

#[async_trait]
impl ReplicationTransport for MySqlBinlogClient {
    async fn send_command(&mut self, frame: Bytes) -> crate::common::Result<()> {
        if self.closed {
            return Err(CdcError::ConnectionClosed);
        }
        let header = PacketHeader::parse(&frame)?;
        self.stream.get_mut().write_all(&frame).await?;
        self.stream.get_mut().flush().await?;
        self.sequence_id = header.sequence_id.wrapping_add(1);
        Ok(())
    }

    async fn read_packet(&mut self) -> crate::common::Result<Bytes> {
        if self.closed {
            return Err(CdcError::ConnectionClosed);
        }
        let payload = self.read_payload().await.map_err(into_cdc_error)?;

        let header = PacketHeader {
            length: payload.len().min(MAX_PAYLOAD_SIZE),
            sequence_id: self.sequence_id.wrapping_sub(1),
        };
        let mut packet = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
        packet.put_slice(&header.encode());
        packet.put_slice(&payload);
        Ok(packet.freeze())
    }

    async fn close(&mut self) -> crate::common::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!("Error shutting down replication connection: {}", e);
        }
        Ok(())
    }

    fn checksum_enabled(&self) -> bool {
        self.checksum
    }
}
