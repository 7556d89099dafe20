//! iRODS client implementation
//!
//! One [`IrodsConnection`] is one TCP connection, authenticated as one
//! user. Connections are never pooled: the bridge opens one per bind
//! evaluation and closes it before answering.

use crate::irods::types::*;
use crate::remote::{RemoteAuthenticator, RemoteSession};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ldap_irods_core::{Error, Result};
use ldap_irods_crypto::{irods_challenge_response, IRODS_CHALLENGE_LEN};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Authenticated connection to an iRODS server
pub struct IrodsConnection {
    stream: TcpStream,
    config: IrodsConfig,
    username: String,
}

impl IrodsConnection {
    /// Connect to the server and log in with native authentication
    pub async fn connect(config: &IrodsConfig, username: &str, password: &str) -> Result<Self> {
        let addr = config.address();
        debug!(%addr, user = %username, "Connecting to iRODS server");

        let stream = timeout(config.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::RemoteConnectivity(format!("timed out connecting to {}", addr)))?
            .map_err(|e| Error::RemoteConnectivity(format!("failed to connect to {}: {}", addr, e)))?;

        let mut conn = Self {
            stream,
            config: config.clone(),
            username: username.to_string(),
        };

        conn.startup().await?;
        conn.login(password).await?;

        debug!(user = %username, zone = %config.zone, "Authenticated to iRODS");
        Ok(conn)
    }

    /// Names of the groups `username` is a member of
    pub async fn list_user_group_names(&mut self, username: &str) -> Result<Vec<String>> {
        let mut query = GenQueryInp::user_groups(username);
        let mut groups = Vec::new();

        loop {
            let reply = self.api(GEN_QUERY_AN, &to_xml(&query)?).await?;
            match reply.header.int_info {
                CAT_NO_ROWS_FOUND => break,
                code if code < 0 => {
                    return Err(Error::RemoteProtocol(format!(
                        "group query for {} failed with error {}",
                        username, code
                    )))
                }
                _ => {}
            }

            let out: GenQueryOut = from_xml(&reply.body)?;
            groups.extend(out.column(COL_USER_GROUP_NAME));

            if out.continue_inx <= 0 {
                break;
            }
            query.continue_inx = out.continue_inx;
        }

        debug!(user = %username, count = groups.len(), "Found groups for user");
        Ok(groups)
    }

    /// Say goodbye and close the socket. Errors are logged, not returned.
    pub async fn disconnect(mut self) {
        if let Err(e) = write_message(&mut self.stream, RODS_DISCONNECT, &[], 0).await {
            debug!(error = %e, "Failed to send disconnect to iRODS");
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Failed to shut down iRODS connection");
        }
    }

    async fn startup(&mut self) -> Result<()> {
        let pack = StartupPack::new(&self.config, &self.username);
        let reply = self.exchange(RODS_CONNECT, &to_xml(&pack)?, 0).await?;

        if reply.header.msg_type != RODS_VERSION {
            return Err(Error::RemoteProtocol(format!(
                "expected {} reply to startup, got {}",
                RODS_VERSION, reply.header.msg_type
            )));
        }
        if reply.header.int_info < 0 {
            return Err(Error::RemoteConnectivity(format!(
                "iRODS refused connection with error {}",
                reply.header.int_info
            )));
        }

        let version: Version = from_xml(&reply.body)?;
        debug!(release = %version.rel_version, "iRODS server version");
        Ok(())
    }

    async fn login(&mut self, password: &str) -> Result<()> {
        let reply = self.api(AUTH_REQUEST_AN, &[]).await?;
        if reply.header.int_info < 0 {
            return Err(Error::RemoteProtocol(format!(
                "auth request failed with error {}",
                reply.header.int_info
            )));
        }

        let out: AuthRequestOut = from_xml(&reply.body)?;
        let challenge = STANDARD
            .decode(out.challenge.trim())
            .map_err(|e| Error::RemoteProtocol(format!("invalid auth challenge: {}", e)))?;
        let challenge = &challenge[..challenge.len().min(IRODS_CHALLENGE_LEN)];

        let response = AuthResponseInp {
            response: irods_challenge_response(challenge, password),
            username: format!("{}#{}", self.username, self.config.zone),
        };

        let reply = self.api(AUTH_RESPONSE_AN, &to_xml(&response)?).await?;
        match reply.header.int_info {
            code if code >= 0 => Ok(()),
            code @ (CAT_INVALID_AUTHENTICATION | CAT_INVALID_USER) => {
                debug!(user = %self.username, code, "iRODS rejected credentials");
                Err(Error::InvalidCredentials(self.username.clone()))
            }
            code => {
                warn!(user = %self.username, code, "iRODS authentication failed");
                Err(Error::InvalidCredentials(self.username.clone()))
            }
        }
    }

    async fn api(&mut self, api_number: i32, body: &[u8]) -> Result<IrodsMessage> {
        let reply = self.exchange(RODS_API_REQ, body, api_number).await?;
        if reply.header.msg_type != RODS_API_REPLY {
            return Err(Error::RemoteProtocol(format!(
                "expected {} for api {}, got {}",
                RODS_API_REPLY, api_number, reply.header.msg_type
            )));
        }
        Ok(reply)
    }

    async fn exchange(&mut self, msg_type: &str, body: &[u8], int_info: i32) -> Result<IrodsMessage> {
        let stream = &mut self.stream;
        let round_trip = async move {
            write_message(stream, msg_type, body, int_info).await?;
            read_message(stream).await
        };

        timeout(self.config.timeout, round_trip)
            .await
            .map_err(|_| Error::RemoteConnectivity(format!("iRODS {} request timed out", msg_type)))?
            .map_err(|e| Error::RemoteConnectivity(format!("iRODS {} request failed: {}", msg_type, e)))
    }
}

#[async_trait]
impl RemoteSession for IrodsConnection {
    async fn list_user_groups(&mut self, username: &str) -> Result<Vec<String>> {
        self.list_user_group_names(username).await
    }

    async fn disconnect(self: Box<Self>) {
        IrodsConnection::disconnect(*self).await
    }
}

/// [`RemoteAuthenticator`] backed by an iRODS zone
#[derive(Debug, Clone)]
pub struct IrodsAuthenticator {
    config: IrodsConfig,
}

impl IrodsAuthenticator {
    pub fn new(config: IrodsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IrodsConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteAuthenticator for IrodsAuthenticator {
    async fn connect(&self, username: &str, password: &str) -> Result<Box<dyn RemoteSession>> {
        let conn = IrodsConnection::connect(&self.config, username, password).await?;
        Ok(Box::new(conn))
    }
}

// =========================================================================
// Framing
// =========================================================================

pub(crate) async fn write_message<W>(w: &mut W, msg_type: &str, body: &[u8], int_info: i32) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = MsgHeader {
        msg_type: msg_type.to_string(),
        msg_len: body.len() as u32,
        error_len: 0,
        bs_len: 0,
        int_info,
    };
    let header = quick_xml::se::to_string(&header)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let mut buf = Vec::with_capacity(4 + header.len() + body.len());
    buf.extend_from_slice(&(header.len() as u32).to_be_bytes());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body);

    w.write_all(&buf).await?;
    w.flush().await
}

pub(crate) async fn read_message<R>(r: &mut R) -> io::Result<IrodsMessage>
where
    R: AsyncRead + Unpin,
{
    let header_len = r.read_u32().await? as usize;
    let header_bytes = read_segment(r, header_len).await?;
    let header_text = std::str::from_utf8(&header_bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let header: MsgHeader = quick_xml::de::from_str(header_text)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let body = read_segment(r, header.msg_len as usize).await?;
    let error = read_segment(r, header.error_len as usize).await?;
    let bs = read_segment(r, header.bs_len as usize).await?;

    Ok(IrodsMessage {
        header,
        body,
        error,
        bs,
    })
}

async fn read_segment<R>(r: &mut R, len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    if len > MAX_SEGMENT_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message segment of {} bytes exceeds limit", len),
        ));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

fn to_xml<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    quick_xml::se::to_string(value)
        .map(String::into_bytes)
        .map_err(|e| Error::RemoteProtocol(format!("failed to encode message: {}", e)))
}

fn from_xml<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::RemoteProtocol(format!("message is not UTF-8: {}", e)))?;
    // the server NUL-terminates some bodies
    quick_xml::de::from_str(text.trim_end_matches('\0'))
        .map_err(|e| Error::RemoteProtocol(format!("failed to decode message: {}", e)))
}
