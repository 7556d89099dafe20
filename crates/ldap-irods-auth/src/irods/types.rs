//! iRODS protocol types and configuration
//!
//! Message bodies are packed as XML (`irodsProt` 1). Element names follow
//! the iRODS packing instructions (`*_PI`).

use ldap_irods_core::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Protocol constants
// ============================================================================

pub const RODS_CONNECT: &str = "RODS_CONNECT";
pub const RODS_VERSION: &str = "RODS_VERSION";
pub const RODS_API_REQ: &str = "RODS_API_REQ";
pub const RODS_API_REPLY: &str = "RODS_API_REPLY";
pub const RODS_DISCONNECT: &str = "RODS_DISCONNECT";

/// XML packing protocol
pub const XML_PROT: i32 = 1;
pub const RELEASE_VERSION: &str = "rods4.2.8";
pub const API_VERSION: &str = "d";

pub const GEN_QUERY_AN: i32 = 702;
pub const AUTH_REQUEST_AN: i32 = 703;
pub const AUTH_RESPONSE_AN: i32 = 704;

pub const COL_USER_NAME: i32 = 202;
pub const COL_USER_GROUP_NAME: i32 = 901;

pub const CAT_NO_ROWS_FOUND: i32 = -808000;
pub const CAT_INVALID_AUTHENTICATION: i32 = -826000;
pub const CAT_INVALID_USER: i32 = -827000;

pub const MAX_ROWS: i32 = 500;

/// Upper bound for any single message segment read off the wire
pub const MAX_SEGMENT_LEN: usize = 8 * 1024 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Connection parameters for one iRODS zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrodsConfig {
    pub host: String,
    pub port: u16,
    pub zone: String,
    /// Bound on connecting and on every request/response exchange
    pub timeout: Duration,
    /// Reported to the server in the startup pack
    pub application_name: String,
}

impl IrodsConfig {
    pub fn new(host: impl Into<String>, port: u16, zone: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            zone: zone.into(),
            timeout: Duration::from_secs(ldap_irods_core::config::IRODS_REQUEST_TIMEOUT_DEFAULT),
            application_name: ldap_irods_core::APPLICATION_NAME.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.irods_timeout(),
            ..Self::new(&config.irods_host, config.irods_port, &config.irods_zone)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Message framing
// ============================================================================

/// Header preceding every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "MsgHeader_PI", rename_all = "camelCase")]
pub struct MsgHeader {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub msg_len: u32,
    pub error_len: u32,
    pub bs_len: u32,
    pub int_info: i32,
}

/// A complete message: header plus its three payload segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrodsMessage {
    pub header: MsgHeader,
    pub body: Vec<u8>,
    pub error: Vec<u8>,
    pub bs: Vec<u8>,
}

// ============================================================================
// Message bodies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "StartupPack_PI", rename_all = "camelCase")]
pub struct StartupPack {
    pub irods_prot: i32,
    pub reconn_flag: i32,
    pub connect_cnt: i32,
    pub proxy_user: String,
    pub proxy_rcat_zone: String,
    pub client_user: String,
    pub client_rcat_zone: String,
    pub rel_version: String,
    pub api_version: String,
    pub option: String,
}

impl StartupPack {
    pub fn new(config: &IrodsConfig, username: &str) -> Self {
        Self {
            irods_prot: XML_PROT,
            reconn_flag: 0,
            connect_cnt: 0,
            proxy_user: username.to_string(),
            proxy_rcat_zone: config.zone.clone(),
            client_user: username.to_string(),
            client_rcat_zone: config.zone.clone(),
            rel_version: RELEASE_VERSION.to_string(),
            api_version: API_VERSION.to_string(),
            option: config.application_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "Version_PI", rename_all = "camelCase", default)]
pub struct Version {
    pub status: i32,
    pub rel_version: String,
    pub api_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "authRequestOut_PI")]
pub struct AuthRequestOut {
    pub challenge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "authResponseInp_PI")]
pub struct AuthResponseInp {
    pub response: String,
    /// `user#zone`
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "KeyValPair_PI", rename_all = "camelCase")]
pub struct KeyValPair {
    pub ss_len: i32,
    #[serde(default)]
    pub key_word: Vec<String>,
    #[serde(default)]
    pub svalue: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "InxIvalPair_PI", rename_all = "camelCase")]
pub struct InxIvalPair {
    pub ii_len: i32,
    #[serde(default)]
    pub inx: Vec<i32>,
    #[serde(default)]
    pub ivalue: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "InxValPair_PI", rename_all = "camelCase")]
pub struct InxValPair {
    pub is_len: i32,
    #[serde(default)]
    pub inx: Vec<i32>,
    #[serde(default)]
    pub svalue: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "GenQueryInp_PI", rename_all = "camelCase")]
pub struct GenQueryInp {
    pub max_rows: i32,
    pub continue_inx: i32,
    pub partial_start_index: i32,
    pub options: i32,
    #[serde(rename = "KeyValPair_PI")]
    pub cond_input: KeyValPair,
    #[serde(rename = "InxIvalPair_PI")]
    pub select_inp: InxIvalPair,
    #[serde(rename = "InxValPair_PI")]
    pub sql_cond_inp: InxValPair,
}

impl GenQueryInp {
    /// Group names of `username`
    pub fn user_groups(username: &str) -> Self {
        Self {
            max_rows: MAX_ROWS,
            continue_inx: 0,
            partial_start_index: 0,
            options: 0,
            cond_input: KeyValPair::default(),
            select_inp: InxIvalPair {
                ii_len: 1,
                inx: vec![COL_USER_GROUP_NAME],
                ivalue: vec![1],
            },
            sql_cond_inp: InxValPair {
                is_len: 1,
                inx: vec![COL_USER_NAME],
                svalue: vec![format!("= '{}'", username.replace('\'', "''"))],
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "SqlResult_PI", rename_all = "camelCase", default)]
pub struct SqlResult {
    pub attri_inx: i32,
    pub reslen: i32,
    pub value: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "GenQueryOut_PI", rename_all = "camelCase", default)]
pub struct GenQueryOut {
    pub row_cnt: i32,
    pub attri_cnt: i32,
    pub continue_inx: i32,
    pub total_row_count: i32,
    #[serde(rename = "SqlResult_PI")]
    pub sql_result: Vec<SqlResult>,
}

impl GenQueryOut {
    /// Values of one selected column
    pub fn column(&self, attri_inx: i32) -> Vec<String> {
        self.sql_result
            .iter()
            .find(|r| r.attri_inx == attri_inx)
            .map(|r| r.value.clone())
            .unwrap_or_default()
    }
}
