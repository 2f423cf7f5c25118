//! Resolved configuration, treated as read-only input by every phase.
//!
//! Hosts that parse their own option surface can construct [`Options`]
//! directly; `from_toml_str` covers the ones that hand us a config file.

use crate::constants::{
    DEFAULT_AFS_MOUNTPOINT, DEFAULT_CCACHE_DIR, DEFAULT_KA_TIMEOUT_SECS, KA_TGS_PORT,
};
use crate::error::KafsError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// Maps one local account to an explicit principal name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrincipalMapping {
    pub user: String,
    pub principal: String,
}

/// Token acquisition mechanisms, in the order they should be tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMechanismKind {
    /// Install the Kerberos 5 service ticket directly.
    NativeV5,
    /// Exchange the service ticket at the cell's authentication servers.
    AuthServer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Realm for building principals. Absent means the library default.
    pub realm: Option<String>,
    /// Accounts below this uid are not ours to handle.
    pub minimum_uid: Option<u32>,
    pub mappings: Vec<PrincipalMapping>,
    /// Honor the account's `.k5login`-equivalent authorization file.
    pub user_check: bool,
    /// Treat an unknown or expired principal as "not our user" instead of
    /// an unknown user. One flag for both cases.
    pub ignore_unknown_principals: bool,
    pub debug: bool,
    /// Obtain AFS tokens during session-open.
    pub tokens: bool,
    /// Cells to hold tokens for. Empty means the workstation's own cell.
    pub afs_cells: Vec<String>,
    pub token_strategy: Vec<TokenMechanismKind>,
    pub ccache_dir: PathBuf,
    pub afs_mountpoint: PathBuf,
    /// Seconds to wait on each authentication server.
    #[serde(deserialize_with = "duration_secs")]
    pub ka_timeout: Duration,
    pub ka_port: u16,
}

fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Default for Options {
    fn default() -> Self {
        Options {
            realm: None,
            minimum_uid: None,
            mappings: Vec::new(),
            user_check: true,
            ignore_unknown_principals: false,
            debug: false,
            tokens: true,
            afs_cells: Vec::new(),
            token_strategy: vec![TokenMechanismKind::NativeV5, TokenMechanismKind::AuthServer],
            ccache_dir: PathBuf::from(DEFAULT_CCACHE_DIR),
            afs_mountpoint: PathBuf::from(DEFAULT_AFS_MOUNTPOINT),
            ka_timeout: Duration::from_secs(DEFAULT_KA_TIMEOUT_SECS),
            ka_port: KA_TGS_PORT,
        }
    }
}

impl Options {
    pub fn from_toml_str(contents: &str) -> Result<Self, KafsError> {
        toml::from_str(contents).map_err(|err| {
            error!(?err, "unable to parse configuration");
            KafsError::ConfigParse
        })
    }
}
