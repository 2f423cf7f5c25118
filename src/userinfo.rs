//! Resolved identity of the account a phase is operating on.

use crate::error::KafsError;
use crate::krb::{CredentialProvider, Principal};
use crate::options::Options;
use std::path::PathBuf;
use tracing::debug;
use uzers::os::unix::UserExt;

/// System identity plus the principal the account authenticates as. Built
/// once at phase entry; only the identity-swap guard in the session phase
/// ever touches uid/gid afterwards.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub principal: Principal,
    /// Unparsed principal name, the stash lookup key.
    pub unparsed: String,
}

impl UserInfo {
    /// Resolve `username` against the system user database, then build its
    /// principal from the mapping rules, the realm override, or the
    /// library's default realm, in that order.
    pub fn resolve(
        username: &str,
        options: &Options,
        provider: &dyn CredentialProvider,
    ) -> Result<Self, KafsError> {
        let entry = uzers::get_user_by_name(username).ok_or(KafsError::UnknownUser)?;

        let realm = match &options.realm {
            Some(realm) => realm.clone(),
            None => provider.default_realm()?,
        };

        let principal = match options.mappings.iter().find(|m| m.user == username) {
            Some(mapping) => {
                debug!(user = username, principal = %mapping.principal, "applying principal mapping");
                let mapped = Principal::parse(&mapping.principal)?;
                if mapped.realm.is_empty() {
                    mapped.with_realm(&realm)
                } else {
                    mapped
                }
            }
            None => Principal::new(&[username], &realm),
        };

        let unparsed = principal.to_string();
        Ok(UserInfo {
            uid: entry.uid(),
            gid: entry.primary_group_id(),
            home: entry.home_dir().to_path_buf(),
            principal,
            unparsed,
        })
    }
}
