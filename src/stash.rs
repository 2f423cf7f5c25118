//! The credential stash: what authentication produced, remembered across
//! the account and session phases of one login transaction.
//!
//! The host calls each phase separately, possibly skipping some, so the
//! stash is the only carrier of state between them. Stashes are looked up
//! through a [`Transaction`], never through globals.

use crate::error::KafsError;
use crate::krb::{codes, now_epoch, Credentials, LegacyCredentials};
use crate::options::Options;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-user record of one authentication attempt and the credential
/// artifacts later phases materialized from it.
#[derive(Debug, Default)]
pub struct Stash {
    pub(crate) v5_attempted: bool,
    pub(crate) v5_result: i32,
    pub(crate) v5_creds: Option<Credentials>,
    pub(crate) v5_ccache: Option<PathBuf>,
    pub(crate) v4_present: bool,
    pub(crate) v4_creds: Option<LegacyCredentials>,
    pub(crate) v4_file: Option<PathBuf>,
}

impl Stash {
    /// Record the outcome of a Kerberos 5 authentication attempt. A zero
    /// result must come with live credentials; anything else would let the
    /// session phase materialize a cache from nothing.
    pub fn record_v5(&mut self, result: i32, creds: Option<Credentials>) -> Result<(), KafsError> {
        if result == 0 {
            let live = creds
                .as_ref()
                .map(|c| c.initialized() && !c.expired_at(now_epoch()))
                .unwrap_or(false);
            if !live {
                return Err(KafsError::CredentialsMissing);
            }
        }
        self.v5_attempted = true;
        self.v5_result = result;
        self.v5_creds = creds;
        Ok(())
    }

    /// Record a legacy credential obtained alongside the v5 one.
    pub fn record_v4(&mut self, creds: LegacyCredentials) {
        self.v4_present = true;
        self.v4_creds = Some(creds);
    }

    /// Whether this transaction holds a successful v5 authentication.
    pub fn authenticated(&self) -> bool {
        self.v5_attempted && self.v5_result == 0
    }

    pub fn ccache_path(&self) -> Option<&Path> {
        self.v5_ccache.as_deref()
    }

    pub fn ticket_file_path(&self) -> Option<&Path> {
        self.v4_file.as_deref()
    }

    /// Unlink the materialized v5 cache, if any. Safe when nothing was
    /// materialized; never raises.
    pub fn destroy_v5(&mut self) {
        if let Some(path) = self.v5_ccache.take() {
            crate::ccache::destroy(&path);
        }
    }

    /// Unlink the materialized legacy ticket file, if any.
    pub fn destroy_v4(&mut self) {
        if let Some(path) = self.v4_file.take() {
            crate::ccache::destroy(&path);
        }
    }
}

/// `NAME=VALUE` pair for the caller to place in the session environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvExport {
    pub name: String,
    pub value: String,
}

impl EnvExport {
    pub fn format(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Caller context for one login transaction: the per-user stashes plus
/// the environment exports session-open produced. Dropped with the
/// transaction, taking all recorded state with it.
#[derive(Debug, Default)]
pub struct Transaction {
    stashes: BTreeMap<String, Stash>,
    pub(crate) env: Vec<EnvExport>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash for `principal`, created empty on first sight. `principal` is
    /// the unparsed name, so renamed mappings of the same account stay
    /// separate.
    pub fn stash_mut(&mut self, principal: &str) -> &mut Stash {
        self.stashes.entry(principal.to_string()).or_default()
    }

    pub fn stash(&self, principal: &str) -> Option<&Stash> {
        self.stashes.get(principal)
    }

    /// Exports accumulated by session-open, in insertion order.
    pub fn environment(&self) -> &[EnvExport] {
        &self.env
    }
}

/// What the account phase should make of a recorded authentication
/// outcome. Pure over the stash and options; never touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDecision {
    /// No attempt was recorded in this transaction.
    Unknown,
    Success,
    PasswordExpired,
    /// The KDC does not know the principal, or the account has expired.
    /// Both share the one leniency flag.
    PrincipalUnknown { ignore: bool },
    /// Transient: the realm could not be reached, not a denial.
    KdcUnreachable,
    OtherFailure,
}

pub fn classify(stash: &Stash, options: &Options) -> AccountDecision {
    if !stash.v5_attempted {
        return AccountDecision::Unknown;
    }
    let decision = match stash.v5_result {
        0 => AccountDecision::Success,
        codes::KRB5KDC_ERR_C_PRINCIPAL_UNKNOWN | codes::KRB5KDC_ERR_NAME_EXP => {
            AccountDecision::PrincipalUnknown {
                ignore: options.ignore_unknown_principals,
            }
        }
        codes::KRB5KDC_ERR_KEY_EXP => AccountDecision::PasswordExpired,
        codes::EAGAIN | codes::KRB5_REALM_CANT_RESOLVE | codes::KRB5_KDC_UNREACH => {
            AccountDecision::KdcUnreachable
        }
        _ => AccountDecision::OtherFailure,
    };
    debug!(result = stash.v5_result, ?decision, "classified stored authentication result");
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::krb::{EncryptionKey, Principal};

    fn live_creds() -> Credentials {
        let now = now_epoch();
        Credentials {
            client: Principal::new(&["alice"], "EXAMPLE.ORG"),
            server: Principal::new(&["krbtgt", "EXAMPLE.ORG"], "EXAMPLE.ORG"),
            key: EncryptionKey {
                etype: 18,
                value: vec![7u8; 32],
            },
            auth_time: now,
            start_time: now,
            end_time: now + 36_000,
            renew_till: 0,
            flags: 0,
            ticket: vec![0x30; 64],
        }
    }

    fn attempted(result: i32) -> Stash {
        Stash {
            v5_attempted: true,
            v5_result: result,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_never_attempted() {
        let options = Options::default();
        for result in [0, codes::KRB5KDC_ERR_KEY_EXP, codes::KRB5_KDC_UNREACH, -1] {
            let stash = Stash {
                v5_result: result,
                ..Default::default()
            };
            assert_eq!(classify(&stash, &options), AccountDecision::Unknown);
        }
    }

    #[test]
    fn test_classify_success() {
        assert_eq!(
            classify(&attempted(0), &Options::default()),
            AccountDecision::Success
        );
    }

    #[test]
    fn test_classify_unknown_principal_shares_leniency_flag() {
        let strict = Options::default();
        let lenient = Options {
            ignore_unknown_principals: true,
            ..Default::default()
        };
        for code in [
            codes::KRB5KDC_ERR_C_PRINCIPAL_UNKNOWN,
            codes::KRB5KDC_ERR_NAME_EXP,
        ] {
            assert_eq!(
                classify(&attempted(code), &strict),
                AccountDecision::PrincipalUnknown { ignore: false }
            );
            assert_eq!(
                classify(&attempted(code), &lenient),
                AccountDecision::PrincipalUnknown { ignore: true }
            );
        }
    }

    #[test]
    fn test_classify_expired_password() {
        assert_eq!(
            classify(&attempted(codes::KRB5KDC_ERR_KEY_EXP), &Options::default()),
            AccountDecision::PasswordExpired
        );
    }

    #[test]
    fn test_classify_unreachable_is_distinct() {
        for code in [
            codes::EAGAIN,
            codes::KRB5_REALM_CANT_RESOLVE,
            codes::KRB5_KDC_UNREACH,
        ] {
            assert_eq!(
                classify(&attempted(code), &Options::default()),
                AccountDecision::KdcUnreachable
            );
        }
    }

    #[test]
    fn test_classify_other_failure() {
        // Preauth failure is a denial, not one of the named cases.
        assert_eq!(
            classify(&attempted(-1765328360), &Options::default()),
            AccountDecision::OtherFailure
        );
    }

    #[test]
    fn test_record_v5_success_requires_live_creds() {
        let mut stash = Stash::default();
        assert!(stash.record_v5(0, None).is_err());
        assert!(!stash.v5_attempted);

        let mut expired = live_creds();
        expired.end_time = 1;
        assert!(stash.record_v5(0, Some(expired)).is_err());

        stash
            .record_v5(0, Some(live_creds()))
            .expect("live credentials accepted");
        assert!(stash.authenticated());
    }

    #[test]
    fn test_record_v5_failure_needs_no_creds() {
        let mut stash = Stash::default();
        stash
            .record_v5(codes::KRB5_KDC_UNREACH, None)
            .expect("failures carry no credentials");
        assert!(stash.v5_attempted);
        assert!(!stash.authenticated());
    }

    #[test]
    fn test_destroy_without_materialization_is_noop() {
        let mut stash = Stash::default();
        stash.destroy_v5();
        stash.destroy_v5();
        stash.destroy_v4();
        assert!(stash.ccache_path().is_none());
    }

    #[test]
    fn test_destroy_unlinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("krb5cc_1000_abcdef");
        std::fs::write(&path, b"cache").expect("write");

        let mut stash = Stash {
            v5_ccache: Some(path.clone()),
            ..Default::default()
        };
        stash.destroy_v5();
        assert!(!path.exists());
        assert!(stash.ccache_path().is_none());
    }

    #[test]
    fn test_transaction_stash_reuse() {
        let mut txn = Transaction::new();
        txn.stash_mut("alice@EXAMPLE.ORG").v5_attempted = true;
        assert!(txn.stash("alice@EXAMPLE.ORG").is_some());
        assert!(txn.stash_mut("alice@EXAMPLE.ORG").v5_attempted);
        assert!(txn.stash("bob@EXAMPLE.ORG").is_none());
    }

    #[test]
    fn test_env_export_format() {
        let export = EnvExport {
            name: "KRB5CCNAME".to_string(),
            value: "FILE:/tmp/krb5cc_1000_abcdef".to_string(),
        };
        assert_eq!(export.format(), "KRB5CCNAME=FILE:/tmp/krb5cc_1000_abcdef");
    }
}
