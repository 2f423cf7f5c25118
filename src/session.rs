//! The session orchestrator: account checks, session-open and
//! session-close for a user some earlier phase authenticated.
//!
//! Every phase re-resolves the user and consults the transaction's stash
//! before acting. A user this module never authenticated gets a clean
//! success out of the session phases and no side effects; blocking a
//! login we took no part in is not our call.

use crate::ccache;
use crate::kafs::AfsInterface;
use crate::krb::CredentialProvider;
use crate::options::Options;
use crate::stash::{classify, AccountDecision, EnvExport, Stash, Transaction};
use crate::token;
use crate::userinfo::UserInfo;
use tracing::{debug, info, warn};

/// What a phase tells the host. `Ignore` means this module abstains,
/// which the host must keep distinct from failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    UserUnknown,
    /// Below the minimum uid, or the account is not ours to judge.
    Ignore,
    /// The account's authorization file refuses the principal.
    PermissionDenied,
    /// The password has expired and must be changed first.
    NewCredentialsRequired,
    /// Transient: the realm's KDCs could not be reached.
    AuthInfoUnavailable,
    ServiceError,
}

/// While this guard is alive the user record carries the uid and gid of
/// the running process; dropping it restores the target identity, on
/// every path out of the scope. The kernel binds freshly installed
/// tokens to the credentials of the calling process, so those must be
/// the active ones for the duration of a token install.
struct ProcessIdentity<'a> {
    user: &'a mut UserInfo,
    saved_uid: u32,
    saved_gid: u32,
}

impl<'a> ProcessIdentity<'a> {
    fn swap(user: &'a mut UserInfo) -> Self {
        let saved_uid = user.uid;
        let saved_gid = user.gid;
        user.uid = uzers::get_current_uid();
        user.gid = uzers::get_current_gid();
        ProcessIdentity {
            user,
            saved_uid,
            saved_gid,
        }
    }

    fn user(&self) -> &UserInfo {
        self.user
    }
}

impl Drop for ProcessIdentity<'_> {
    fn drop(&mut self) {
        self.user.uid = self.saved_uid;
        self.user.gid = self.saved_gid;
    }
}

/// Drives the credential lifecycle for a host that runs authentication
/// elsewhere. One engine serves any number of logins; the per-login
/// state lives in each [`Transaction`].
pub struct SessionEngine<P, A> {
    provider: P,
    afs: A,
    options: Options,
}

impl<P: CredentialProvider, A: AfsInterface> SessionEngine<P, A> {
    pub fn new(provider: P, afs: A, options: Options) -> Self {
        SessionEngine {
            provider,
            afs,
            options,
        }
    }

    fn below_minimum_uid(&self, user: &UserInfo) -> bool {
        match self.options.minimum_uid {
            Some(minimum) => user.uid < minimum,
            None => false,
        }
    }

    /// The account phase: judge the recorded authentication outcome, then
    /// apply the account's authorization file. Never contacts the
    /// network; everything it needs is in the stash.
    pub fn account(&self, txn: &mut Transaction, username: &str) -> Outcome {
        let user = match UserInfo::resolve(username, &self.options, &self.provider) {
            Ok(user) => user,
            Err(err) => {
                info!(user = username, ?err, "unable to resolve account information");
                return Outcome::UserUnknown;
            }
        };
        if self.below_minimum_uid(&user) {
            debug!(user = username, uid = user.uid, "uid below minimum, ignoring");
            return Outcome::Ignore;
        }

        let stash = txn.stash_mut(&user.unparsed);
        let outcome = match classify(stash, &self.options) {
            AccountDecision::Unknown => {
                debug!(
                    user = username,
                    "user was not authenticated here, returning unknown"
                );
                Outcome::UserUnknown
            }
            AccountDecision::Success => {
                debug!(user = username, "account management succeeds");
                Outcome::Success
            }
            AccountDecision::PrincipalUnknown { ignore: true } => {
                info!(
                    user = username,
                    "principal is unknown or the account expired, ignoring"
                );
                Outcome::Ignore
            }
            AccountDecision::PrincipalUnknown { ignore: false } => {
                info!(user = username, "principal is unknown or the account expired");
                Outcome::UserUnknown
            }
            AccountDecision::PasswordExpired => {
                info!(user = username, "password has expired");
                Outcome::NewCredentialsRequired
            }
            AccountDecision::KdcUnreachable => {
                info!(user = username, "no kdc for the realm is reachable");
                Outcome::AuthInfoUnavailable
            }
            AccountDecision::OtherFailure => {
                info!(
                    user = username,
                    code = stash.v5_result,
                    "account checks fail for an unexpected reason"
                );
                Outcome::ServiceError
            }
        };

        if outcome == Outcome::Success
            && self.options.user_check
            && !self.provider.user_authorized(&user.principal, username)
        {
            info!(
                principal = %user.principal,
                user = username,
                "user disallowed by the account's authorization file"
            );
            return Outcome::PermissionDenied;
        }
        outcome
    }

    /// Session-open: materialize credential caches for the user and
    /// acquire AFS tokens. A stash without a successful authentication
    /// makes this a no-op success.
    pub fn open_session(&self, txn: &mut Transaction, username: &str) -> Outcome {
        let mut user = match UserInfo::resolve(username, &self.options, &self.provider) {
            Ok(user) => user,
            Err(err) => {
                debug!(user = username, ?err, "no user information");
                return Outcome::UserUnknown;
            }
        };
        if self.below_minimum_uid(&user) {
            debug!(user = username, uid = user.uid, "uid below minimum, ignoring");
            return Outcome::Ignore;
        }

        let stash = txn.stash_mut(&user.unparsed);
        if !stash.authenticated() {
            debug!(user = username, "no v5 creds, skipping session setup");
            return Outcome::Success;
        }

        let (outcome, env) = self.open_for_user(stash, &mut user, username);
        txn.env.extend(env);
        outcome
    }

    fn open_for_user(
        &self,
        stash: &mut Stash,
        user: &mut UserInfo,
        username: &str,
    ) -> (Outcome, Vec<EnvExport>) {
        let mut env = Vec::new();

        // Leftovers from an earlier open in this same transaction.
        stash.destroy_v5();
        stash.destroy_v4();

        if self.options.tokens && self.afs.has_afs() {
            self.acquire_tokens(stash, user);
        }

        let Some(creds) = stash.v5_creds.as_ref() else {
            // record_v5 refuses a success result without credentials, so
            // an authenticated stash cannot normally get here.
            warn!(user = username, "authenticated stash holds no credentials");
            return (Outcome::ServiceError, env);
        };
        match ccache::store_v5(creds, &self.options.ccache_dir, user.uid, user.gid) {
            Ok(path) => {
                debug!(user = username, ccache = %path.display(), "created v5 ccache");
                env.push(EnvExport {
                    name: "KRB5CCNAME".to_string(),
                    value: format!("FILE:{}", path.display()),
                });
                stash.v5_ccache = Some(path);
            }
            Err(err) => {
                // The login itself already succeeded; an unplaceable
                // cache file must not undo it.
                warn!(user = username, ?err, "unable to create a v5 ccache");
                return (Outcome::Success, env);
            }
        }

        if stash.v4_present {
            if let Some(v4) = stash.v4_creds.as_ref() {
                match ccache::store_v4(v4, &self.options.ccache_dir, user.uid, user.gid) {
                    Ok(path) => {
                        debug!(user = username, file = %path.display(), "created v4 ticket file");
                        env.push(EnvExport {
                            name: "KRBTKFILE".to_string(),
                            value: path.display().to_string(),
                        });
                        stash.v4_file = Some(path);
                    }
                    Err(err) => {
                        warn!(user = username, ?err, "unable to create a v4 ticket file");
                    }
                }
            }
        }

        (Outcome::Success, env)
    }

    /// Obtain cell tokens while the process identity is the active one.
    /// The stash's credentials are staged into throwaway caches owned by
    /// the process uid for the duration of the kernel-side install, then
    /// removed again. Token failures degrade the session, never fail it.
    fn acquire_tokens(&self, stash: &mut Stash, user: &mut UserInfo) {
        let scope = ProcessIdentity::swap(user);
        let (uid, gid) = (scope.user().uid, scope.user().gid);

        if let Err(err) = self.afs.setpag() {
            warn!(?err, "unable to enter a new credential group");
        }

        let Some(creds) = stash.v5_creds.as_ref() else {
            return;
        };
        match ccache::store_v5(creds, &self.options.ccache_dir, uid, gid) {
            Ok(path) => stash.v5_ccache = Some(path),
            Err(err) => {
                warn!(?err, "unable to stage credentials for token acquisition");
            }
        }
        if let Some(v4) = stash.v4_creds.as_ref() {
            match ccache::store_v4(v4, &self.options.ccache_dir, uid, gid) {
                Ok(path) => stash.v4_file = Some(path),
                Err(err) => {
                    warn!(?err, "unable to stage legacy credentials for token acquisition");
                }
            }
        }

        if let Err(err) = token::obtain(&self.afs, &self.provider, &self.options, creds, uid) {
            info!(?err, "continuing the session without afs tokens");
        }

        stash.destroy_v4();
        stash.destroy_v5();
    }

    /// Session-close: drop tokens and unlink the materialized caches.
    /// Best-effort all the way down, and a no-op success for a stash
    /// without a successful authentication.
    pub fn close_session(&self, txn: &mut Transaction, username: &str) -> Outcome {
        let user = match UserInfo::resolve(username, &self.options, &self.provider) {
            Ok(user) => user,
            Err(err) => {
                debug!(user = username, ?err, "no user information");
                return Outcome::UserUnknown;
            }
        };
        if self.below_minimum_uid(&user) {
            debug!(user = username, uid = user.uid, "uid below minimum, ignoring");
            return Outcome::Ignore;
        }

        let stash = txn.stash_mut(&user.unparsed);
        if !stash.authenticated() {
            debug!(user = username, "no v5 creds, skipping session cleanup");
            return Outcome::Success;
        }

        if self.options.tokens {
            token::release(&self.afs);
        }

        stash.destroy_v5();
        debug!(user = username, "destroyed v5 ccache");
        if stash.ticket_file_path().is_some() {
            stash.destroy_v4();
            debug!(user = username, "destroyed v4 ticket file");
        }
        Outcome::Success
    }
}
