//! AFS token acquisition.
//!
//! A token is obtained per cell by walking an ordered list of mechanisms:
//! first handing the kernel the Kerberos service ticket itself, then the
//! older exchange against the cell's authentication servers. Mechanism
//! failures are independent; the session only learns of a cell where
//! every mechanism failed, and even that is not fatal to login.

mod ka;
mod rx;

pub use crate::kafs::AfsToken;

use crate::cell;
use crate::constants::*;
use crate::crypto;
use crate::error::KafsError;
use crate::kafs::AfsInterface;
use crate::krb::{CredentialProvider, Credentials, Principal};
use crate::options::{Options, TokenMechanismKind};
use crate::token::rx::{GetTicketRequest, XdrOpaque, XdrString};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Everything a mechanism needs to produce a token for one cell.
pub struct TokenContext<'a> {
    pub cell: String,
    pub realm: String,
    /// Uid the token is installed for within the PAG.
    pub uid: u32,
    pub creds: &'a Credentials,
    pub provider: &'a dyn CredentialProvider,
    pub afs: &'a dyn AfsInterface,
    pub options: &'a Options,
}

/// One way of turning Kerberos credentials into a cell token. Mechanisms
/// are tried in the configured preference order and must not install
/// anything themselves.
pub trait TokenMechanism {
    fn name(&self) -> &'static str;
    fn attempt(&self, ctx: &TokenContext<'_>) -> Result<AfsToken, KafsError>;
}

/// Service ticket for the cell's AFS principal: `afs/<cell>@REALM` with a
/// fallback to the older single-component `afs@REALM`.
fn afs_service_ticket(ctx: &TokenContext<'_>) -> Result<Credentials, KafsError> {
    let two_part = Principal::new(&["afs", ctx.cell.as_str()], &ctx.realm);
    match ctx.provider.service_ticket(ctx.creds, &two_part) {
        Ok(service) => Ok(service),
        Err(err) => {
            debug!(principal = %two_part, ?err, "per-cell afs principal unavailable");
            let one_part = Principal::new(&["afs"], &ctx.realm);
            ctx.provider.service_ticket(ctx.creds, &one_part)
        }
    }
}

/// Hand the kernel the Kerberos 5 service ticket directly. Modern
/// fileservers decrypt these natively; the kvno field of the token marks
/// the format.
pub struct NativeV5;

impl TokenMechanism for NativeV5 {
    fn name(&self) -> &'static str {
        "v5-ticket"
    }

    fn attempt(&self, ctx: &TokenContext<'_>) -> Result<AfsToken, KafsError> {
        let service = afs_service_ticket(ctx)?;
        if service.ticket.len() > MAX_KTC_TICKET_LEN {
            return Err(KafsError::TicketTooLong);
        }
        let session_key = crypto::derive_des_key(&service.key)?;
        Ok(AfsToken {
            cell: ctx.cell.clone(),
            vice_id: ctx.uid,
            session_key,
            ticket: service.ticket,
            kvno: RXKAD_TKT_TYPE_KERBEROS_V5,
            begin: service.start_time,
            end: service.end_time,
        })
    }
}

/// Swap the Kerberos service ticket for a token issued by the cell's
/// authentication servers. Needed for cells whose fileservers predate
/// native v5 tickets.
pub struct AuthServer;

impl TokenMechanism for AuthServer {
    fn name(&self) -> &'static str {
        "kaserver"
    }

    fn attempt(&self, ctx: &TokenContext<'_>) -> Result<AfsToken, KafsError> {
        let service = afs_service_ticket(ctx)?;
        // The reply is protected by the service ticket's session key, so
        // the token key must be recovered (and weak-checked) before the
        // exchange is of any use.
        let session_key = crypto::derive_des_key(&service.key)?;

        let request = GetTicketRequest {
            kvno: 0,
            auth_domain: XdrString(ctx.realm.clone()),
            ticket: XdrOpaque(service.ticket.clone()),
            name: XdrString::from("afs"),
            instance: XdrString(ctx.cell.clone()),
            start: service.start_time,
            end: service.end_time,
        };

        let servers = auth_servers(ctx)?;
        let client = ka::KaClient::new(ctx.options.ka_timeout);
        let reply = client.get_ticket(&servers, &request)?;
        if reply.ticket.0.len() > MAX_KTC_TICKET_LEN {
            return Err(KafsError::TicketTooLong);
        }

        Ok(AfsToken {
            cell: ctx.cell.clone(),
            vice_id: ctx.uid,
            session_key,
            ticket: reply.ticket.0,
            kvno: reply.kvno,
            begin: reply.start,
            end: reply.end,
        })
    }
}

/// Authentication servers for the cell: the addresses the cache manager
/// holds for the cell root, then a DNS lookup of the cell name itself.
fn auth_servers(ctx: &TokenContext<'_>) -> Result<Vec<SocketAddr>, KafsError> {
    let root = ctx.options.afs_mountpoint.join(&ctx.cell);
    let port = ctx.options.ka_port;

    let mut servers: Vec<SocketAddr> = match ctx.afs.whereis(&root) {
        Ok(addrs) => addrs
            .into_iter()
            .map(|addr| SocketAddr::from((addr, port)))
            .collect(),
        Err(err) => {
            debug!(cell = %ctx.cell, ?err, "cache manager has no servers for the cell");
            Vec::new()
        }
    };
    if servers.is_empty() {
        servers = (ctx.cell.as_str(), port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
            .unwrap_or_default();
    }
    if servers.is_empty() {
        Err(KafsError::ResolutionFailed)
    } else {
        Ok(servers)
    }
}

fn mechanisms(kinds: &[TokenMechanismKind]) -> Vec<Box<dyn TokenMechanism>> {
    kinds
        .iter()
        .map(|kind| match kind {
            TokenMechanismKind::NativeV5 => Box::new(NativeV5) as Box<dyn TokenMechanism>,
            TokenMechanismKind::AuthServer => Box::new(AuthServer) as Box<dyn TokenMechanism>,
        })
        .collect()
}

fn obtain_for_cell(
    ctx: &TokenContext<'_>,
    list: &[Box<dyn TokenMechanism>],
) -> Result<(), KafsError> {
    for mechanism in list {
        match mechanism.attempt(ctx) {
            Ok(token) => match ctx.afs.set_token(&token) {
                Ok(()) => {
                    info!(cell = %ctx.cell, mechanism = mechanism.name(), "afs token installed");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        cell = %ctx.cell,
                        mechanism = mechanism.name(),
                        ?err,
                        "token install rejected by the kernel"
                    );
                }
            },
            Err(err) => {
                debug!(
                    cell = %ctx.cell,
                    mechanism = mechanism.name(),
                    ?err,
                    "token mechanism failed"
                );
            }
        }
    }
    Err(KafsError::AllMechanismsFailed)
}

/// Obtain and install one token per target cell. Returns an error only
/// when some cell got no token at all; callers treat that as a degraded
/// session, not a failed one.
pub fn obtain(
    afs: &dyn AfsInterface,
    provider: &dyn CredentialProvider,
    options: &Options,
    creds: &Credentials,
    uid: u32,
) -> Result<(), KafsError> {
    let cells = cell::cells_to_serve(afs, &options.afs_cells, &options.afs_mountpoint);
    if cells.is_empty() {
        return Err(KafsError::ResolutionFailed);
    }

    let list = mechanisms(&options.token_strategy);
    let mut any_failed = false;
    for cell_name in cells {
        let realm = cell::realm_of_cell(afs, provider, &options.afs_mountpoint, &cell_name);
        let ctx = TokenContext {
            cell: cell_name,
            realm,
            uid,
            creds,
            provider,
            afs,
            options,
        };
        if let Err(err) = obtain_for_cell(&ctx, &list) {
            warn!(cell = %ctx.cell, ?err, "no mechanism produced a token");
            any_failed = true;
        }
    }
    if any_failed {
        Err(KafsError::AllMechanismsFailed)
    } else {
        Ok(())
    }
}

/// Discard the PAG's tokens. Best-effort: close must never fail over this.
pub fn release(afs: &dyn AfsInterface) {
    if !afs.has_afs() {
        return;
    }
    if let Err(err) = afs.unlog() {
        debug!(?err, "token release failed");
    }
}
