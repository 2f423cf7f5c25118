//! Cell and realm discovery.
//!
//! Tokens are obtained per cell, and each cell maps to a Kerberos realm.
//! The cell list comes from configuration when given, otherwise from the
//! running client. The realm comes from reverse-resolving one of the
//! cell's fileservers, with the uppercased cell name as the last resort.

use crate::error::KafsError;
use crate::kafs::AfsInterface;
use crate::krb::CredentialProvider;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, warn};

/// Cells the session should hold tokens for, in order.
pub fn cells_to_serve(
    afs: &dyn AfsInterface,
    configured: &[String],
    mountpoint: &Path,
) -> Vec<String> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    match local_cell(afs, mountpoint) {
        Ok(cell) => vec![cell],
        Err(err) => {
            warn!(?err, "unable to determine a local cell");
            Vec::new()
        }
    }
}

/// Cell serving `path`, per the running client. `NotAfs` when the path is
/// outside AFS, `NotFound` when it does not exist.
pub fn cell_of_file(afs: &dyn AfsInterface, path: &Path) -> Result<String, KafsError> {
    let cell = afs.file_cell_name(path)?;
    debug!(path = %path.display(), %cell, "file is served from cell");
    Ok(cell)
}

/// The workstation's own cell. This is ThisCell when the client knows it,
/// and the cell serving the AFS root otherwise.
pub fn local_cell(afs: &dyn AfsInterface, mountpoint: &Path) -> Result<String, KafsError> {
    match afs.ws_cell() {
        Ok(cell) if !cell.is_empty() => Ok(cell),
        Ok(_) => cell_of_file(afs, mountpoint),
        Err(err) => {
            debug!(?err, "workstation cell query failed, trying the mountpoint");
            cell_of_file(afs, mountpoint)
        }
    }
}

/// Realm serving `cell`. Never fails: a cell with no resolvable servers
/// gets its own name uppercased, which is correct for the common case of
/// a cell named after its realm.
pub fn realm_of_cell(
    afs: &dyn AfsInterface,
    provider: &dyn CredentialProvider,
    mountpoint: &Path,
    cell: &str,
) -> String {
    match realm_from_servers(afs, provider, mountpoint, cell) {
        Ok(realm) => realm,
        Err(err) => {
            debug!(%cell, ?err, "using the uppercased cell name as realm");
            cell.to_uppercase()
        }
    }
}

fn realm_from_servers(
    afs: &dyn AfsInterface,
    provider: &dyn CredentialProvider,
    mountpoint: &Path,
    cell: &str,
) -> Result<String, KafsError> {
    let path = mountpoint.join(cell);
    let servers = afs.whereis(&path)?;
    for addr in servers {
        let hostname = match reverse_hostname(addr) {
            Ok(hostname) => hostname,
            Err(err) => {
                debug!(%addr, ?err, "fileserver does not reverse-resolve");
                continue;
            }
        };
        match provider.host_realm(&hostname) {
            Ok(realm) if !realm.is_empty() => return Ok(realm),
            Ok(_) => continue,
            Err(err) => {
                debug!(%hostname, ?err, "no realm mapping for fileserver");
                continue;
            }
        }
    }
    Err(KafsError::ResolutionFailed)
}

fn reverse_hostname(addr: Ipv4Addr) -> Result<String, KafsError> {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: 0,
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.octets()),
        },
        sin_zero: [0; 8],
    };
    let mut host = [0 as libc::c_char; libc::NI_MAXHOST as usize];
    // SAFETY: sin is fully initialised and host carries its real length.
    // NI_NAMEREQD makes a missing PTR record an error instead of returning
    // the address back as a string.
    let rc = unsafe {
        libc::getnameinfo(
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return Err(KafsError::ResolutionFailed);
    }
    // SAFETY: getnameinfo returned success, so host holds a NUL-terminated
    // string within the buffer.
    let hostname = unsafe { std::ffi::CStr::from_ptr(host.as_ptr()) };
    hostname
        .to_str()
        .map(str::to_owned)
        .map_err(|_| KafsError::ResolutionFailed)
}
