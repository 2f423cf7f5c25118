//! On-disk credential caches: the MIT-format FILE cache for v5
//! credentials and the legacy ticket file some sites still read.
//!
//! Both are written under a fresh unique name owned by the session user,
//! mode 0600, and unlinked on teardown. The session phase materializes
//! each cache up to twice per login (a throwaway copy during token
//! acquisition, the final copy handed to the user), so creation and
//! destruction are cheap, self-contained operations here.

mod cc_file;
mod tkt_file;

pub(crate) use cc_file::store_v5;
pub(crate) use tkt_file::store_v4;

use crate::error::KafsError;
use crate::krb::Principal;
use binrw::{binread, binwrite};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

const NT_PRINCIPAL: u32 = 1;
const NT_SRV_INST: u32 = 2;

/// Counted octet string, the length-prefixed byte field the FILE format
/// builds everything out of.
#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct CountedOctets {
    #[bw(try_calc(u32::try_from(value.len())))]
    value_len: u32,
    #[br(count = value_len)]
    pub value: Vec<u8>,
}

impl From<&[u8]> for CountedOctets {
    fn from(value: &[u8]) -> Self {
        CountedOctets {
            value: value.to_vec(),
        }
    }
}

impl From<&str> for CountedOctets {
    fn from(value: &str) -> Self {
        CountedOctets {
            value: value.as_bytes().to_vec(),
        }
    }
}

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, PartialEq, Eq)]
pub(super) struct CcPrincipal {
    name_type: u32,
    #[bw(try_calc(u32::try_from(components.len())))]
    components_count: u32,
    realm: CountedOctets,
    #[br(count = components_count)]
    components: Vec<CountedOctets>,
}

impl From<&Principal> for CcPrincipal {
    fn from(principal: &Principal) -> Self {
        CcPrincipal {
            name_type: if principal.components.len() > 1 {
                NT_SRV_INST
            } else {
                NT_PRINCIPAL
            },
            realm: CountedOctets::from(principal.realm.as_str()),
            components: principal
                .components
                .iter()
                .map(|c| CountedOctets::from(c.as_str()))
                .collect(),
        }
    }
}

impl TryFrom<&CcPrincipal> for Principal {
    type Error = KafsError;

    fn try_from(principal: &CcPrincipal) -> Result<Self, Self::Error> {
        let realm = String::from_utf8(principal.realm.value.clone())
            .map_err(|_| KafsError::PrincipalFormat)?;
        let components = principal
            .components
            .iter()
            .map(|c| String::from_utf8(c.value.clone()).map_err(|_| KafsError::PrincipalFormat))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Principal { components, realm })
    }
}

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, PartialEq, Eq)]
pub(super) struct CcKeyBlock {
    pub enc_type: u16,
    pub data: CountedOctets,
}

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, PartialEq, Eq)]
pub(super) struct CcAddress {
    addr_type: u16,
    data: CountedOctets,
}

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct CcAddresses {
    #[bw(try_calc(u32::try_from(addresses.len())))]
    count: u32,
    #[br(count = count)]
    addresses: Vec<CcAddress>,
}

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, PartialEq, Eq)]
pub(super) struct CcAuthDataEntry {
    ad_type: u16,
    data: CountedOctets,
}

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct CcAuthData {
    #[bw(try_calc(u32::try_from(entries.len())))]
    count: u32,
    #[br(count = count)]
    entries: Vec<CcAuthDataEntry>,
}

/// Pick an unclaimed `<prefix><uid>_<suffix>` name under `dir` and create
/// it exclusively, mode 0600. The suffix retry bounds collisions without
/// ever reusing an existing file.
pub(super) fn create_unique(
    dir: &Path,
    prefix: &str,
    uid: u32,
) -> Result<(File, PathBuf), KafsError> {
    for _ in 0..32 {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        let candidate = dir.join(format!("{prefix}{uid}_{suffix}"));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&candidate)
        {
            Ok(file) => return Ok((file, candidate)),
            Err(io_err) if io_err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(io_err) => {
                error!(?io_err, path = %candidate.display(), "unable to create credential cache file");
                return Err(KafsError::IoError(io_err));
            }
        }
    }
    Err(KafsError::CredentialCache)
}

/// Hand the cache file to the session user. The file was created by this
/// process, which may be running as root on the user's behalf.
pub(super) fn give_to(path: &Path, uid: u32, gid: u32) -> Result<(), KafsError> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|io_err| {
        error!(?io_err, path = %path.display(), "unable to chown credential cache");
        KafsError::IoError(io_err)
    })
}

/// Unlink a materialized cache. Teardown is best-effort: a file already
/// gone is fine, anything else is logged and swallowed.
pub(crate) fn destroy(path: &Path) {
    if let Err(io_err) = std::fs::remove_file(path) {
        if io_err.kind() != std::io::ErrorKind::NotFound {
            warn!(?io_err, path = %path.display(), "unable to remove credential cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_record_round_trip() {
        let user = Principal::new(&["alice"], "EXAMPLE.ORG");
        let record = CcPrincipal::from(&user);
        assert_eq!(record.name_type, NT_PRINCIPAL);
        assert_eq!(Principal::try_from(&record).expect("convert back"), user);

        let service = Principal::new(&["afs", "example.org"], "EXAMPLE.ORG");
        let record = CcPrincipal::from(&service);
        assert_eq!(record.name_type, NT_SRV_INST);
        assert_eq!(Principal::try_from(&record).expect("convert back"), service);
    }

    #[test]
    fn test_create_unique_names_and_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let (_f1, p1) = create_unique(dir.path(), "krb5cc_", 1000).expect("first");
        let (_f2, p2) = create_unique(dir.path(), "krb5cc_", 1000).expect("second");
        assert_ne!(p1, p2);

        let name = p1.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("krb5cc_1000_"));
        assert_eq!(name.len(), "krb5cc_1000_".len() + 6);

        let mode = std::fs::metadata(&p1)
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_destroy_tolerates_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("krb5cc_1000_gone");
        destroy(&path);

        std::fs::write(&path, b"x").expect("write");
        destroy(&path);
        assert!(!path.exists());
    }
}
