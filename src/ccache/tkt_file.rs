use crate::error::KafsError;
use crate::krb::LegacyCredentials;
use binrw::helpers::until_eof;
use binrw::BinWrite;
use binrw::{binread, binwrite, NullString};
use std::path::{Path, PathBuf};
use tracing::error;

/*
 * The pre-v5 ticket file: the owner's name and instance as NUL-terminated
 * strings, then one record per ticket. Integers are 32-bit and the format
 * was only ever written host-order on little-endian machines, so that is
 * what readers expect.
 */
#[binwrite]
#[brw(little)]
#[binread]
struct TicketFile {
    name: NullString,
    instance: NullString,
    #[br(parse_with = until_eof)]
    records: Vec<TicketRecord>,
}

#[binwrite]
#[brw(little)]
#[binread]
struct TicketRecord {
    sname: NullString,
    sinstance: NullString,
    srealm: NullString,
    session_key: [u8; 8],
    lifetime: u32,
    kvno: u32,
    #[bw(try_calc(u32::try_from(ticket.len())))]
    ticket_len: u32,
    #[br(count = ticket_len)]
    ticket: Vec<u8>,
    issue_time: u32,
}

impl From<&LegacyCredentials> for TicketFile {
    fn from(creds: &LegacyCredentials) -> Self {
        TicketFile {
            name: NullString::from(creds.name.as_str()),
            instance: NullString::from(creds.instance.as_str()),
            records: vec![TicketRecord {
                sname: NullString::from("krbtgt"),
                sinstance: NullString::from(creds.realm.as_str()),
                srealm: NullString::from(creds.realm.as_str()),
                session_key: creds.session_key,
                lifetime: creds.lifetime as u32,
                kvno: creds.kvno as u32,
                ticket: creds.ticket.clone(),
                issue_time: creds.issue_time,
            }],
        }
    }
}

/// Write `creds` as a fresh legacy ticket file under `dir`, owned by
/// uid/gid. Returns the created path; partial files are removed.
pub(crate) fn store_v4(
    creds: &LegacyCredentials,
    dir: &Path,
    uid: u32,
    gid: u32,
) -> Result<PathBuf, KafsError> {
    let image = TicketFile::from(creds);
    let (mut file, path) = super::create_unique(dir, "tkt", uid)?;

    if let Err(binrw_err) = image.write(&mut file) {
        error!(?binrw_err, path = %path.display(), "unable to write ticket file");
        drop(file);
        super::destroy(&path);
        return Err(binrw_err.into());
    }
    drop(file);

    if let Err(err) = super::give_to(&path, uid, gid) {
        super::destroy(&path);
        return Err(err);
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::BinReaderExt;

    fn sample_creds() -> LegacyCredentials {
        LegacyCredentials {
            name: "alice".to_string(),
            instance: String::new(),
            realm: "EXAMPLE.ORG".to_string(),
            session_key: [0xd5; 8],
            kvno: 3,
            ticket: vec![0x4b; 110],
            issue_time: 1_700_000_000,
            lifetime: 120,
        }
    }

    #[test]
    fn test_store_and_parse_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uid = uzers::get_current_uid();
        let gid = uzers::get_current_gid();

        let creds = sample_creds();
        let path = store_v4(&creds, dir.path(), uid, gid).expect("store");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with(&format!("tkt{uid}_")));

        let bytes = std::fs::read(&path).expect("read back");
        let mut reader = binrw::io::Cursor::new(&bytes);
        let image: TicketFile = reader.read_le().expect("parse ticket file");

        assert_eq!(image.name.to_string(), "alice");
        assert_eq!(image.instance.to_string(), "");
        assert_eq!(image.records.len(), 1);
        let record = &image.records[0];
        assert_eq!(record.sname.to_string(), "krbtgt");
        assert_eq!(record.sinstance.to_string(), "EXAMPLE.ORG");
        assert_eq!(record.srealm.to_string(), "EXAMPLE.ORG");
        assert_eq!(record.session_key, creds.session_key);
        assert_eq!(record.lifetime, 120);
        assert_eq!(record.kvno, 3);
        assert_eq!(record.ticket, creds.ticket);
        assert_eq!(record.issue_time, creds.issue_time);
    }
}
