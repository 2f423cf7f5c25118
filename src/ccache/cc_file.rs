use crate::ccache::{CcAddresses, CcAuthData, CcKeyBlock, CcPrincipal, CountedOctets};
use crate::error::KafsError;
use crate::krb::Credentials;
use binrw::helpers::until_eof;
use binrw::io::TakeSeekExt;
use binrw::BinWrite;
use binrw::{binread, binwrite};
use std::path::{Path, PathBuf};
use tracing::error;

#[binwrite]
#[bw(big)]
#[binread]
#[derive(Debug)]
struct HeaderField {
    tag: u16,
    #[bw(try_calc(u16::try_from(value.len())))]
    value_len: u16,
    #[br(count = value_len)]
    value: Vec<u8>,
}

#[binwrite]
#[bw(big)]
#[binread]
struct FileCacheHeader {
    #[bw(calc = fields.iter().map(|x| (x.value.len() + 4) as u16).sum::<u16>())]
    length: u16,
    #[br(map_stream = |s| s.take_seek(length as u64), parse_with = until_eof)]
    fields: Vec<HeaderField>,
}

#[binwrite]
#[bw(big)]
#[binread]
struct CacheRecord {
    client: CcPrincipal,
    server: CcPrincipal,
    keyblock: CcKeyBlock,
    authtime: u32,
    starttime: u32,
    endtime: u32,
    renew_till: u32,
    is_skey: u8,
    ticket_flags: u32,
    addresses: CcAddresses,
    authdata: CcAuthData,
    ticket: CountedOctets,
    second_ticket: CountedOctets,
}

impl TryFrom<&Credentials> for CacheRecord {
    type Error = KafsError;

    fn try_from(creds: &Credentials) -> Result<Self, Self::Error> {
        let enc_type = u16::try_from(creds.key.etype).map_err(|_| {
            error!(etype = creds.key.etype, "encryption type does not fit the cache record");
            KafsError::CredentialCache
        })?;
        Ok(CacheRecord {
            client: CcPrincipal::from(&creds.client),
            server: CcPrincipal::from(&creds.server),
            keyblock: CcKeyBlock {
                enc_type,
                data: CountedOctets::from(creds.key.value.as_slice()),
            },
            authtime: creds.auth_time,
            starttime: creds.start_time,
            endtime: creds.end_time,
            renew_till: creds.renew_till,
            is_skey: 0u8,
            ticket_flags: creds.flags,
            addresses: CcAddresses::default(),
            authdata: CcAuthData::default(),
            ticket: CountedOctets::from(creds.ticket.as_slice()),
            second_ticket: CountedOctets::default(),
        })
    }
}

#[binwrite]
#[bw(big, magic = 4u8)]
#[binread]
#[br(magic = 4u8)]
struct FileCacheV4 {
    header: FileCacheHeader,
    principal: CcPrincipal,
    #[br(parse_with = until_eof)]
    records: Vec<CacheRecord>,
}

#[binwrite]
#[bw(big, magic = 5u8)]
#[binread]
#[br(magic = 5u8)]
enum FileCache {
    V4(FileCacheV4),
}

impl FileCache {
    fn new(creds: &Credentials) -> Result<Self, KafsError> {
        /*
         * At this time there is only one defined header field. Its tag value
         * is 1, its length is always 8, and its contents are two 32-bit
         * integers giving the seconds and microseconds of the time offset of
         * the KDC relative to the client. We record no skew.
         */
        let header = FileCacheHeader {
            fields: vec![HeaderField {
                tag: 1u16,
                value: vec![0u8; 8],
            }],
        };

        Ok(FileCache::V4(FileCacheV4 {
            header,
            principal: CcPrincipal::from(&creds.client),
            records: vec![CacheRecord::try_from(creds)?],
        }))
    }
}

/// Write `creds` as a fresh FILE cache under `dir`, owned by uid/gid.
/// Returns the created path; on any failure the partial file is removed.
pub(crate) fn store_v5(
    creds: &Credentials,
    dir: &Path,
    uid: u32,
    gid: u32,
) -> Result<PathBuf, KafsError> {
    let cache = FileCache::new(creds)?;
    let (mut file, path) = super::create_unique(dir, "krb5cc_", uid)?;

    if let Err(binrw_err) = cache.write(&mut file) {
        error!(?binrw_err, path = %path.display(), "unable to write credential cache");
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
