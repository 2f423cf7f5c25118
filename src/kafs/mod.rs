mod sys;

use crate::constants::*;
use crate::error::KafsError;
use binrw::{binread, binwrite, BinWrite, NullString};
use std::ffi::CString;
use std::net::Ipv4Addr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

const VIOCSETTOK: libc::c_ulong = sys::vice_ioctl(3);
const VIOCUNLOG: libc::c_ulong = sys::vice_ioctl(9);
const VIOCWHEREIS: libc::c_ulong = sys::vice_ioctl(14);
const VIOC_FILE_CELL_NAME: libc::c_ulong = sys::vice_ioctl(30);
const VIOC_GET_WS_CELL: libc::c_ulong = sys::vice_ioctl(31);

/// A token as the cache manager stores it: an opaque ticket for the cell's
/// AFS service plus the clear part the kernel needs to run the rxkad
/// handshake on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfsToken {
    pub cell: String,
    /// The uid AFS will treat as the owner of this token within the PAG.
    pub vice_id: u32,
    pub session_key: [u8; DES_KEY_LEN],
    pub ticket: Vec<u8>,
    /// Key version. `RXKAD_TKT_TYPE_KERBEROS_V5` (256) marks `ticket` as
    /// a raw Kerberos 5 service ticket.
    pub kvno: u32,
    pub begin: u32,
    pub end: u32,
}

/*
 * VIOCSETTOK input image, in kernel byte order:
 *   ticket length, ticket, clear-token length (always 24), clear token
 *   { auth handle, session key, vice id, begin, end }, primary flag,
 *   NUL-terminated cell name.
 */
#[binwrite]
#[brw(little)]
#[binread]
struct SetTokenRequest {
    #[br(temp)]
    #[bw(try_calc(u32::try_from(ticket.len())))]
    ticket_len: u32,
    #[br(count = ticket_len)]
    ticket: Vec<u8>,
    #[br(temp)]
    #[bw(calc = 24u32)]
    clear_len: u32,
    auth_handle: i32,
    session_key: [u8; DES_KEY_LEN],
    vice_id: i32,
    begin: i32,
    end: i32,
    primary: u32,
    cell: NullString,
}

impl From<&AfsToken> for SetTokenRequest {
    fn from(token: &AfsToken) -> Self {
        SetTokenRequest {
            ticket: token.ticket.clone(),
            auth_handle: token.kvno as i32,
            session_key: token.session_key,
            vice_id: token.vice_id as i32,
            begin: token.begin as i32,
            end: token.end as i32,
            primary: 0,
            cell: NullString::from(token.cell.as_str()),
        }
    }
}

/// The kernel AFS boundary. Everything the orchestrator and the resolver
/// need from the cache manager goes through this trait, so hosts without
/// AFS degrade to clean no-ops and tests can count calls.
pub trait AfsInterface {
    /// Whether an AFS client is live on this host.
    fn has_afs(&self) -> bool;

    /// Put the calling process in a fresh process authentication group.
    fn setpag(&self) -> Result<(), KafsError>;

    /// Discard every token held by the current PAG.
    fn unlog(&self) -> Result<(), KafsError>;

    /// Install one token for (cell, vice id) in the current PAG, replacing
    /// any previous token for that cell.
    fn set_token(&self, token: &AfsToken) -> Result<(), KafsError>;

    /// Name of the cell serving `path`.
    fn file_cell_name(&self, path: &Path) -> Result<String, KafsError>;

    /// Addresses of the fileservers behind `path`.
    fn whereis(&self, path: &Path) -> Result<Vec<Ipv4Addr>, KafsError>;

    /// This workstation's default cell.
    fn ws_cell(&self) -> Result<String, KafsError>;
}

/// The real cache manager, reached through the OpenAFS procfs syscall node.
pub struct LinuxAfs {
    proc_path: PathBuf,
}

impl Default for LinuxAfs {
    fn default() -> Self {
        LinuxAfs {
            proc_path: PathBuf::from(sys::PROC_SYSCALL_PATH),
        }
    }
}

impl LinuxAfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point at an alternate syscall node. Used by tests to model a host
    /// without a running AFS client.
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        LinuxAfs {
            proc_path: proc_path.into(),
        }
    }

    fn path_arg(path: &Path) -> Result<CString, KafsError> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| KafsError::IoError(std::io::ErrorKind::InvalidInput.into()))
    }

    fn query_string(
        &self,
        path: Option<&CString>,
        request: libc::c_ulong,
    ) -> Result<String, KafsError> {
        let mut out = [0u8; MAX_CELL_CHARS + 1];
        let mut iob = sys::ViceIoctl {
            cm_in: std::ptr::null(),
            cm_out: out.as_mut_ptr() as *mut libc::c_char,
            in_size: 0,
            out_size: out.len() as u16,
        };
        sys::pioctl(&self.proc_path, path, request, &mut iob)?;

        let len = out.iter().position(|b| *b == 0).unwrap_or(out.len());
        String::from_utf8(out[..len].to_vec()).map_err(|err| {
            error!(?err, "cache manager returned a non-utf8 cell name");
            KafsError::CellNameInvalid
        })
    }
}

impl AfsInterface for LinuxAfs {
    fn has_afs(&self) -> bool {
        self.proc_path.exists()
    }

    fn setpag(&self) -> Result<(), KafsError> {
        match sys::setpag(&self.proc_path) {
            Err(KafsError::KernelCall(errno::Errno(libc::EINVAL))) => {
                Err(KafsError::PagUnsupported)
            }
            r => r,
        }
    }

    fn unlog(&self) -> Result<(), KafsError> {
        let mut iob = sys::ViceIoctl {
            cm_in: std::ptr::null(),
            cm_out: std::ptr::null_mut(),
            in_size: 0,
            out_size: 0,
        };
        sys::pioctl(&self.proc_path, None, VIOCUNLOG, &mut iob)
    }

    fn set_token(&self, token: &AfsToken) -> Result<(), KafsError> {
        if token.ticket.len() > MAX_KTC_TICKET_LEN {
            error!(
                cell = %token.cell,
                ticket_len = token.ticket.len(),
                "service ticket exceeds the kernel token slot"
            );
            return Err(KafsError::TicketTooLong);
        }
        if token.cell.len() > MAX_CELL_CHARS {
            return Err(KafsError::CellNameInvalid);
        }

        let request = SetTokenRequest::from(token);
        let mut image = std::io::Cursor::new(Vec::new());
        request.write(&mut image)?;
        let image = image.into_inner();

        let mut iob = sys::ViceIoctl {
            cm_in: image.as_ptr() as *const libc::c_char,
            cm_out: std::ptr::null_mut(),
            in_size: image.len() as u16,
            out_size: 0,
        };
        debug!(cell = %token.cell, vice_id = token.vice_id, "installing afs token");
        sys::pioctl(&self.proc_path, None, VIOCSETTOK, &mut iob)
    }

    fn file_cell_name(&self, path: &Path) -> Result<String, KafsError> {
        let cpath = Self::path_arg(path)?;
        match self.query_string(Some(&cpath), VIOC_FILE_CELL_NAME) {
            Err(KafsError::KernelCall(errno::Errno(e)))
                if e == libc::EINVAL || e == libc::ENOTTY =>
            {
                Err(KafsError::NotAfs)
            }
            Err(KafsError::KernelCall(errno::Errno(libc::ENOENT))) => Err(KafsError::NotFound),
            r => r,
        }
    }

    fn whereis(&self, path: &Path) -> Result<Vec<Ipv4Addr>, KafsError> {
        let cpath = Self::path_arg(path)?;
        let mut out = [0u8; 256];
        let mut iob = sys::ViceIoctl {
            cm_in: std::ptr::null(),
            cm_out: out.as_mut_ptr() as *mut libc::c_char,
            in_size: 0,
            out_size: out.len() as u16,
        };
        sys::pioctl(&self.proc_path, Some(&cpath), VIOCWHEREIS, &mut iob)?;
        Ok(parse_whereis(&out))
    }

    fn ws_cell(&self) -> Result<String, KafsError> {
        self.query_string(None, VIOC_GET_WS_CELL)
    }
}

/// A VIOCWHEREIS reply: network-order fileserver addresses, terminated by
/// a zero entry or the end of the buffer.
fn parse_whereis(buf: &[u8]) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for chunk in buf.chunks_exact(4) {
        let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
        if raw == [0u8; 4] {
            break;
        }
        addrs.push(Ipv4Addr::from(raw));
    }
    addrs
}
