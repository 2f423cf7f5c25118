/*
 * Raw glue for the Linux OpenAFS ioctl interface.
 *
 * The cache manager multiplexes its private syscalls through an ioctl on a
 * procfs node. The argument block carries the AFS syscall number plus up to
 * four parameters; pioctl is syscall 20 and setpag is syscall 21. The
 * pioctl parameters are (path, request, ViceIoctl in/out block, follow).
 */

use crate::error::KafsError;
use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::Path;

pub(super) const PROC_SYSCALL_PATH: &str = "/proc/fs/openafs/afs_ioctl";

const AFSCALL_PIOCTL: libc::c_long = 20;
const AFSCALL_SETPAG: libc::c_long = 21;

// Linux ioctl request encoding: dir 2 bits, size 14 bits, type 8, nr 8.
const fn ioc_w(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    const IOC_WRITE: libc::c_ulong = 1;
    (IOC_WRITE << 30)
        | ((size as libc::c_ulong) << 16)
        | ((ty as libc::c_ulong) << 8)
        | (nr as libc::c_ulong)
}

// _IOW('C', 1, void *)
const VIOC_SYSCALL: libc::c_ulong = ioc_w(b'C', 1, std::mem::size_of::<*const libc::c_void>());

/// Cache-manager request word, _IOW('V', id, struct ViceIoctl).
pub(super) const fn vice_ioctl(id: u8) -> libc::c_ulong {
    ioc_w(b'V', id, std::mem::size_of::<ViceIoctl>())
}

#[repr(C)]
pub(super) struct ViceIoctl {
    pub cm_in: *const libc::c_char,
    pub cm_out: *mut libc::c_char,
    pub in_size: u16,
    pub out_size: u16,
}

// Field order is reversed on purpose, matching the kernel's definition.
#[repr(C)]
struct AfsProcData {
    param4: libc::c_long,
    param3: libc::c_long,
    param2: libc::c_long,
    param1: libc::c_long,
    syscall: libc::c_long,
}

fn afs_syscall(proc_path: &Path, data: &AfsProcData) -> Result<libc::c_int, KafsError> {
    let node = OpenOptions::new()
        .read(true)
        .write(true)
        .open(proc_path)
        .map_err(|_| KafsError::AfsUnavailable)?;

    // SAFETY: the argument block outlives the call and matches the layout
    // the kernel module expects for VIOC_SYSCALL.
    let rc = unsafe {
        libc::ioctl(
            node.as_raw_fd(),
            VIOC_SYSCALL,
            data as *const AfsProcData,
        )
    };
    if rc < 0 {
        Err(KafsError::from(errno::errno()))
    } else {
        Ok(rc)
    }
}

/// Issue a pioctl. `path` is the file the request refers to, or None for
/// requests that act on the whole cache manager (tokens, PAG state). The
/// in/out buffers travel through `iob`; the kernel writes the reply into
/// the out buffer in place.
pub(super) fn pioctl(
    proc_path: &Path,
    path: Option<&CString>,
    request: libc::c_ulong,
    iob: &mut ViceIoctl,
) -> Result<(), KafsError> {
    let data = AfsProcData {
        param4: 1, // follow symlinks
        param3: iob as *mut ViceIoctl as libc::c_long,
        param2: request as libc::c_long,
        param1: path.map(|p| p.as_ptr() as libc::c_long).unwrap_or(0),
        syscall: AFSCALL_PIOCTL,
    };
    afs_syscall(proc_path, &data).map(|_| ())
}

pub(super) fn setpag(proc_path: &Path) -> Result<(), KafsError> {
    let data = AfsProcData {
        param4: 0,
        param3: 0,
        param2: 0,
        param1: 0,
        syscall: AFSCALL_SETPAG,
    };
    afs_syscall(proc_path, &data).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_request_words() {
        // 24-byte ViceIoctl on LP64: 0x40185600 | id
        assert_eq!(vice_ioctl(3), 0x4018_5603);
        assert_eq!(vice_ioctl(9), 0x4018_5609);
        // 8-byte pointer payload for the syscall multiplexer.
        assert_eq!(VIOC_SYSCALL, 0x4008_4301);
    }

    #[test]
    fn test_missing_proc_node() {
        let r = setpag(Path::new("/nonexistent/afs_ioctl"));
        assert!(matches!(r, Err(KafsError::AfsUnavailable)));
    }
}
