use tracing::error;

#[derive(Debug)]
pub enum KafsError {
    // IMPORTANT: Keep these variants coarse - it's a potential security risk
    // to leak internal state through an error. If you want to debug the error,
    // then use the error! macro at the error raise site to report relevant
    // information.
    /// The queried path is not served by AFS.
    NotAfs,
    /// The queried path does not exist.
    NotFound,
    /// No AFS client is running on this host.
    AfsUnavailable,
    /// The kernel rejected a cache-manager call.
    KernelCall(errno::Errno),
    /// The cache manager does not support process authentication groups.
    PagUnsupported,
    CellNameInvalid,
    /// Cell-to-realm resolution failed at some step. Callers fall back to
    /// the default realm.
    ResolutionFailed,
    UnsupportedEnctype,
    InvalidHmacMd5Key,
    /// Key material whose length does not fit its enctype.
    InvalidEncryptionKey,
    /// Key derivation exhausted its candidate counter without producing a
    /// non-degenerate key.
    WeakKeyDerivation,
    /// The service ticket does not fit the kernel token slot.
    TicketTooLong,
    RxBadPacket,
    /// The peer aborted the call with this Rx error code.
    RxAbort(i32),
    /// The authentication server answered with a non-zero result.
    KaFailure(i32),
    AllMechanismsFailed,
    /// Error from the Kerberos library boundary, in com_err signed space.
    Kerberos(i32),
    CredentialsMissing,
    CredentialCache,
    UnknownUser,
    PrincipalFormat,
    ConfigParse,
    IoError(std::io::Error),
    BinRwError(binrw::Error),
}

impl From<std::io::Error> for KafsError {
    fn from(value: std::io::Error) -> Self {
        KafsError::IoError(value)
    }
}

impl From<binrw::Error> for KafsError {
    fn from(value: binrw::Error) -> Self {
        KafsError::BinRwError(value)
    }
}

impl From<errno::Errno> for KafsError {
    fn from(value: errno::Errno) -> Self {
        error!(errno = ?value, "kernel afs call failed");
        KafsError::KernelCall(value)
    }
}
