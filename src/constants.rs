pub(crate) const DES_KEY_LEN: usize = 8;
pub(crate) const DES3_KEY_LEN: usize = 24;
pub(crate) const DES3_SEED_LEN: usize = 21;

// Candidate counter for the token key derivation is a single octet, so the
// derivation gives up after 255 rejected candidates.
pub(crate) const DERIVE_MAX_ATTEMPTS: u8 = u8::MAX;

/// The published DES weak and semi-weak keys, parity bits included. A key
/// matches the table when it is equal after masking the low (parity) bit of
/// every byte.
pub(crate) const DES_WEAK_KEYS: [[u8; 8]; 16] = [
    // weak
    [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01],
    [0x1f, 0x1f, 0x1f, 0x1f, 0x0e, 0x0e, 0x0e, 0x0e],
    [0xe0, 0xe0, 0xe0, 0xe0, 0xf1, 0xf1, 0xf1, 0xf1],
    [0xfe, 0xfe, 0xfe, 0xfe, 0xfe, 0xfe, 0xfe, 0xfe],
    // semi-weak
    [0x01, 0xfe, 0x01, 0xfe, 0x01, 0xfe, 0x01, 0xfe],
    [0xfe, 0x01, 0xfe, 0x01, 0xfe, 0x01, 0xfe, 0x01],
    [0x1f, 0xe0, 0x1f, 0xe0, 0x0e, 0xf1, 0x0e, 0xf1],
    [0xe0, 0x1f, 0xe0, 0x1f, 0xf1, 0x0e, 0xf1, 0x0e],
    [0x01, 0xe0, 0x01, 0xe0, 0x01, 0xf1, 0x01, 0xf1],
    [0xe0, 0x01, 0xe0, 0x01, 0xf1, 0x01, 0xf1, 0x01],
    [0x1f, 0xfe, 0x1f, 0xfe, 0x0e, 0xfe, 0x0e, 0xfe],
    [0xfe, 0x1f, 0xfe, 0x1f, 0xfe, 0x0e, 0xfe, 0x0e],
    [0x01, 0x1f, 0x01, 0x1f, 0x01, 0x0e, 0x01, 0x0e],
    [0x1f, 0x01, 0x1f, 0x01, 0x0e, 0x01, 0x0e, 0x01],
    [0xe0, 0xfe, 0xe0, 0xfe, 0xf1, 0xfe, 0xf1, 0xfe],
    [0xfe, 0xe0, 0xfe, 0xe0, 0xfe, 0xf1, 0xfe, 0xf1],
];

// Rx wire protocol.
pub(crate) const RX_HEADER_LEN: usize = 28;
pub(crate) const RX_TYPE_DATA: u8 = 1;
pub(crate) const RX_TYPE_ABORT: u8 = 4;
pub(crate) const RX_FLAG_CLIENT_INITIATED: u8 = 1;
pub(crate) const RX_FLAG_LAST_PACKET: u8 = 4;
pub(crate) const RX_SECURITY_NONE: u8 = 0;
// A full Rx implementation would also bound reassembled calls; a single
// datagram is plenty for a ticket exchange.
pub(crate) const RX_MAX_PACKET: usize = 1444;

// Authentication server (kaserver) RPC.
pub(crate) const KA_TGS_PORT: u16 = 7004;
pub(crate) const KA_TGS_SERVICE: u16 = 732;
pub(crate) const KA_GET_TICKET_OPCODE: u32 = 23;
pub(crate) const KA_AUTH_DOMAIN_MAX: usize = 64;

// Kernel token interface.
pub(crate) const MAX_KTC_TICKET_LEN: usize = 344;
pub(crate) const MAX_CELL_CHARS: usize = 64;
/// Token kvno announcing that the attached ticket is a raw Kerberos 5
/// service ticket rather than a kaserver-issued one.
pub(crate) const RXKAD_TKT_TYPE_KERBEROS_V5: u32 = 256;

pub(crate) const DEFAULT_AFS_MOUNTPOINT: &str = "/afs";
pub(crate) const DEFAULT_CCACHE_DIR: &str = "/tmp";
pub(crate) const DEFAULT_KA_TIMEOUT_SECS: u64 = 4;
