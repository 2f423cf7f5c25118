use crate::error::KafsError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kerberos library result codes in com_err signed space, plus the errno
/// values the library surfaces for transient network failures. Only the
/// codes the account classifier distinguishes are named here.
pub mod codes {
    const KRB5KDC_BASE: i32 = -1765328384;

    pub const KRB5KDC_ERR_NAME_EXP: i32 = KRB5KDC_BASE + 1;
    pub const KRB5KDC_ERR_C_PRINCIPAL_UNKNOWN: i32 = KRB5KDC_BASE + 6;
    pub const KRB5KDC_ERR_KEY_EXP: i32 = KRB5KDC_BASE + 23;
    pub const KRB5_KDC_UNREACH: i32 = KRB5KDC_BASE + 156;
    pub const KRB5_REALM_CANT_RESOLVE: i32 = KRB5KDC_BASE + 220;

    pub const EAGAIN: i32 = libc::EAGAIN;
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum EncryptionType {
    DES_CBC_CRC = 1,
    DES_CBC_MD4 = 2,
    DES_CBC_MD5 = 3,
    DES3_CBC_MD5 = 5,
    DES3_CBC_SHA1 = 7,
    DES3_CBC_SHA1_KD = 16,
    AES128_CTS_HMAC_SHA1_96 = 17,
    AES256_CTS_HMAC_SHA1_96 = 18,
    AES128_CTS_HMAC_SHA256_128 = 19,
    AES256_CTS_HMAC_SHA384_192 = 20,
    RC4_HMAC = 23,
    RC4_HMAC_EXP = 24,
    CAMELLIA128_CTS_CMAC = 25,
    CAMELLIA256_CTS_CMAC = 26,
}

/// A parsed principal name. Components joined by '/' followed by '@' and
/// the realm, as the library's unparse would produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub components: Vec<String>,
    pub realm: String,
}

impl Principal {
    pub fn new(components: &[&str], realm: &str) -> Self {
        Principal {
            components: components.iter().map(|c| c.to_string()).collect(),
            realm: realm.to_string(),
        }
    }

    /// Parse "name/instance@REALM". The realm separator is the last
    /// unescaped '@'; escapes are not handled, names containing them are
    /// rejected rather than mangled.
    pub fn parse(name: &str) -> Result<Self, KafsError> {
        if name.contains('\\') {
            return Err(KafsError::PrincipalFormat);
        }

        let (name_part, realm) = match name.rsplit_once('@') {
            Some((n, r)) => (n, r.to_string()),
            None => (name, String::new()),
        };

        if name_part.is_empty() {
            return Err(KafsError::PrincipalFormat);
        }

        let components: Vec<String> = name_part.split('/').map(|c| c.to_string()).collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(KafsError::PrincipalFormat);
        }

        Ok(Principal { components, realm })
    }

    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = realm.to_string();
        self
    }

    /// The name portion of the first component, which for a user principal
    /// is the local account name candidate.
    pub fn primary(&self) -> Option<&str> {
        self.components.first().map(|c| c.as_str())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    /// Raw enctype number as issued. Kept untyped so unrecognized types
    /// survive a round trip through the cache.
    pub etype: i32,
    pub value: Vec<u8>,
}

/// A ticket plus its session state, as handed over by the Kerberos
/// library. The ticket itself is opaque DER.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client: Principal,
    pub server: Principal,
    pub key: EncryptionKey,
    pub auth_time: u32,
    pub start_time: u32,
    pub end_time: u32,
    pub renew_till: u32,
    pub flags: u32,
    pub ticket: Vec<u8>,
}

impl Credentials {
    /// Whether this record ever held a real ticket. A default-constructed
    /// or zeroed record is not initialized.
    pub fn initialized(&self) -> bool {
        !self.client.components.is_empty() && !self.ticket.is_empty()
    }

    pub fn expired_at(&self, now: u32) -> bool {
        self.end_time <= now
    }
}

/// Session state for the pre-v5 ticket file format some sites still export.
#[derive(Debug, Clone)]
pub struct LegacyCredentials {
    pub name: String,
    pub instance: String,
    pub realm: String,
    pub session_key: [u8; 8],
    pub kvno: u8,
    pub ticket: Vec<u8>,
    pub issue_time: u32,
    pub lifetime: u8,
}

pub fn now_epoch() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// The boundary to the real Kerberos library. Everything that needs a krb5
/// context lives behind this trait; the library context lifecycle is the
/// implementor's concern.
pub trait CredentialProvider {
    /// Obtain a service ticket for `service` using the ticket-granting
    /// credentials in `client`. Failures carry the library's com_err code
    /// through [`KafsError::Kerberos`].
    fn service_ticket(
        &self,
        client: &Credentials,
        service: &Principal,
    ) -> Result<Credentials, KafsError>;

    /// The library's default realm, used to complete principals when no
    /// realm override is configured.
    fn default_realm(&self) -> Result<String, KafsError>;

    /// Which realm claims `hostname`, per the library's host-to-realm
    /// mapping (usually DNS TXT or local config).
    fn host_realm(&self, hostname: &str) -> Result<String, KafsError>;

    /// Whether `principal` may operate the local account `local_user`,
    /// honoring the account's authorization file when one exists.
    fn user_authorized(&self, principal: &Principal, local_user: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_parse_user() {
        let p = Principal::parse("ansel@EXAMPLE.COM").expect("parse failed");
        assert_eq!(p.components, vec!["ansel".to_string()]);
        assert_eq!(p.realm, "EXAMPLE.COM");
        assert_eq!(p.to_string(), "ansel@EXAMPLE.COM");
        assert_eq!(p.primary(), Some("ansel"));
    }

    #[test]
    fn test_principal_parse_service() {
        let p = Principal::parse("afs/grand.central.org@GRAND.CENTRAL.ORG").expect("parse failed");
        assert_eq!(
            p.components,
            vec!["afs".to_string(), "grand.central.org".to_string()]
        );
        assert_eq!(p.realm, "GRAND.CENTRAL.ORG");
    }

    #[test]
    fn test_principal_parse_no_realm() {
        let p = Principal::parse("ansel").expect("parse failed");
        assert_eq!(p.realm, "");
        let p = p.with_realm("EXAMPLE.COM");
        assert_eq!(p.to_string(), "ansel@EXAMPLE.COM");
    }

    #[test]
    fn test_principal_parse_invalid() {
        assert!(Principal::parse("").is_err());
        assert!(Principal::parse("@EXAMPLE.COM").is_err());
        assert!(Principal::parse("a//b@EXAMPLE.COM").is_err());
        assert!(Principal::parse("an\\@sel@EXAMPLE.COM").is_err());
    }

    #[test]
    fn test_encryption_type_from_raw() {
        let e = EncryptionType::try_from(18).expect("known enctype");
        assert_eq!(e, EncryptionType::AES256_CTS_HMAC_SHA1_96);
        assert!(EncryptionType::try_from(99).is_err());
    }

    #[test]
    fn test_credentials_initialized() {
        let empty = Credentials {
            client: Principal {
                components: vec![],
                realm: String::new(),
            },
            server: Principal {
                components: vec![],
                realm: String::new(),
            },
            key: EncryptionKey {
                etype: 0,
                value: vec![],
            },
            auth_time: 0,
            start_time: 0,
            end_time: 0,
            renew_till: 0,
            flags: 0,
            ticket: vec![],
        };
        assert!(!empty.initialized());
    }
}
