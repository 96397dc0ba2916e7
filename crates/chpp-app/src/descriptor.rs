use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::header::APP_HEADER_SIZE;

/// Maximum service name length in bytes.
pub const NAME_LEN: usize = 20;

/// Service descriptor on the wire: uuid (16) + name (20) + major (1) + minor (1) + patch (2).
pub const DESCRIPTOR_SIZE: usize = 16 + NAME_LEN + 4;

/// Semantic version of a service or client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl Version {
    pub const fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Same major version means wire compatible.
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity of a negotiated service, advertised through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub version: Version,
    /// Minimum length of an accepted request or notification, app header included.
    #[serde(skip, default = "header_only")]
    pub min_length: usize,
}

fn header_only() -> usize {
    APP_HEADER_SIZE
}

impl ServiceDescriptor {
    pub fn new(uuid: Uuid, name: impl Into<String>, version: Version) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            uuid,
            name,
            version,
            min_length: APP_HEADER_SIZE,
        })
    }

    /// Require at least `len` bytes of body after the app header.
    pub fn with_min_body(mut self, len: usize) -> Self {
        self.min_length = APP_HEADER_SIZE + len;
        self
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(DESCRIPTOR_SIZE);
        dst.put_slice(self.uuid.as_bytes());
        let name = self.name.as_bytes();
        let len = name.len().min(NAME_LEN);
        dst.put_slice(&name[..len]);
        dst.put_bytes(0, NAME_LEN - len);
        dst.put_u8(self.version.major);
        dst.put_u8(self.version.minor);
        dst.put_u16_le(self.version.patch);
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < DESCRIPTOR_SIZE {
            return Err(AppError::Malformed(format!(
                "descriptor needs {DESCRIPTOR_SIZE} bytes, got {}",
                src.len()
            )));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&src[..16]);
        let raw_name = &src[16..16 + NAME_LEN];
        let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = std::str::from_utf8(&raw_name[..name_len])
            .map_err(|err| AppError::Malformed(format!("service name is not UTF-8: {err}")))?;
        let version = &src[16 + NAME_LEN..DESCRIPTOR_SIZE];

        Ok(Self {
            uuid: Uuid::from_bytes(uuid),
            name: name.to_string(),
            version: Version::new(
                version[0],
                version[1],
                u16::from_le_bytes([version[2], version[3]]),
            ),
            min_length: APP_HEADER_SIZE,
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::InvalidDescriptor("service name is empty".to_string()));
    }
    if name.len() > NAME_LEN {
        return Err(AppError::InvalidDescriptor(format!(
            "service name '{name}' is {} bytes, max {NAME_LEN}",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(AppError::InvalidDescriptor(
            "service name contains NUL".to_string(),
        ));
    }
    Ok(())
}

/// What a negotiated client speaks to. Bound to a peer handle by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientDescriptor {
    /// UUID of the service this client talks to.
    pub uuid: Uuid,
    pub name: String,
    pub version: Version,
    /// Minimum length of an accepted response or notification, app header included.
    pub min_length: usize,
}

impl ClientDescriptor {
    pub fn new(uuid: Uuid, name: impl Into<String>, version: Version) -> Self {
        Self {
            uuid,
            name: name.into(),
            version,
            min_length: APP_HEADER_SIZE,
        }
    }

    pub fn with_min_body(mut self, len: usize) -> Self {
        self.min_length = APP_HEADER_SIZE + len;
        self
    }

    /// True when `service` is the peer this client should bind to.
    pub fn matches(&self, service: &ServiceDescriptor) -> bool {
        self.uuid == service.uuid && self.version.is_compatible_with(&service.version)
    }
}

/// A peer service reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredService {
    pub handle: u8,
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: Uuid = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);

    #[test]
    fn encode_is_forty_bytes_and_nul_padded() {
        let descriptor = ServiceDescriptor::new(UUID, "accel", Version::new(1, 2, 0x0304)).unwrap();
        let mut buf = BytesMut::new();
        descriptor.encode(&mut buf);

        assert_eq!(buf.len(), DESCRIPTOR_SIZE);
        assert_eq!(&buf[..16], UUID.as_bytes());
        assert_eq!(&buf[16..21], b"accel");
        assert!(buf[21..36].iter().all(|&b| b == 0));
        assert_eq!(&buf[36..], &[1, 2, 0x04, 0x03]);
    }

    #[test]
    fn decode_reads_back_descriptor() {
        let descriptor =
            ServiceDescriptor::new(UUID, "twenty-byte-name-xyz", Version::new(3, 0, 7)).unwrap();
        let mut buf = BytesMut::new();
        descriptor.encode(&mut buf);
        assert_eq!(ServiceDescriptor::decode(&buf).unwrap(), descriptor);
    }

    #[test]
    fn rejects_bad_names() {
        for name in ["", "this-name-is-too-long-for-wire", "nul\0inside"] {
            let err = ServiceDescriptor::new(UUID, name, Version::new(1, 0, 0)).unwrap_err();
            assert!(matches!(err, AppError::InvalidDescriptor(_)), "{name:?}");
        }
    }

    #[test]
    fn decode_rejects_short_input() {
        assert!(matches!(
            ServiceDescriptor::decode(&[0u8; DESCRIPTOR_SIZE - 1]),
            Err(AppError::Malformed(_))
        ));
    }

    #[test]
    fn client_matches_on_uuid_and_major() {
        let service = ServiceDescriptor::new(UUID, "gyro", Version::new(2, 5, 0)).unwrap();
        assert!(ClientDescriptor::new(UUID, "gyro", Version::new(2, 0, 0)).matches(&service));
        assert!(!ClientDescriptor::new(UUID, "gyro", Version::new(1, 9, 0)).matches(&service));
        assert!(!ClientDescriptor::new(Uuid::nil(), "gyro", Version::new(2, 5, 0)).matches(&service));
    }

    #[test]
    fn min_body_adds_header() {
        let descriptor = ServiceDescriptor::new(UUID, "baro", Version::new(1, 0, 0))
            .unwrap()
            .with_min_body(4);
        assert_eq!(descriptor.min_length, APP_HEADER_SIZE + 4);
    }

    #[test]
    fn version_display() {
        assert_eq!(Version::new(1, 2, 300).to_string(), "1.2.300");
    }
}
