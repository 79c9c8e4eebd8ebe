//! Indicator-of-compromise value types.
//!
//! The EDR only understands a fixed set of indicator types; anything else is
//! rejected at the boundary so unsupported types never reach the
//! reconciliation diff or the sighting extractor.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Indicator types the EDR can match on.
///
/// String forms follow the intel platform's attribute type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IocType {
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "domain")]
    Domain,
    #[serde(rename = "hostname")]
    Hostname,
    #[serde(rename = "ip-dst")]
    IpDst,
}

impl IocType {
    /// All allow-listed types.
    pub const ALL: [IocType; 6] = [
        IocType::Md5,
        IocType::Sha1,
        IocType::Sha256,
        IocType::Domain,
        IocType::Hostname,
        IocType::IpDst,
    ];

    /// Wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Md5 => "md5",
            IocType::Sha1 => "sha1",
            IocType::Sha256 => "sha256",
            IocType::Domain => "domain",
            IocType::Hostname => "hostname",
            IocType::IpDst => "ip-dst",
        }
    }
}

impl fmt::Display for IocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(IocType::Md5),
            "sha1" => Ok(IocType::Sha1),
            "sha256" => Ok(IocType::Sha256),
            "domain" => Ok(IocType::Domain),
            "hostname" => Ok(IocType::Hostname),
            "ip-dst" => Ok(IocType::IpDst),
            other => Err(Error::UnsupportedIocType(other.to_string())),
        }
    }
}

/// One indicator instance.
///
/// `uuid` identifies the instance and `guuid` links it back to the intel
/// record it was extracted from. For reconciliation purposes two indicators
/// are the same when `(source, value, ioc_type)` match; the ids are carried
/// along but do not participate in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    pub uuid: String,
    pub guuid: String,
    pub source: String,
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
}

impl Ioc {
    /// Build an indicator, generating a random `uuid` when none is given.
    pub fn new(
        uuid: impl Into<String>,
        guuid: impl Into<String>,
        source: impl Into<String>,
        value: impl Into<String>,
        ioc_type: IocType,
    ) -> Self {
        let mut uuid = uuid.into();
        if uuid.is_empty() {
            uuid = ::uuid::Uuid::new_v4().to_string();
        }
        Self {
            uuid,
            guuid: guuid.into(),
            source: source.into(),
            value: value.into(),
            ioc_type,
        }
    }
}

impl PartialEq for Ioc {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.value == other.value
            && self.ioc_type == other.ioc_type
    }
}

impl Eq for Ioc {}

impl Hash for Ioc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.value.hash(state);
        self.ioc_type.hash(state);
    }
}

impl fmt::Display for Ioc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uuid:{} guuid:{} source:{} type:{} value:{}",
            self.uuid, self.guuid, self.source, self.ioc_type, self.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_allow_list() {
        for t in IocType::ALL {
            assert_eq!(t.as_str().parse::<IocType>().unwrap(), t);
        }
        assert!("unsupported".parse::<IocType>().is_err());
        assert!("url".parse::<IocType>().is_err());
    }

    #[test]
    fn test_uuid_generated_when_absent() {
        let ioc = Ioc::new("", "g1", "misp", "evil.example.com", IocType::Domain);
        assert!(!ioc.uuid.is_empty());

        let ioc = Ioc::new("keep-me", "g1", "misp", "evil.example.com", IocType::Domain);
        assert_eq!(ioc.uuid, "keep-me");
    }

    #[test]
    fn test_equality_ignores_ids() {
        let a = Ioc::new("u1", "g1", "misp", "evil.example.com", IocType::Domain);
        let b = Ioc::new("u2", "g2", "misp", "evil.example.com", IocType::Domain);
        assert_eq!(a, b);

        let c = Ioc::new("u1", "g1", "misp", "evil.example.com", IocType::Hostname);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_wire_shape() {
        let ioc = Ioc::new("u1", "g1", "misp", "aaa", IocType::Md5);
        let json = serde_json::to_value(&ioc).unwrap();
        assert_eq!(json["type"], "md5");
        assert_eq!(json["guuid"], "g1");
    }
}
