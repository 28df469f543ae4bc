//! Host descriptors and init strategy resolution.

mod detect;

pub use detect::detect_host;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ServiceError};
use crate::strategy::StrategyKind;

/// Operating system identifier as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OsFamily {
    Fedora,
    Redhat,
    Centos,
    Scientific,
    Debian,
    Ubuntu,
    Suse,
    Amazon,
    Other(String),
}

/// Coarse platform family, used to pick the SysV control mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Rhel,
    Debian,
}

impl OsFamily {
    /// Canonical lowercase identifier
    pub fn id(&self) -> &str {
        match self {
            OsFamily::Fedora => "fedora",
            OsFamily::Redhat => "redhat",
            OsFamily::Centos => "centos",
            OsFamily::Scientific => "scientific",
            OsFamily::Debian => "debian",
            OsFamily::Ubuntu => "ubuntu",
            OsFamily::Suse => "suse",
            OsFamily::Amazon => "amazon",
            OsFamily::Other(id) => id,
        }
    }

    /// Whether this is a RHEL rebuild (redhat, centos, scientific)
    pub fn is_rhel_like(&self) -> bool {
        matches!(
            self,
            OsFamily::Redhat | OsFamily::Centos | OsFamily::Scientific
        )
    }

    pub fn platform_family(&self) -> PlatformFamily {
        match self {
            OsFamily::Debian | OsFamily::Ubuntu => PlatformFamily::Debian,
            _ => PlatformFamily::Rhel,
        }
    }
}

impl From<&str> for OsFamily {
    fn from(id: &str) -> Self {
        let id = id.trim().to_lowercase();
        match id.as_str() {
            "fedora" => OsFamily::Fedora,
            "redhat" | "rhel" => OsFamily::Redhat,
            "centos" => OsFamily::Centos,
            "scientific" => OsFamily::Scientific,
            "debian" => OsFamily::Debian,
            "ubuntu" => OsFamily::Ubuntu,
            "suse" | "sles" => OsFamily::Suse,
            s if s.starts_with("opensuse") => OsFamily::Suse,
            "amazon" | "amzn" => OsFamily::Amazon,
            _ => OsFamily::Other(id),
        }
    }
}

impl From<String> for OsFamily {
    fn from(id: String) -> Self {
        OsFamily::from(id.as_str())
    }
}

impl From<OsFamily> for String {
    fn from(family: OsFamily) -> Self {
        family.id().to_string()
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Platform version compared as a decimal number.
///
/// Only the leading `major[.minor]` prefix counts, so `"7.2.1511"` compares
/// as 7.2 and `"15.04"` as 15.04.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr", into = "String")]
pub struct OsVersion {
    raw: String,
    value: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Text(String),
    Number(f64),
}

impl OsVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let value = decimal_prefix(raw).ok_or_else(|| ServiceError::UnsupportedPlatform {
            family: "unknown".into(),
            version: raw.to_string(),
            reason: "version has no numeric component".into(),
        })?;

        Ok(Self {
            raw: raw.to_string(),
            value,
        })
    }

    pub fn as_f64(&self) -> f64 {
        self.value
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Parse the leading `digits[.digits]` of a version string
fn decimal_prefix(raw: &str) -> Option<f64> {
    let mut end = 0;
    let mut seen_dot = false;

    for (i, c) in raw.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && !seen_dot && end > 0 {
            seen_dot = true;
        } else {
            break;
        }
    }

    if end == 0 {
        return None;
    }

    raw[..end].parse().ok().filter(|v: &f64| v.is_finite())
}

impl TryFrom<VersionRepr> for OsVersion {
    type Error = ServiceError;

    fn try_from(repr: VersionRepr) -> Result<Self> {
        match repr {
            VersionRepr::Text(s) => OsVersion::parse(&s),
            VersionRepr::Number(n) if !n.is_finite() => Err(ServiceError::UnsupportedPlatform {
                family: "unknown".into(),
                version: n.to_string(),
                reason: "version is not a finite number".into(),
            }),
            VersionRepr::Number(n) => Ok(Self {
                raw: n.to_string(),
                value: n,
            }),
        }
    }
}

impl From<OsVersion> for String {
    fn from(version: OsVersion) -> Self {
        version.raw
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Target host, supplied by the caller or detected from release files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub family: OsFamily,
    pub version: OsVersion,
}

impl HostDescriptor {
    pub fn new(family: impl Into<OsFamily>, version: &str) -> Result<Self> {
        let family = family.into();
        let version = OsVersion::parse(version).map_err(|_| ServiceError::UnsupportedPlatform {
            family: family.to_string(),
            version: version.to_string(),
            reason: "version has no numeric component".into(),
        })?;
        Ok(Self { family, version })
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family, self.version)
    }
}

/// Pick the init strategy for a host.
///
/// RHEL rebuilds at exactly 7.0 satisfy both the systemd (>= 7.0) and the
/// SysV (<= 7.0) rule; systemd wins.
pub fn resolve(host: &HostDescriptor) -> Result<StrategyKind> {
    let v = host.version.as_f64();

    let kind = match &host.family {
        OsFamily::Fedora => Some(StrategyKind::Systemd),
        f if f.is_rhel_like() && v >= 7.0 => Some(StrategyKind::Systemd),
        f if f.is_rhel_like() => Some(StrategyKind::SysVInit),
        OsFamily::Debian if v >= 8.0 => Some(StrategyKind::Systemd),
        OsFamily::Debian => Some(StrategyKind::SysVInit),
        OsFamily::Ubuntu if v >= 15.04 => Some(StrategyKind::Systemd),
        OsFamily::Suse | OsFamily::Amazon => Some(StrategyKind::SysVInit),
        _ => None,
    };

    kind.ok_or_else(|| ServiceError::UnsupportedPlatform {
        family: host.family.to_string(),
        version: host.version.to_string(),
        reason: "no init strategy supports this platform".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(family: &str, version: &str) -> HostDescriptor {
        HostDescriptor::new(family, version).unwrap()
    }

    fn resolved(family: &str, version: &str) -> StrategyKind {
        resolve(&host(family, version)).unwrap()
    }

    #[test]
    fn fedora_is_always_systemd() {
        assert_eq!(resolved("fedora", "20"), StrategyKind::Systemd);
        assert_eq!(resolved("fedora", "38"), StrategyKind::Systemd);
    }

    #[test]
    fn rhel_like_splits_at_seven() {
        for family in ["redhat", "centos", "scientific"] {
            assert_eq!(resolved(family, "6.9"), StrategyKind::SysVInit);
            assert_eq!(resolved(family, "7.2.1511"), StrategyKind::Systemd);
        }
    }

    #[test]
    fn rhel_seven_point_zero_prefers_systemd() {
        assert_eq!(resolved("centos", "7.0"), StrategyKind::Systemd);
        assert_eq!(resolved("redhat", "7"), StrategyKind::Systemd);
    }

    #[test]
    fn debian_splits_at_eight() {
        assert_eq!(resolved("debian", "7.11"), StrategyKind::SysVInit);
        assert_eq!(resolved("debian", "8.0"), StrategyKind::Systemd);
        assert_eq!(resolved("debian", "12"), StrategyKind::Systemd);
    }

    #[test]
    fn ubuntu_requires_vivid() {
        assert_eq!(resolved("ubuntu", "15.04"), StrategyKind::Systemd);
        assert_eq!(resolved("ubuntu", "16.04"), StrategyKind::Systemd);
        assert!(matches!(
            resolve(&host("ubuntu", "14.04")),
            Err(ServiceError::UnsupportedPlatform { .. })
        ));
    }

    #[test]
    fn suse_and_amazon_are_sysvinit() {
        assert_eq!(resolved("suse", "12.1"), StrategyKind::SysVInit);
        assert_eq!(resolved("opensuse-leap", "15.5"), StrategyKind::SysVInit);
        assert_eq!(resolved("amzn", "2015.09"), StrategyKind::SysVInit);
    }

    #[test]
    fn unknown_family_is_unsupported() {
        let err = resolve(&host("gentoo", "2.14")).unwrap_err();
        assert!(err.to_string().contains("gentoo"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let h = host("debian", "9");
        let first = resolve(&h).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&h).unwrap(), first);
        }
    }

    #[test]
    fn version_prefix_parsing() {
        assert_eq!(OsVersion::parse("7.2.1511").unwrap().as_f64(), 7.2);
        assert_eq!(OsVersion::parse("15.04").unwrap().as_f64(), 15.04);
        assert_eq!(OsVersion::parse("8").unwrap().as_f64(), 8.0);
        assert_eq!(OsVersion::parse("6.").unwrap().as_f64(), 6.0);
        assert!(OsVersion::parse("buster/sid").is_err());
        assert!(OsVersion::parse("").is_err());
    }

    #[test]
    fn family_aliases() {
        assert_eq!(OsFamily::from("rhel"), OsFamily::Redhat);
        assert_eq!(OsFamily::from("SLES"), OsFamily::Suse);
        assert_eq!(OsFamily::from("amzn"), OsFamily::Amazon);
        assert_eq!(OsFamily::from("arch"), OsFamily::Other("arch".into()));
    }

    #[test]
    fn platform_families() {
        assert_eq!(OsFamily::Ubuntu.platform_family(), PlatformFamily::Debian);
        assert_eq!(OsFamily::Amazon.platform_family(), PlatformFamily::Rhel);
        assert_eq!(OsFamily::Suse.platform_family(), PlatformFamily::Rhel);
    }

    #[test]
    fn host_deserializes_numeric_and_text_versions() {
        let h: HostDescriptor =
            serde_json::from_str(r#"{"family": "centos", "version": 6.9}"#).unwrap();
        assert_eq!(h.family, OsFamily::Centos);
        assert_eq!(h.version.as_f64(), 6.9);

        let h: HostDescriptor =
            serde_json::from_str(r#"{"family": "ubuntu", "version": "15.04"}"#).unwrap();
        assert_eq!(h.version.as_str(), "15.04");
    }

    #[test]
    fn non_finite_versions_are_rejected() {
        for version in [".nan", ".inf", "-.inf"] {
            let yaml = format!("family: centos\nversion: {}\n", version);
            assert!(serde_yaml::from_str::<HostDescriptor>(&yaml).is_err(), "{}", version);
        }
        assert!(OsVersion::parse(&"9".repeat(400)).is_err());
    }
}
