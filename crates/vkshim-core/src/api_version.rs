use std::fmt;
use std::str::FromStr;

use ash::vk;

use crate::error::CoreError;

/// A packed Vulkan API version (variant 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(u32);

impl ApiVersion {
    pub const V1_0: Self = Self(vk::API_VERSION_1_0);
    pub const V1_1: Self = Self(vk::API_VERSION_1_1);
    pub const V1_2: Self = Self(vk::API_VERSION_1_2);
    pub const V1_3: Self = Self(vk::API_VERSION_1_3);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self(vk::make_api_version(0, major, minor, patch))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Interpret `VkApplicationInfo::apiVersion`, where 0 means 1.0.
    pub const fn from_application(raw: u32) -> Self {
        if raw == 0 {
            Self::V1_0
        } else {
            Self(raw)
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub const fn minor(self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub const fn patch(self) -> u32 {
        vk::api_version_patch(self.0)
    }

    /// The same major.minor with the patch level cleared, for feature-level comparisons.
    pub const fn without_patch(self) -> Self {
        Self::new(self.major(), self.minor(), 0)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

impl FromStr for ApiVersion {
    type Err = CoreError;

    /// Accepts `major.minor` or `major.minor.patch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidVersion(s.to_string());
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let (major, minor, patch) = match parts.as_slice() {
            [major, minor] => (*major, *minor, 0),
            [major, minor, patch] => (*major, *minor, *patch),
            _ => return Err(invalid()),
        };
        // Field widths of the packed encoding: 7 / 10 / 12 bits.
        if major > 0x7F || minor > 0x3FF || patch > 0xFFF {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}
