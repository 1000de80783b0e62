use std::collections::BTreeSet;
use std::ffi::{CStr, CString};

use ash::vk;

use crate::api_version::ApiVersion;
use crate::cstr::fixed_to_cstr;

/// Extensions whose functionality became core, and the version that absorbed them.
const PROMOTED: &[(&CStr, ApiVersion)] = &[
    (c"VK_KHR_get_physical_device_properties2", ApiVersion::V1_1),
    (c"VK_KHR_maintenance1", ApiVersion::V1_1),
    (c"VK_KHR_timeline_semaphore", ApiVersion::V1_2),
    (c"VK_KHR_synchronization2", ApiVersion::V1_3),
    (c"VK_EXT_tooling_info", ApiVersion::V1_3),
];

/// The core version an extension was promoted to, if any.
pub fn promoted_version(name: &CStr) -> Option<ApiVersion> {
    PROMOTED
        .iter()
        .find(|(ext, _)| *ext == name)
        .map(|(_, version)| *version)
}

/// An ordered set of extension names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    names: BTreeSet<CString>,
}

impl ExtensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the names reported by an `vkEnumerate*ExtensionProperties` query.
    pub fn from_properties(props: &[vk::ExtensionProperties]) -> Self {
        props
            .iter()
            .filter_map(|p| fixed_to_cstr(&p.extension_name))
            .collect()
    }

    pub fn insert(&mut self, name: &CStr) -> bool {
        self.names.insert(name.to_owned())
    }

    pub fn contains(&self, name: &CStr) -> bool {
        self.names.contains(name)
    }

    /// Whether `name` is usable at `api_version`: listed explicitly, or
    /// promoted to a core version no newer than `api_version`.
    pub fn is_available(&self, name: &CStr, api_version: ApiVersion) -> bool {
        self.contains(name)
            || promoted_version(name).is_some_and(|core| api_version.without_patch() >= core)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.names.iter().map(CString::as_c_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<'a> FromIterator<&'a CStr> for ExtensionSet {
    fn from_iter<I: IntoIterator<Item = &'a CStr>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(CStr::to_owned).collect(),
        }
    }
}
