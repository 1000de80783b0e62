//! Layer and extension reporting, composed with what the next link reports.

use std::ffi::CStr;

use ash::vk;
use vkshim_core::cstr::{fixed_to_cstr, write_fixed};

use crate::records::PhysicalDeviceRecord;
use crate::{LAYER_DESCRIPTION, LAYER_IMPLEMENTATION_VERSION, LAYER_NAME};

/// `VkLayerProperties` describing this layer.
pub fn layer_properties() -> vk::LayerProperties {
    let mut props = vk::LayerProperties {
        spec_version: vk::API_VERSION_1_3,
        implementation_version: LAYER_IMPLEMENTATION_VERSION,
        ..Default::default()
    };
    write_fixed(LAYER_NAME.to_bytes(), &mut props.layer_name);
    write_fixed(LAYER_DESCRIPTION, &mut props.description);
    props
}

pub fn extension_properties(name: &CStr, spec_version: u32) -> vk::ExtensionProperties {
    let mut props = vk::ExtensionProperties {
        spec_version,
        ..Default::default()
    };
    write_fixed(name.to_bytes(), &mut props.extension_name);
    props
}

/// Whether a `pLayerName` argument names this layer.
///
/// # Safety
/// `p_layer_name` must be null or a valid C string.
pub unsafe fn is_this_layer(p_layer_name: *const std::ffi::c_char) -> bool {
    !p_layer_name.is_null() && unsafe { CStr::from_ptr(p_layer_name) } == LAYER_NAME
}

/// Write `items` using the two-call idiom: a null `out` reports the count,
/// otherwise up to `*count` items are copied and `VK_INCOMPLETE` signals
/// truncation.
///
/// # Safety
/// `count` must be valid; `out` null or valid for `*count` elements.
pub unsafe fn fill_array<T: Copy>(items: &[T], count: *mut u32, out: *mut T) -> vk::Result {
    if count.is_null() {
        return vk::Result::ERROR_UNKNOWN;
    }
    if out.is_null() {
        unsafe { *count = items.len() as u32 };
        return vk::Result::SUCCESS;
    }
    let written = (unsafe { *count } as usize).min(items.len());
    unsafe {
        std::ptr::copy_nonoverlapping(items.as_ptr(), out, written);
        *count = written as u32;
    }
    if written < items.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

/// Run a two-call enumeration against the next link until it returns a
/// complete list.
///
/// # Safety
/// `query` must behave as a Vulkan enumeration function.
pub unsafe fn enumerate<T: Clone + Default>(
    mut query: impl FnMut(*mut u32, *mut T) -> vk::Result,
) -> Result<Vec<T>, vk::Result> {
    loop {
        let mut count = 0u32;
        let result = query(&mut count, std::ptr::null_mut());
        if result != vk::Result::SUCCESS {
            return Err(result);
        }
        let mut items = vec![T::default(); count as usize];
        let result = query(&mut count, items.as_mut_ptr());
        match result {
            vk::Result::SUCCESS => {
                items.truncate(count as usize);
                return Ok(items);
            }
            vk::Result::INCOMPLETE => continue,
            err => return Err(err),
        }
    }
}

/// Extensions this layer adds on `physical_device`.
pub fn emulated_extensions(physical_device: &PhysicalDeviceRecord) -> Vec<vk::ExtensionProperties> {
    physical_device
        .offered
        .iter()
        .map(|m| extension_properties(m.extension(), m.spec_version()))
        .collect()
}

/// The next link's device extensions followed by the emulated ones it does
/// not already list.
///
/// # Safety
/// `physical_device` must be live.
pub unsafe fn composed_device_extensions(
    physical_device: &PhysicalDeviceRecord,
) -> Result<Vec<vk::ExtensionProperties>, vk::Result> {
    let dispatch = &physical_device.instance.dispatch;
    let driver = physical_device.driver();
    let mut extensions = unsafe {
        enumerate(|count, out| {
            (dispatch.enumerate_device_extension_properties)(driver, std::ptr::null(), count, out)
        })
    }?;
    for emulated in emulated_extensions(physical_device) {
        let name = fixed_to_cstr(&emulated.extension_name);
        let listed = extensions
            .iter()
            .any(|e| fixed_to_cstr(&e.extension_name) == name);
        if !listed {
            extensions.push(emulated);
        }
    }
    Ok(extensions)
}
