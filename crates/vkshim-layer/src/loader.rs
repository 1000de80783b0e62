//! `#[repr(C)]` mirrors of the loader/layer interface structures from
//! `vk_layer.h`. These are not part of the Vulkan registry and so are not
//! generated by `ash`.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void};

use ash::vk;

/// `VK_STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO`
pub const STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO: vk::StructureType =
    vk::StructureType::from_raw(47);
/// `VK_STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO`
pub const STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO: vk::StructureType =
    vk::StructureType::from_raw(48);

pub type PFN_GetPhysicalDeviceProcAddr =
    unsafe extern "system" fn(instance: vk::Instance, p_name: *const c_char) -> vk::PFN_vkVoidFunction;

pub type PFN_vkSetInstanceLoaderData =
    unsafe extern "system" fn(instance: vk::Instance, object: *mut c_void) -> vk::Result;

pub type PFN_vkSetDeviceLoaderData =
    unsafe extern "system" fn(device: vk::Device, object: *mut c_void) -> vk::Result;

pub type PFN_vkLayerCreateDevice = unsafe extern "system" fn(
    instance: vk::Instance,
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
    layer_gipa: vk::PFN_vkGetInstanceProcAddr,
    next_gdpa: *mut vk::PFN_vkGetDeviceProcAddr,
) -> vk::Result;

pub type PFN_vkLayerDestroyDevice = unsafe extern "system" fn(
    device: vk::Device,
    p_allocator: *const vk::AllocationCallbacks<'_>,
    destroy_function: vk::PFN_vkDestroyDevice,
);

/// `VkNegotiateLayerStructType`
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateLayerStructType(pub i32);

impl NegotiateLayerStructType {
    pub const UNINITIALIZED: Self = Self(0);
    pub const INTERFACE_STRUCT: Self = Self(1);
}

/// `VkLayerFunction`: discriminates the loader structs chained into create infos.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFunction(pub i32);

impl LayerFunction {
    pub const LINK_INFO: Self = Self(0);
    pub const LOADER_DATA_CALLBACK: Self = Self(1);
    pub const LOADER_LAYER_CREATE_DEVICE_CALLBACK: Self = Self(2);
    pub const LOADER_FEATURES: Self = Self(3);
}

/// `VkNegotiateLayerInterface`
#[repr(C)]
pub struct NegotiateLayerInterface {
    pub s_type: NegotiateLayerStructType,
    pub p_next: *mut c_void,
    pub loader_layer_interface_version: u32,
    pub pfn_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
    pub pfn_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

/// `VkLayerInstanceLink`
#[repr(C)]
pub struct LayerInstanceLink {
    pub p_next: *mut LayerInstanceLink,
    pub pfn_next_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_next_get_physical_device_proc_addr: Option<PFN_GetPhysicalDeviceProcAddr>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LayerDeviceCallbacks {
    pub pfn_layer_create_device: Option<PFN_vkLayerCreateDevice>,
    pub pfn_layer_destroy_device: Option<PFN_vkLayerDestroyDevice>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union LayerInstanceCreateInfoPayload {
    pub p_layer_info: *mut LayerInstanceLink,
    pub pfn_set_instance_loader_data: Option<PFN_vkSetInstanceLoaderData>,
    pub layer_device: LayerDeviceCallbacks,
    pub loader_features: u32,
}

/// `VkLayerInstanceCreateInfo`
#[repr(C)]
pub struct LayerInstanceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerInstanceCreateInfoPayload,
}

/// `VkLayerDeviceLink`
#[repr(C)]
pub struct LayerDeviceLink {
    pub p_next: *mut LayerDeviceLink,
    pub pfn_next_get_instance_proc_addr: Option<vk::PFN_vkGetInstanceProcAddr>,
    pub pfn_next_get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union LayerDeviceCreateInfoPayload {
    pub p_layer_info: *mut LayerDeviceLink,
    pub pfn_set_device_loader_data: Option<PFN_vkSetDeviceLoaderData>,
}

/// `VkLayerDeviceCreateInfo`
#[repr(C)]
pub struct LayerDeviceCreateInfo {
    pub s_type: vk::StructureType,
    pub p_next: *const c_void,
    pub function: LayerFunction,
    pub u: LayerDeviceCreateInfoPayload,
}

/// Walk a create-info `pNext` chain for the loader struct of `s_type` whose
/// function is `LINK_INFO`.
///
/// # Safety
/// `p_next` must be null or the head of a valid Vulkan structure chain.
unsafe fn find_link_info<T>(mut p_next: *const c_void, s_type: vk::StructureType) -> *mut T {
    while !p_next.is_null() {
        let base = p_next as *const vk::BaseInStructure<'_>;
        if unsafe { (*base).s_type } == s_type {
            // Both loader create-info structs share this prefix.
            let info = p_next as *const LayerInstanceCreateInfo;
            if unsafe { (*info).function } == LayerFunction::LINK_INFO {
                return p_next as *mut T;
            }
        }
        p_next = unsafe { (*base).p_next } as *const c_void;
    }
    std::ptr::null_mut()
}

/// Locate the loader's instance link info in `vkCreateInstance`'s chain.
///
/// # Safety
/// `create_info` must be a valid `VkInstanceCreateInfo`.
pub unsafe fn instance_link_info(
    create_info: &vk::InstanceCreateInfo<'_>,
) -> *mut LayerInstanceCreateInfo {
    unsafe { find_link_info(create_info.p_next, STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO) }
}

/// Locate the loader's device link info in `vkCreateDevice`'s chain.
///
/// # Safety
/// `create_info` must be a valid `VkDeviceCreateInfo`.
pub unsafe fn device_link_info(create_info: &vk::DeviceCreateInfo<'_>) -> *mut LayerDeviceCreateInfo {
    unsafe { find_link_info(create_info.p_next, STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO) }
}
