//! Fake next link for driving the layer the way the loader does.
//!
//! Every fake object gets a process-unique handle. Capabilities come from a
//! per-thread `DriverConfig` that is snapshotted when an instance is created,
//! so tests running in parallel never see each other's drivers. Calls that
//! reach the fake are logged against the handle they were made on.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Once, OnceLock};

use ash::vk;
use ash::vk::Handle;
use parking_lot::{Mutex, MutexGuard};
use vkshim_core::cstr::write_fixed;
use vkshim_layer::loader::{
    LayerDeviceCreateInfo, LayerDeviceCreateInfoPayload, LayerDeviceLink, LayerFunction, LayerInstanceCreateInfo,
    LayerInstanceCreateInfoPayload, LayerInstanceLink, NegotiateLayerInterface, NegotiateLayerStructType,
    STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO, STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO,
};
use vkshim_layer::properties::fill_array;

// ── Driver configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub api_version: u32,
    pub device_name: &'static str,
    pub extensions: Vec<&'static CStr>,
    /// Names the fake proc-address functions return null for.
    pub omit: Vec<&'static CStr>,
    pub physical_devices: u32,
    /// Tools reported by a native `vkGetPhysicalDeviceToolProperties`.
    pub tools: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            api_version: vk::make_api_version(0, 1, 2, 0),
            device_name: "Fake GPU",
            extensions: vec![c"VK_KHR_swapchain", c"VK_KHR_timeline_semaphore", c"VK_KHR_maintenance1"],
            omit: Vec::new(),
            physical_devices: 1,
            tools: 0,
        }
    }
}

impl DriverConfig {
    /// A driver that implements `VK_KHR_synchronization2` itself.
    pub fn with_native_sync2() -> Self {
        Self {
            api_version: vk::make_api_version(0, 1, 3, 0),
            ..Self::default()
        }
    }

    pub fn native_sync2(&self) -> bool {
        self.api_version >= vk::make_api_version(0, 1, 3, 0) || self.extensions.contains(&c"VK_KHR_synchronization2")
    }

    fn omits(&self, name: &CStr) -> bool {
        self.omit.contains(&name)
    }
}

thread_local! {
    static NEXT_CONFIG: RefCell<DriverConfig> = RefCell::new(DriverConfig::default());
    static WATCHED_CHAIN: RefCell<Vec<ChainLink>> = const { RefCell::new(Vec::new()) };
    static UNLOGGED_BARRIERS: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Stop logging `vkCmdPipelineBarrier` calls made on this thread and only
/// count them, so timing loops do not contend on the driver's call log.
pub fn count_barriers_only() {
    UNLOGGED_BARRIERS.with(|c| c.set(Some(0)));
}

/// Barriers counted on this thread since `count_barriers_only`.
pub fn counted_barriers() -> u64 {
    UNLOGGED_BARRIERS.with(|c| c.get().unwrap_or(0))
}

/// One node of an application chain as it looked before a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChainLink {
    node: usize,
    s_type: vk::StructureType,
    p_next: usize,
}

unsafe fn chain_links(head: *const c_void) -> Vec<ChainLink> {
    let mut links = Vec::new();
    let mut current = head as *const vk::BaseInStructure<'static>;
    while !current.is_null() {
        let next = unsafe { (*current).p_next };
        links.push(ChainLink {
            node: current as usize,
            s_type: unsafe { (*current).s_type },
            p_next: next as usize,
        });
        current = next;
    }
    links
}

/// Remember the links of the application chain at `head`. The next fake
/// `vkCreateDevice` on this thread reports whether they were still intact
/// while it ran, and forgets the watch.
pub fn watch_app_chain(head: *const c_void) {
    let links = unsafe { chain_links(head) };
    WATCHED_CHAIN.with(|w| *w.borrow_mut() = links);
}

fn watched_chain_intact() -> Option<bool> {
    WATCHED_CHAIN.with(|w| {
        let watched = std::mem::take(&mut *w.borrow_mut());
        if watched.is_empty() {
            return None;
        }
        let now = unsafe { chain_links(watched[0].node as *const c_void) };
        Some(now == *watched)
    })
}

/// Configuration used by instances created on this thread from now on.
pub fn set_driver_config(config: DriverConfig) {
    NEXT_CONFIG.with(|c| *c.borrow_mut() = config);
}

// ── Driver state ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Logged {
    PipelineBarrier {
        src: vk::PipelineStageFlags,
        dst: vk::PipelineStageFlags,
        flags: vk::DependencyFlags,
        memory: Vec<(vk::AccessFlags, vk::AccessFlags)>,
        buffers: Vec<(vk::AccessFlags, vk::AccessFlags)>,
        images: Vec<(vk::ImageLayout, vk::ImageLayout)>,
    },
    SetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    ResetEvent {
        event: vk::Event,
        stage: vk::PipelineStageFlags,
    },
    WaitEvents {
        events: Vec<vk::Event>,
        src: vk::PipelineStageFlags,
        dst: vk::PipelineStageFlags,
        barriers: usize,
    },
    WriteTimestamp {
        stage: vk::PipelineStageFlags,
        query: u32,
    },
    Submit {
        submits: Vec<LoggedSubmit>,
        fence: vk::Fence,
    },
    /// A function the layer only forwards reached the driver.
    Native(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSubmit {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    /// Wait and signal values from a chained `VkTimelineSemaphoreSubmitInfo`.
    pub timeline: Option<(Vec<u64>, Vec<u64>)>,
    pub protected: Option<bool>,
}

/// What `vkCreateDevice` received.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub config: DriverConfig,
    pub extensions: Vec<CString>,
    pub chain: Vec<vk::StructureType>,
    /// `timelineSemaphore` from a chained `VkPhysicalDeviceVulkan12Features`.
    pub timeline_semaphore: Option<bool>,
    /// Whether a watched application chain was unmodified during the call.
    pub app_chain_intact: Option<bool>,
    queues: HashMap<(u32, u32), u64>,
}

#[derive(Default)]
struct Driver {
    instances: HashMap<u64, DriverConfig>,
    instance_devices: HashMap<u64, Vec<u64>>,
    physical_devices: HashMap<u64, u64>,
    devices: HashMap<u64, DeviceInfo>,
    pools: HashMap<u64, u64>,
    command_buffers: HashMap<u64, u64>,
    live: HashSet<u64>,
    double_frees: HashSet<u64>,
    calls: HashMap<u64, Vec<Logged>>,
}

impl Driver {
    fn log(&mut self, raw: u64, call: Logged) {
        self.calls.entry(raw).or_default().push(call);
    }

    fn release(&mut self, raw: u64) {
        if !self.live.remove(&raw) {
            self.double_frees.insert(raw);
        }
    }

    fn physical_device_config(&self, physical_device: vk::PhysicalDevice) -> Option<DriverConfig> {
        let instance = self.physical_devices.get(&physical_device.as_raw())?;
        self.instances.get(instance).cloned()
    }
}

fn driver() -> MutexGuard<'static, Driver> {
    static DRIVER: OnceLock<Mutex<Driver>> = OnceLock::new();
    DRIVER.get_or_init(|| Mutex::new(Driver::default())).lock()
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x7000_0000_0000);

fn new_handle() -> u64 {
    NEXT_HANDLE.fetch_add(0x10, Ordering::Relaxed)
}

pub fn is_live(raw: u64) -> bool {
    driver().live.contains(&raw)
}

pub fn was_double_freed(raw: u64) -> bool {
    driver().double_frees.contains(&raw)
}

pub fn calls(raw: u64) -> Vec<Logged> {
    driver().calls.get(&raw).cloned().unwrap_or_default()
}

pub fn take_calls(raw: u64) -> Vec<Logged> {
    driver().calls.remove(&raw).unwrap_or_default()
}

pub fn device_info(device: vk::Device) -> DeviceInfo {
    driver()
        .devices
        .get(&device.as_raw())
        .cloned()
        .expect("device unknown to the fake driver")
}

/// Driver-side command pools of `device`.
pub fn driver_pools(device: vk::Device) -> Vec<u64> {
    driver()
        .pools
        .iter()
        .filter(|(_, d)| **d == device.as_raw())
        .map(|(pool, _)| *pool)
        .collect()
}

// ── Proc-address functions ──────────────────────────────────

macro_rules! pfn {
    ($func:path as $ty:ty) => {
        Some(unsafe { std::mem::transmute::<$ty, unsafe extern "system" fn()>($func as $ty) })
    };
}

pub unsafe extern "system" fn fake_get_instance_proc_addr(
    instance: vk::Instance,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { CStr::from_ptr(p_name) };
    if instance == vk::Instance::null() {
        return match name.to_bytes() {
            b"vkCreateInstance" => pfn!(fake_create_instance as vk::PFN_vkCreateInstance),
            _ => None,
        };
    }
    let config = driver().instances.get(&instance.as_raw()).cloned()?;
    if config.omits(name) {
        return None;
    }
    instance_function(name).or_else(|| device_function(name, &config))
}

pub unsafe extern "system" fn fake_get_device_proc_addr(
    device: vk::Device,
    p_name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    let name = unsafe { CStr::from_ptr(p_name) };
    let config = driver().devices.get(&device.as_raw()).map(|d| d.config.clone())?;
    if config.omits(name) {
        return None;
    }
    device_function(name, &config)
}

fn instance_function(name: &CStr) -> vk::PFN_vkVoidFunction {
    match name.to_bytes() {
        b"vkGetInstanceProcAddr" => pfn!(fake_get_instance_proc_addr as vk::PFN_vkGetInstanceProcAddr),
        b"vkDestroyInstance" => pfn!(fake_destroy_instance as vk::PFN_vkDestroyInstance),
        b"vkEnumeratePhysicalDevices" => pfn!(fake_enumerate_physical_devices as vk::PFN_vkEnumeratePhysicalDevices),
        b"vkEnumeratePhysicalDeviceGroups" | b"vkEnumeratePhysicalDeviceGroupsKHR" => {
            pfn!(fake_enumerate_physical_device_groups as vk::PFN_vkEnumeratePhysicalDeviceGroups)
        }
        b"vkEnumerateDeviceExtensionProperties" => {
            pfn!(fake_enumerate_device_extension_properties as vk::PFN_vkEnumerateDeviceExtensionProperties)
        }
        b"vkGetPhysicalDeviceProperties" => {
            pfn!(fake_get_physical_device_properties as vk::PFN_vkGetPhysicalDeviceProperties)
        }
        b"vkGetPhysicalDeviceFeatures" => pfn!(fake_get_physical_device_features as vk::PFN_vkGetPhysicalDeviceFeatures),
        b"vkGetPhysicalDeviceFeatures2" | b"vkGetPhysicalDeviceFeatures2KHR" => {
            pfn!(fake_get_physical_device_features2 as vk::PFN_vkGetPhysicalDeviceFeatures2)
        }
        b"vkGetPhysicalDeviceToolProperties" | b"vkGetPhysicalDeviceToolPropertiesEXT" => {
            pfn!(fake_get_physical_device_tool_properties as vk::PFN_vkGetPhysicalDeviceToolProperties)
        }
        b"vkGetPhysicalDeviceMemoryProperties" => {
            pfn!(fake_get_physical_device_memory_properties as vk::PFN_vkGetPhysicalDeviceMemoryProperties)
        }
        b"vkCreateDevice" => pfn!(fake_create_device as vk::PFN_vkCreateDevice),
        _ => None,
    }
}

fn device_function(name: &CStr, config: &DriverConfig) -> vk::PFN_vkVoidFunction {
    let core = match name.to_bytes() {
        b"vkGetDeviceProcAddr" => pfn!(fake_get_device_proc_addr as vk::PFN_vkGetDeviceProcAddr),
        b"vkDestroyDevice" => pfn!(fake_destroy_device as vk::PFN_vkDestroyDevice),
        b"vkGetDeviceQueue" => pfn!(fake_get_device_queue as vk::PFN_vkGetDeviceQueue),
        b"vkGetDeviceQueue2" => pfn!(fake_get_device_queue2 as vk::PFN_vkGetDeviceQueue2),
        b"vkCreateCommandPool" => pfn!(fake_create_command_pool as vk::PFN_vkCreateCommandPool),
        b"vkDestroyCommandPool" => pfn!(fake_destroy_command_pool as vk::PFN_vkDestroyCommandPool),
        b"vkResetCommandPool" => pfn!(fake_reset_command_pool as vk::PFN_vkResetCommandPool),
        b"vkTrimCommandPool" | b"vkTrimCommandPoolKHR" => pfn!(fake_trim_command_pool as vk::PFN_vkTrimCommandPool),
        b"vkAllocateCommandBuffers" => pfn!(fake_allocate_command_buffers as vk::PFN_vkAllocateCommandBuffers),
        b"vkFreeCommandBuffers" => pfn!(fake_free_command_buffers as vk::PFN_vkFreeCommandBuffers),
        b"vkBeginCommandBuffer" => pfn!(fake_begin_command_buffer as vk::PFN_vkBeginCommandBuffer),
        b"vkEndCommandBuffer" => pfn!(fake_end_command_buffer as vk::PFN_vkEndCommandBuffer),
        b"vkResetCommandBuffer" => pfn!(fake_reset_command_buffer as vk::PFN_vkResetCommandBuffer),
        b"vkQueueSubmit" => pfn!(fake_queue_submit as vk::PFN_vkQueueSubmit),
        b"vkCmdPipelineBarrier" => pfn!(fake_cmd_pipeline_barrier as vk::PFN_vkCmdPipelineBarrier),
        b"vkCmdSetEvent" => pfn!(fake_cmd_set_event as vk::PFN_vkCmdSetEvent),
        b"vkCmdResetEvent" => pfn!(fake_cmd_reset_event as vk::PFN_vkCmdResetEvent),
        b"vkCmdWaitEvents" => pfn!(fake_cmd_wait_events as vk::PFN_vkCmdWaitEvents),
        b"vkCmdWriteTimestamp" => pfn!(fake_cmd_write_timestamp as vk::PFN_vkCmdWriteTimestamp),
        b"vkCmdDraw" => pfn!(fake_cmd_draw as vk::PFN_vkCmdDraw),
        _ => None,
    };
    if core.is_some() || !config.native_sync2() {
        return core;
    }
    match name.to_bytes() {
        b"vkCmdPipelineBarrier2" | b"vkCmdPipelineBarrier2KHR" => {
            pfn!(fake_cmd_pipeline_barrier2 as vk::PFN_vkCmdPipelineBarrier2)
        }
        b"vkCmdSetEvent2" | b"vkCmdSetEvent2KHR" => pfn!(fake_cmd_set_event2 as vk::PFN_vkCmdSetEvent2),
        b"vkCmdResetEvent2" | b"vkCmdResetEvent2KHR" => pfn!(fake_cmd_reset_event2 as vk::PFN_vkCmdResetEvent2),
        b"vkCmdWaitEvents2" | b"vkCmdWaitEvents2KHR" => pfn!(fake_cmd_wait_events2 as vk::PFN_vkCmdWaitEvents2),
        b"vkCmdWriteTimestamp2" | b"vkCmdWriteTimestamp2KHR" => {
            pfn!(fake_cmd_write_timestamp2 as vk::PFN_vkCmdWriteTimestamp2)
        }
        b"vkQueueSubmit2" | b"vkQueueSubmit2KHR" => pfn!(fake_queue_submit2 as vk::PFN_vkQueueSubmit2),
        _ => None,
    }
}

// ── Instance and physical device ────────────────────────────

unsafe extern "system" fn fake_create_instance(
    _p_create_info: *const vk::InstanceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_instance: *mut vk::Instance,
) -> vk::Result {
    let config = NEXT_CONFIG.with(|c| c.borrow().clone());
    let instance = new_handle();
    let physical_devices: Vec<u64> = (0..config.physical_devices).map(|_| new_handle()).collect();

    let mut d = driver();
    for &pd in &physical_devices {
        d.physical_devices.insert(pd, instance);
    }
    d.instance_devices.insert(instance, physical_devices);
    d.instances.insert(instance, config);
    d.live.insert(instance);
    unsafe { *p_instance = vk::Instance::from_raw(instance) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn fake_destroy_instance(instance: vk::Instance, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    driver().release(instance.as_raw());
}

unsafe extern "system" fn fake_enumerate_physical_devices(
    instance: vk::Instance,
    p_count: *mut u32,
    p_physical_devices: *mut vk::PhysicalDevice,
) -> vk::Result {
    let devices: Vec<vk::PhysicalDevice> = driver()
        .instance_devices
        .get(&instance.as_raw())
        .map(|list| list.iter().map(|&raw| vk::PhysicalDevice::from_raw(raw)).collect())
        .unwrap_or_default();
    unsafe { fill_array(&devices, p_count, p_physical_devices) }
}

unsafe extern "system" fn fake_enumerate_physical_device_groups(
    instance: vk::Instance,
    p_count: *mut u32,
    p_groups: *mut vk::PhysicalDeviceGroupProperties<'_>,
) -> vk::Result {
    let devices: Vec<u64> = driver()
        .instance_devices
        .get(&instance.as_raw())
        .cloned()
        .unwrap_or_default();
    // One group per physical device.
    if p_groups.is_null() {
        unsafe { *p_count = devices.len() as u32 };
        return vk::Result::SUCCESS;
    }
    let written = (unsafe { *p_count } as usize).min(devices.len());
    for (i, &raw) in devices.iter().take(written).enumerate() {
        let group = unsafe { &mut *p_groups.add(i) };
        group.physical_device_count = 1;
        group.physical_devices[0] = vk::PhysicalDevice::from_raw(raw);
        group.subset_allocation = vk::FALSE;
    }
    unsafe { *p_count = written as u32 };
    if written < devices.len() {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

unsafe extern "system" fn fake_enumerate_device_extension_properties(
    physical_device: vk::PhysicalDevice,
    p_layer_name: *const c_char,
    p_count: *mut u32,
    p_properties: *mut vk::ExtensionProperties,
) -> vk::Result {
    if !p_layer_name.is_null() {
        return vk::Result::ERROR_LAYER_NOT_PRESENT;
    }
    let Some(config) = driver().physical_device_config(physical_device) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let extensions: Vec<vk::ExtensionProperties> = config
        .extensions
        .iter()
        .map(|name| {
            let mut props = vk::ExtensionProperties {
                spec_version: 1,
                ..Default::default()
            };
            write_fixed(name.to_bytes(), &mut props.extension_name);
            props
        })
        .collect();
    unsafe { fill_array(&extensions, p_count, p_properties) }
}

unsafe extern "system" fn fake_get_physical_device_properties(
    physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceProperties,
) {
    let config = driver().physical_device_config(physical_device).unwrap_or_default();
    let props = unsafe { &mut *p_properties };
    props.api_version = config.api_version;
    props.driver_version = 42;
    props.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
    write_fixed(config.device_name, &mut props.device_name);
}

unsafe extern "system" fn fake_get_physical_device_features(
    _physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures,
) {
    unsafe { (*p_features).robust_buffer_access = vk::TRUE };
}

unsafe extern "system" fn fake_get_physical_device_features2(
    physical_device: vk::PhysicalDevice,
    p_features: *mut vk::PhysicalDeviceFeatures2<'_>,
) {
    let config = driver().physical_device_config(physical_device).unwrap_or_default();
    let features = unsafe { &mut *p_features };
    features.features.robust_buffer_access = vk::TRUE;
    let mut next = features.p_next as *mut vk::BaseOutStructure<'static>;
    while !next.is_null() {
        match unsafe { (*next).s_type } {
            vk::StructureType::PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES => {
                let sync2 = next as *mut vk::PhysicalDeviceSynchronization2Features<'static>;
                unsafe { (*sync2).synchronization2 = vk::Bool32::from(config.native_sync2()) };
            }
            vk::StructureType::PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES => {
                let timeline = next as *mut vk::PhysicalDeviceTimelineSemaphoreFeatures<'static>;
                unsafe { (*timeline).timeline_semaphore = vk::TRUE };
            }
            _ => {}
        }
        next = unsafe { (*next).p_next };
    }
}

unsafe extern "system" fn fake_get_physical_device_tool_properties(
    physical_device: vk::PhysicalDevice,
    p_count: *mut u32,
    p_properties: *mut vk::PhysicalDeviceToolProperties<'_>,
) -> vk::Result {
    let tools = driver()
        .physical_device_config(physical_device)
        .map_or(0, |config| config.tools);
    if p_properties.is_null() {
        unsafe { *p_count = tools };
        return vk::Result::SUCCESS;
    }
    let written = unsafe { *p_count }.min(tools);
    for i in 0..written {
        let props = unsafe { &mut *p_properties.add(i as usize) };
        write_fixed(format!("driver-tool-{}", i), &mut props.name);
        write_fixed("1.0", &mut props.version);
        props.purposes = vk::ToolPurposeFlags::VALIDATION;
    }
    unsafe { *p_count = written };
    if written < tools {
        vk::Result::INCOMPLETE
    } else {
        vk::Result::SUCCESS
    }
}

unsafe extern "system" fn fake_get_physical_device_memory_properties(
    _physical_device: vk::PhysicalDevice,
    p_properties: *mut vk::PhysicalDeviceMemoryProperties,
) {
    unsafe { (*p_properties).memory_type_count = 1 };
}

unsafe extern "system" fn fake_create_device(
    physical_device: vk::PhysicalDevice,
    p_create_info: *const vk::DeviceCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_device: *mut vk::Device,
) -> vk::Result {
    let mut d = driver();
    let Some(config) = d.physical_device_config(physical_device) else {
        return vk::Result::ERROR_INITIALIZATION_FAILED;
    };
    let info = unsafe { &*p_create_info };
    let extensions = (0..info.enabled_extension_count as usize)
        .map(|i| unsafe { CStr::from_ptr(*info.pp_enabled_extension_names.add(i)) }.to_owned())
        .collect();
    let mut chain = Vec::new();
    let mut timeline_semaphore = None;
    let mut next = info.p_next as *const vk::BaseInStructure<'static>;
    while !next.is_null() {
        let s_type = unsafe { (*next).s_type };
        if s_type == vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES {
            let v12 = unsafe { &*(next as *const vk::PhysicalDeviceVulkan12Features<'static>) };
            timeline_semaphore = Some(v12.timeline_semaphore == vk::TRUE);
        }
        chain.push(s_type);
        next = unsafe { (*next).p_next };
    }
    let app_chain_intact = watched_chain_intact();

    let device = new_handle();
    d.devices.insert(
        device,
        DeviceInfo {
            config,
            extensions,
            chain,
            timeline_semaphore,
            app_chain_intact,
            queues: HashMap::new(),
        },
    );
    d.live.insert(device);
    unsafe { *p_device = vk::Device::from_raw(device) };
    vk::Result::SUCCESS
}

// ── Device ──────────────────────────────────────────────────

unsafe extern "system" fn fake_destroy_device(device: vk::Device, _p_allocator: *const vk::AllocationCallbacks<'_>) {
    driver().release(device.as_raw());
}

fn queue_handle(device: vk::Device, family: u32, index: u32) -> vk::Queue {
    let mut d = driver();
    let Some(info) = d.devices.get_mut(&device.as_raw()) else {
        return vk::Queue::null();
    };
    let raw = *info.queues.entry((family, index)).or_insert_with(new_handle);
    d.live.insert(raw);
    vk::Queue::from_raw(raw)
}

unsafe extern "system" fn fake_get_device_queue(device: vk::Device, family: u32, index: u32, p_queue: *mut vk::Queue) {
    unsafe { *p_queue = queue_handle(device, family, index) };
}

unsafe extern "system" fn fake_get_device_queue2(
    device: vk::Device,
    p_queue_info: *const vk::DeviceQueueInfo2<'_>,
    p_queue: *mut vk::Queue,
) {
    let info = unsafe { &*p_queue_info };
    unsafe { *p_queue = queue_handle(device, info.queue_family_index, info.queue_index) };
}

unsafe extern "system" fn fake_create_command_pool(
    device: vk::Device,
    _p_create_info: *const vk::CommandPoolCreateInfo<'_>,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
    p_pool: *mut vk::CommandPool,
) -> vk::Result {
    let pool = new_handle();
    let mut d = driver();
    d.pools.insert(pool, device.as_raw());
    d.live.insert(pool);
    unsafe { *p_pool = vk::CommandPool::from_raw(pool) };
    vk::Result::SUCCESS
}

unsafe extern "system" fn fake_destroy_command_pool(
    _device: vk::Device,
    pool: vk::CommandPool,
    _p_allocator: *const vk::AllocationCallbacks<'_>,
) {
    let mut d = driver();
    let raw = pool.as_raw();
    d.release(raw);
    d.pools.remove(&raw);
    let buffers: Vec<u64> = d
        .command_buffers
        .iter()
        .filter(|(_, p)| **p == raw)
        .map(|(cb, _)| *cb)
        .collect();
    for cb in buffers {
        d.command_buffers.remove(&cb);
        d.live.remove(&cb);
    }
}

unsafe extern "system" fn fake_reset_command_pool(
    device: vk::Device,
    pool: vk::CommandPool,
    _flags: vk::CommandPoolResetFlags,
) -> vk::Result {
    let mut d = driver();
    if !d.pools.contains_key(&pool.as_raw()) {
        return vk::Result::ERROR_UNKNOWN;
    }
    d.log(device.as_raw(), Logged::Native("vkResetCommandPool"));
    vk::Result::SUCCESS
}

unsafe extern "system" fn fake_trim_command_pool(device: vk::Device, pool: vk::CommandPool, _flags: vk::CommandPoolTrimFlags) {
    let mut d = driver();
    if d.pools.contains_key(&pool.as_raw()) {
        d.log(device.as_raw(), Logged::Native("vkTrimCommandPool"));
    }
}

unsafe extern "system" fn fake_allocate_command_buffers(
    _device: vk::Device,
    p_allocate_info: *const vk::CommandBufferAllocateInfo<'_>,
    p_command_buffers: *mut vk::CommandBuffer,
) -> vk::Result {
    let info = unsafe { &*p_allocate_info };
    let mut d = driver();
    // Only driver-side pool handles are accepted.
    let pool = info.command_pool.as_raw();
    if !d.pools.contains_key(&pool) {
        return vk::Result::ERROR_UNKNOWN;
    }
    for i in 0..info.command_buffer_count as usize {
        let cb = new_handle();
        d.command_buffers.insert(cb, pool);
        d.live.insert(cb);
        unsafe { *p_command_buffers.add(i) = vk::CommandBuffer::from_raw(cb) };
    }
    vk::Result::SUCCESS
}

unsafe extern "system" fn fake_free_command_buffers(
    _device: vk::Device,
    _pool: vk::CommandPool,
    count: u32,
    p_command_buffers: *const vk::CommandBuffer,
) {
    let mut d = driver();
    for i in 0..count as usize {
        let cb = unsafe { *p_command_buffers.add(i) };
        if cb != vk::CommandBuffer::null() {
            d.command_buffers.remove(&cb.as_raw());
            d.release(cb.as_raw());
        }
    }
}

unsafe extern "system" fn fake_begin_command_buffer(
    command_buffer: vk::CommandBuffer,
    _p_begin_info: *const vk::CommandBufferBeginInfo<'_>,
) -> vk::Result {
    driver().log(command_buffer.as_raw(), Logged::Native("vkBeginCommandBuffer"));
    vk::Result::SUCCESS
}

unsafe extern "system" fn fake_end_command_buffer(command_buffer: vk::CommandBuffer) -> vk::Result {
    driver().log(command_buffer.as_raw(), Logged::Native("vkEndCommandBuffer"));
    vk::Result::SUCCESS
}

unsafe extern "system" fn fake_reset_command_buffer(
    command_buffer: vk::CommandBuffer,
    _flags: vk::CommandBufferResetFlags,
) -> vk::Result {
    driver().log(command_buffer.as_raw(), Logged::Native("vkResetCommandBuffer"));
    vk::Result::SUCCESS
}

unsafe fn slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, count as usize) }
    }
}

unsafe fn logged_submit(submit: &vk::SubmitInfo<'_>) -> LoggedSubmit {
    let mut timeline = None;
    let mut protected = None;
    let mut next = submit.p_next as *const vk::BaseInStructure<'static>;
    while !next.is_null() {
        match unsafe { (*next).s_type } {
            vk::StructureType::TIMELINE_SEMAPHORE_SUBMIT_INFO => {
                let info = unsafe { &*(next as *const vk::TimelineSemaphoreSubmitInfo<'static>) };
                timeline = Some((
                    unsafe { slice(info.p_wait_semaphore_values, info.wait_semaphore_value_count) }.to_vec(),
                    unsafe { slice(info.p_signal_semaphore_values, info.signal_semaphore_value_count) }.to_vec(),
                ));
            }
            vk::StructureType::PROTECTED_SUBMIT_INFO => {
                let info = unsafe { &*(next as *const vk::ProtectedSubmitInfo<'static>) };
                protected = Some(info.protected_submit == vk::TRUE);
            }
            _ => {}
        }
        next = unsafe { (*next).p_next };
    }
    LoggedSubmit {
        wait_semaphores: unsafe { slice(submit.p_wait_semaphores, submit.wait_semaphore_count) }.to_vec(),
        wait_stages: unsafe { slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count) }.to_vec(),
        command_buffers: unsafe { slice(submit.p_command_buffers, submit.command_buffer_count) }.to_vec(),
        signal_semaphores: unsafe { slice(submit.p_signal_semaphores, submit.signal_semaphore_count) }.to_vec(),
        timeline,
        protected,
    }
}

unsafe extern "system" fn fake_queue_submit(
    queue: vk::Queue,
    submit_count: u32,
    p_submits: *const vk::SubmitInfo<'_>,
    fence: vk::Fence,
) -> vk::Result {
    let submits: Vec<LoggedSubmit> = unsafe { slice(p_submits, submit_count) }
        .iter()
        .map(|s| unsafe { logged_submit(s) })
        .collect();
    let mut d = driver();
    let dead = submits
        .iter()
        .flat_map(|s| s.command_buffers.iter())
        .any(|cb| !d.live.contains(&cb.as_raw()));
    if dead {
        return vk::Result::ERROR_DEVICE_LOST;
    }
    d.log(queue.as_raw(), Logged::Submit { submits, fence });
    vk::Result::SUCCESS
}

// ── Commands ────────────────────────────────────────────────

unsafe extern "system" fn fake_cmd_pipeline_barrier(
    command_buffer: vk::CommandBuffer,
    src: vk::PipelineStageFlags,
    dst: vk::PipelineStageFlags,
    flags: vk::DependencyFlags,
    memory_count: u32,
    p_memory: *const vk::MemoryBarrier<'_>,
    buffer_count: u32,
    p_buffer: *const vk::BufferMemoryBarrier<'_>,
    image_count: u32,
    p_image: *const vk::ImageMemoryBarrier<'_>,
) {
    if let Some(count) = UNLOGGED_BARRIERS.with(|c| c.get()) {
        UNLOGGED_BARRIERS.with(|c| c.set(Some(count + 1)));
        return;
    }
    let memory = unsafe { slice(p_memory, memory_count) }
        .iter()
        .map(|b| (b.src_access_mask, b.dst_access_mask))
        .collect();
    let buffers = unsafe { slice(p_buffer, buffer_count) }
        .iter()
        .map(|b| (b.src_access_mask, b.dst_access_mask))
        .collect();
    let images = unsafe { slice(p_image, image_count) }
        .iter()
        .map(|b| (b.old_layout, b.new_layout))
        .collect();
    driver().log(
        command_buffer.as_raw(),
        Logged::PipelineBarrier {
            src,
            dst,
            flags,
            memory,
            buffers,
            images,
        },
    );
}

unsafe extern "system" fn fake_cmd_set_event(command_buffer: vk::CommandBuffer, event: vk::Event, stage: vk::PipelineStageFlags) {
    driver().log(command_buffer.as_raw(), Logged::SetEvent { event, stage });
}

unsafe extern "system" fn fake_cmd_reset_event(
    command_buffer: vk::CommandBuffer,
    event: vk::Event,
    stage: vk::PipelineStageFlags,
) {
    driver().log(command_buffer.as_raw(), Logged::ResetEvent { event, stage });
}

unsafe extern "system" fn fake_cmd_wait_events(
    command_buffer: vk::CommandBuffer,
    event_count: u32,
    p_events: *const vk::Event,
    src: vk::PipelineStageFlags,
    dst: vk::PipelineStageFlags,
    memory_count: u32,
    _p_memory: *const vk::MemoryBarrier<'_>,
    buffer_count: u32,
    _p_buffer: *const vk::BufferMemoryBarrier<'_>,
    image_count: u32,
    _p_image: *const vk::ImageMemoryBarrier<'_>,
) {
    let events = unsafe { slice(p_events, event_count) }.to_vec();
    driver().log(
        command_buffer.as_raw(),
        Logged::WaitEvents {
            events,
            src,
            dst,
            barriers: (memory_count + buffer_count + image_count) as usize,
        },
    );
}

unsafe extern "system" fn fake_cmd_write_timestamp(
    command_buffer: vk::CommandBuffer,
    stage: vk::PipelineStageFlags,
    _query_pool: vk::QueryPool,
    query: u32,
) {
    driver().log(command_buffer.as_raw(), Logged::WriteTimestamp { stage, query });
}

pub unsafe extern "system" fn fake_cmd_draw(_command_buffer: vk::CommandBuffer, _: u32, _: u32, _: u32, _: u32) {}

unsafe extern "system" fn fake_cmd_pipeline_barrier2(
    command_buffer: vk::CommandBuffer,
    _p_dependency_info: *const vk::DependencyInfo<'_>,
) {
    driver().log(command_buffer.as_raw(), Logged::Native("vkCmdPipelineBarrier2"));
}

unsafe extern "system" fn fake_cmd_set_event2(
    command_buffer: vk::CommandBuffer,
    _event: vk::Event,
    _p_dependency_info: *const vk::DependencyInfo<'_>,
) {
    driver().log(command_buffer.as_raw(), Logged::Native("vkCmdSetEvent2"));
}

unsafe extern "system" fn fake_cmd_reset_event2(
    command_buffer: vk::CommandBuffer,
    _event: vk::Event,
    _stage: vk::PipelineStageFlags2,
) {
    driver().log(command_buffer.as_raw(), Logged::Native("vkCmdResetEvent2"));
}

unsafe extern "system" fn fake_cmd_wait_events2(
    command_buffer: vk::CommandBuffer,
    _event_count: u32,
    _p_events: *const vk::Event,
    _p_dependency_infos: *const vk::DependencyInfo<'_>,
) {
    driver().log(command_buffer.as_raw(), Logged::Native("vkCmdWaitEvents2"));
}

unsafe extern "system" fn fake_cmd_write_timestamp2(
    command_buffer: vk::CommandBuffer,
    _stage: vk::PipelineStageFlags2,
    _query_pool: vk::QueryPool,
    _query: u32,
) {
    driver().log(command_buffer.as_raw(), Logged::Native("vkCmdWriteTimestamp2"));
}

unsafe extern "system" fn fake_queue_submit2(
    queue: vk::Queue,
    _submit_count: u32,
    _p_submits: *const vk::SubmitInfo2<'_>,
    _fence: vk::Fence,
) -> vk::Result {
    driver().log(queue.as_raw(), Logged::Native("vkQueueSubmit2"));
    vk::Result::SUCCESS
}

// ── Loader-side helpers ─────────────────────────────────────

/// Negotiate once per test binary, as the loader does before anything else.
pub fn negotiate() {
    static NEGOTIATED: Once = Once::new();
    NEGOTIATED.call_once(|| {
        let mut request = NegotiateLayerInterface {
            s_type: NegotiateLayerStructType::INTERFACE_STRUCT,
            p_next: std::ptr::null_mut(),
            loader_layer_interface_version: 2,
            pfn_get_instance_proc_addr: None,
            pfn_get_device_proc_addr: None,
            pfn_get_physical_device_proc_addr: None,
        };
        let result = unsafe { vkshim_layer::vkNegotiateLoaderLayerInterfaceVersion(&mut request) };
        assert_eq!(result, vk::Result::SUCCESS);
        assert_eq!(request.loader_layer_interface_version, 2);
    });
}

/// Reinterpret a proc address as a typed PFN.
///
/// # Safety
/// `T` must be the PFN type of the name `pfn` was resolved for.
pub unsafe fn cast<T: Copy>(pfn: unsafe extern "system" fn()) -> T {
    unsafe { std::mem::transmute_copy(&pfn) }
}

/// Resolve `name` through the layer's `vkGetInstanceProcAddr`.
pub unsafe fn instance_fn<T: Copy>(instance: vk::Instance, name: &CStr) -> T {
    let pfn = unsafe { vkshim_layer::vkGetInstanceProcAddr(instance, name.as_ptr()) }
        .unwrap_or_else(|| panic!("layer returned null for {:?}", name));
    unsafe { cast(pfn) }
}

/// Resolve `name` through the layer's `vkGetDeviceProcAddr`.
pub unsafe fn device_fn<T: Copy>(device: vk::Device, name: &CStr) -> T {
    let pfn = unsafe { vkshim_layer::vkGetDeviceProcAddr(device, name.as_ptr()) }
        .unwrap_or_else(|| panic!("layer returned null for {:?}", name));
    unsafe { cast(pfn) }
}

/// Address of a proc-address result, for identity comparisons.
pub fn addr(pfn: vk::PFN_vkVoidFunction) -> Option<usize> {
    pfn.map(|f| f as usize)
}

/// Create an instance through the layer on top of a fake driver built from
/// `config`.
pub fn create_instance(config: DriverConfig) -> Result<vk::Instance, vk::Result> {
    negotiate();
    match try_create_instance(config) {
        (vk::Result::SUCCESS, instance) => Ok(instance),
        (result, _) => Err(result),
    }
}

/// Run the layer's `vkCreateInstance` without negotiating first. Also returns
/// whatever handle the driver wrote, even on failure.
pub fn try_create_instance(config: DriverConfig) -> (vk::Result, vk::Instance) {
    set_driver_config(config);

    let mut link = LayerInstanceLink {
        p_next: std::ptr::null_mut(),
        pfn_next_get_instance_proc_addr: Some(fake_get_instance_proc_addr),
        pfn_next_get_physical_device_proc_addr: None,
    };
    let mut chain_info = LayerInstanceCreateInfo {
        s_type: STRUCTURE_TYPE_LOADER_INSTANCE_CREATE_INFO,
        p_next: std::ptr::null(),
        function: LayerFunction::LINK_INFO,
        u: LayerInstanceCreateInfoPayload { p_layer_info: &mut link },
    };
    let app_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_3);
    let mut create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
    create_info.p_next = &mut chain_info as *mut LayerInstanceCreateInfo as *const c_void;

    let create: vk::PFN_vkCreateInstance = unsafe { instance_fn(vk::Instance::null(), c"vkCreateInstance") };
    let mut instance = vk::Instance::null();
    let result = unsafe { create(&create_info, std::ptr::null(), &mut instance) };
    (result, instance)
}

pub fn destroy_instance(instance: vk::Instance) {
    let destroy: vk::PFN_vkDestroyInstance = unsafe { instance_fn(instance, c"vkDestroyInstance") };
    unsafe { destroy(instance, std::ptr::null()) };
}

pub fn physical_devices(instance: vk::Instance) -> Vec<vk::PhysicalDevice> {
    let enumerate: vk::PFN_vkEnumeratePhysicalDevices =
        unsafe { instance_fn(instance, c"vkEnumeratePhysicalDevices") };
    let mut count = 0;
    assert_eq!(
        unsafe { enumerate(instance, &mut count, std::ptr::null_mut()) },
        vk::Result::SUCCESS
    );
    let mut devices = vec![vk::PhysicalDevice::null(); count as usize];
    assert_eq!(
        unsafe { enumerate(instance, &mut count, devices.as_mut_ptr()) },
        vk::Result::SUCCESS
    );
    devices
}

/// Create a device through the layer. `p_next` is the application's own
/// feature chain; the loader link struct is placed in front of it.
pub fn create_device(
    instance: vk::Instance,
    physical_device: vk::PhysicalDevice,
    extensions: &[&CStr],
    p_next: *mut c_void,
) -> Result<vk::Device, vk::Result> {
    match try_create_device(instance, physical_device, extensions, p_next) {
        (vk::Result::SUCCESS, device) => Ok(device),
        (result, _) => Err(result),
    }
}

/// Like `create_device`, also returning the handle the driver wrote.
pub fn try_create_device(
    instance: vk::Instance,
    physical_device: vk::PhysicalDevice,
    extensions: &[&CStr],
    p_next: *mut c_void,
) -> (vk::Result, vk::Device) {
    let mut link = LayerDeviceLink {
        p_next: std::ptr::null_mut(),
        pfn_next_get_instance_proc_addr: Some(fake_get_instance_proc_addr),
        pfn_next_get_device_proc_addr: Some(fake_get_device_proc_addr),
    };
    let mut chain_info = LayerDeviceCreateInfo {
        s_type: STRUCTURE_TYPE_LOADER_DEVICE_CREATE_INFO,
        p_next: p_next as *const c_void,
        function: LayerFunction::LINK_INFO,
        u: LayerDeviceCreateInfoPayload { p_layer_info: &mut link },
    };
    let names: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
    let priorities = [1.0f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(0)
        .queue_priorities(&priorities);
    let mut create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_info))
        .enabled_extension_names(&names);
    create_info.p_next = &mut chain_info as *mut LayerDeviceCreateInfo as *const c_void;

    let create: vk::PFN_vkCreateDevice = unsafe { instance_fn(instance, c"vkCreateDevice") };
    let mut device = vk::Device::null();
    let result = unsafe { create(physical_device, &create_info, std::ptr::null(), &mut device) };
    // The application's chain is handed back untouched.
    assert_eq!(chain_info.p_next, p_next as *const c_void);
    (result, device)
}

pub fn destroy_device(device: vk::Device) {
    let destroy: vk::PFN_vkDestroyDevice = unsafe { device_fn(device, c"vkDestroyDevice") };
    unsafe { destroy(device, std::ptr::null()) };
}

/// An instance, its first physical device and a device on it.
pub struct TestDevice {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
}

impl TestDevice {
    pub fn new(config: DriverConfig, extensions: &[&CStr], p_next: *mut c_void) -> Self {
        let instance = create_instance(config).expect("create instance");
        let physical_device = physical_devices(instance)[0];
        let device = create_device(instance, physical_device, extensions, p_next).expect("create device");
        Self {
            instance,
            physical_device,
            device,
        }
    }

    pub fn queue(&self) -> vk::Queue {
        let get: vk::PFN_vkGetDeviceQueue = unsafe { device_fn(self.device, c"vkGetDeviceQueue") };
        let mut queue = vk::Queue::null();
        unsafe { get(self.device, 0, 0, &mut queue) };
        queue
    }

    pub fn create_pool(&self) -> vk::CommandPool {
        let create: vk::PFN_vkCreateCommandPool = unsafe { device_fn(self.device, c"vkCreateCommandPool") };
        let info = vk::CommandPoolCreateInfo::default().queue_family_index(0);
        let mut pool = vk::CommandPool::null();
        assert_eq!(
            unsafe { create(self.device, &info, std::ptr::null(), &mut pool) },
            vk::Result::SUCCESS
        );
        pool
    }

    pub fn allocate(&self, pool: vk::CommandPool, count: u32) -> Vec<vk::CommandBuffer> {
        let allocate: vk::PFN_vkAllocateCommandBuffers =
            unsafe { device_fn(self.device, c"vkAllocateCommandBuffers") };
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let mut buffers = vec![vk::CommandBuffer::null(); count as usize];
        assert_eq!(
            unsafe { allocate(self.device, &info, buffers.as_mut_ptr()) },
            vk::Result::SUCCESS
        );
        buffers
    }

    pub fn destroy(self) {
        destroy_device(self.device);
        destroy_instance(self.instance);
    }
}
