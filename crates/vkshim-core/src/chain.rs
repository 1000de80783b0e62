//! Layer-owned copies of `pNext` chains.
//!
//! Structures an application passes in are `const` and are never written.
//! To hide structs from the next link, the part of the chain in front of the
//! last hidden struct is copied node by node into layer storage and relinked;
//! the tail behind it is shared with the application unchanged.

use std::ffi::c_void;
use std::mem::size_of;

use ash::vk;
use ash::vk::TaggedStructure;

use crate::error::CoreError;

/// Size of a struct that may extend `VkDeviceCreateInfo`, for the types the
/// layer knows how to copy.
pub fn device_create_struct_size(s_type: vk::StructureType) -> Option<usize> {
    macro_rules! known {
        ($($ty:ident,)*) => {
            $(
                if s_type == <vk::$ty<'static> as TaggedStructure>::STRUCTURE_TYPE {
                    return Some(size_of::<vk::$ty<'static>>());
                }
            )*
        };
    }
    known! {
        PhysicalDeviceFeatures2,
        DeviceGroupDeviceCreateInfo,
        DevicePrivateDataCreateInfo,
        PhysicalDeviceVulkan11Features,
        PhysicalDeviceVulkan12Features,
        PhysicalDeviceVulkan13Features,
        PhysicalDevice16BitStorageFeatures,
        PhysicalDevice8BitStorageFeatures,
        PhysicalDeviceMultiviewFeatures,
        PhysicalDeviceVariablePointersFeatures,
        PhysicalDeviceProtectedMemoryFeatures,
        PhysicalDeviceSamplerYcbcrConversionFeatures,
        PhysicalDeviceShaderDrawParametersFeatures,
        PhysicalDeviceShaderAtomicInt64Features,
        PhysicalDeviceShaderFloat16Int8Features,
        PhysicalDeviceDescriptorIndexingFeatures,
        PhysicalDeviceScalarBlockLayoutFeatures,
        PhysicalDeviceImagelessFramebufferFeatures,
        PhysicalDeviceUniformBufferStandardLayoutFeatures,
        PhysicalDeviceShaderSubgroupExtendedTypesFeatures,
        PhysicalDeviceSeparateDepthStencilLayoutsFeatures,
        PhysicalDeviceHostQueryResetFeatures,
        PhysicalDeviceTimelineSemaphoreFeatures,
        PhysicalDeviceBufferDeviceAddressFeatures,
        PhysicalDeviceVulkanMemoryModelFeatures,
        PhysicalDeviceSynchronization2Features,
        PhysicalDeviceDynamicRenderingFeatures,
        PhysicalDeviceMaintenance4Features,
        PhysicalDevicePrivateDataFeatures,
        PhysicalDeviceShaderDemoteToHelperInvocationFeatures,
        PhysicalDeviceShaderTerminateInvocationFeatures,
        PhysicalDeviceTextureCompressionASTCHDRFeatures,
        PhysicalDeviceSubgroupSizeControlFeatures,
        PhysicalDeviceInlineUniformBlockFeatures,
        PhysicalDeviceZeroInitializeWorkgroupMemoryFeatures,
        PhysicalDeviceImageRobustnessFeatures,
        PhysicalDeviceShaderIntegerDotProductFeatures,
        PhysicalDevicePipelineCreationCacheControlFeatures,
        PhysicalDeviceExtendedDynamicStateFeaturesEXT,
        PhysicalDeviceRobustness2FeaturesEXT,
    }
    None
}

/// A `pNext` chain with some structs left out, built without touching the
/// original.
pub struct FilteredChain {
    // 8-byte aligned storage, one allocation per copied struct. Boxes keep
    // their address when the vector grows.
    nodes: Vec<Box<[u64]>>,
    head: *const c_void,
    omitted: Vec<vk::StructureType>,
}

impl FilteredChain {
    /// Build the filtered view of the chain starting at `head`, leaving out
    /// every struct `omit` selects. `size_of_struct` gives the size of each
    /// struct that has to be copied; a struct it does not know fails the
    /// whole filter and nothing is returned.
    ///
    /// # Safety
    /// `head` must be null or start a valid chain, and every struct in it
    /// must outlive the returned value.
    pub unsafe fn new(
        head: *const c_void,
        omit: impl Fn(vk::StructureType) -> bool,
        size_of_struct: impl Fn(vk::StructureType) -> Option<usize>,
    ) -> Result<Self, CoreError> {
        let mut original = Vec::new();
        let mut current = head as *const vk::BaseInStructure<'static>;
        while !current.is_null() {
            original.push(current);
            current = unsafe { (*current).p_next };
        }

        let Some(last) = original.iter().rposition(|&node| omit(unsafe { (*node).s_type })) else {
            return Ok(Self {
                nodes: Vec::new(),
                head,
                omitted: Vec::new(),
            });
        };

        let mut next = unsafe { (*original[last]).p_next } as *const c_void;
        let mut nodes = Vec::new();
        let mut omitted = Vec::new();
        for &node in original[..=last].iter().rev() {
            let s_type = unsafe { (*node).s_type };
            if omit(s_type) {
                omitted.push(s_type);
                continue;
            }
            let size = size_of_struct(s_type)
                .filter(|&size| size >= size_of::<vk::BaseInStructure<'static>>())
                .ok_or(CoreError::UncopyableStruct(s_type))?;
            let mut storage = vec![0u64; size.div_ceil(8)].into_boxed_slice();
            let dst = storage.as_mut_ptr() as *mut u8;
            // SAFETY: `node` points to a struct of `size` bytes and `storage`
            // holds at least as many.
            unsafe {
                std::ptr::copy_nonoverlapping(node as *const u8, dst, size);
                (*(dst as *mut vk::BaseOutStructure<'static>)).p_next = next as *mut vk::BaseOutStructure<'static>;
            }
            next = dst as *const c_void;
            nodes.push(storage);
        }
        omitted.reverse();

        Ok(Self {
            nodes,
            head: next,
            omitted,
        })
    }

    /// Head of the chain to forward.
    pub fn head(&self) -> *const c_void {
        self.head
    }

    /// Types of the structs left out, in chain order.
    pub fn omitted(&self) -> &[vk::StructureType] {
        &self.omitted
    }

    /// Number of structs copied into layer storage.
    pub fn copied(&self) -> usize {
        self.nodes.len()
    }
}
