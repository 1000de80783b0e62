//! Helpers for the fixed-size and pointer-array C strings used throughout the
//! Vulkan ABI.

use std::ffi::{c_char, CStr};

/// View a fixed-size, NUL-terminated char array (e.g. `extensionName`) as a
/// `CStr`. Returns `None` if the array holds no terminator.
pub fn fixed_to_cstr(chars: &[c_char]) -> Option<&CStr> {
    let bytes: &[u8] = bytemuck::cast_slice(chars);
    CStr::from_bytes_until_nul(bytes).ok()
}

/// Copy `src` into a fixed-size char array, truncating if needed. The result
/// is always NUL-terminated.
pub fn write_fixed(src: impl AsRef<[u8]>, dst: &mut [c_char]) {
    if dst.is_empty() {
        return;
    }
    let src = src.as_ref();
    let len = std::cmp::min(src.len(), dst.len() - 1);
    let out: &mut [u8] = bytemuck::cast_slice_mut(dst);
    out[..len].copy_from_slice(&src[..len]);
    out[len] = 0;
}

/// Read a `const char* const*` array such as `ppEnabledExtensionNames`.
/// Null entries are skipped.
///
/// # Safety
/// `ptrs` must be null or point to `count` pointers, each null or pointing to
/// a NUL-terminated string that outlives `'a`.
pub unsafe fn read_cstr_array<'a>(ptrs: *const *const c_char, count: u32) -> Vec<&'a CStr> {
    if ptrs.is_null() || count == 0 {
        return Vec::new();
    }
    (0..count as usize)
        .filter_map(|i| {
            let ptr = unsafe { *ptrs.add(i) };
            if ptr.is_null() {
                None
            } else {
                Some(unsafe { CStr::from_ptr(ptr) })
            }
        })
        .collect()
}
