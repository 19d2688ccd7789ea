//! Rendering interface type definitions
//!
//! These are opaque types representing the native Direct3D 9 device.
//! We don't need their internal structure - just pointers.
//! The vtable is read through `framehook_engine::slots`.

use crate::address::Abi;

/// Opaque type for IDirect3DDevice9
/// The device whose EndScene and Reset entries are detoured
#[repr(C)]
pub struct IDirect3DDevice9 {
    _opaque: [u8; 0],
}

/// Opaque type for D3DPRESENT_PARAMETERS
/// Passed through to the original Reset untouched
#[repr(C)]
pub struct D3DPresentParameters {
    _opaque: [u8; 0],
}

/// COM result code
pub type HResult = i32;

/// `HRESULT IDirect3DDevice9::EndScene(this)`
pub type EndSceneFn = unsafe extern "system" fn(this: *mut IDirect3DDevice9) -> HResult;

/// `HRESULT IDirect3DDevice9::Reset(this, D3DPRESENT_PARAMETERS*)`
pub type ResetFn = unsafe extern "system" fn(
    this: *mut IDirect3DDevice9,
    params: *mut D3DPresentParameters,
) -> HResult;

/// Calling-convention tag for EndScene
pub const END_SCENE_ABI: Abi = Abi::system(1);

/// Calling-convention tag for Reset
pub const RESET_ABI: Abi = Abi::system(2);

/// Detour name of the end-of-frame hook
pub const END_SCENE_HOOK: &str = "endscene";

/// Detour name of the device-reset hook
pub const RESET_HOOK: &str = "reset";

/// `S_OK`
pub const S_OK: HResult = 0;
