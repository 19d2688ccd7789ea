//! Win32 implementation of the load-time host collaborators

use std::ffi::c_void;

use windows::core::{Interface, BOOL};
use windows::Win32::Foundation::{HWND, LPARAM};
use windows::Win32::Graphics::Direct3D9::{
    Direct3DCreate9, IDirect3D9, IDirect3DDevice9, D3DADAPTER_DEFAULT,
    D3DCREATE_DISABLE_DRIVER_MANAGEMENT, D3DCREATE_SOFTWARE_VERTEXPROCESSING, D3DDEVTYPE_NULLREF,
    D3DFMT_UNKNOWN, D3DPRESENT_PARAMETERS, D3DSWAPEFFECT_DISCARD, D3D_SDK_VERSION,
};
use windows::Win32::System::Threading::GetCurrentProcessId;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindow, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
    IsWindowVisible, GW_OWNER,
};

use framehook_core::{Host, Replacements};
use framehook_engine::{ProbeInstance, ResolveError, ResolvedSlots};
use framehook_sdk::{FunctionAddress, WindowHandle, END_SCENE_ABI, RESET_ABI};

use super::d3d9;

pub struct Win32Host;

/// Throwaway Direct3D 9 device on the null reference rasterizer
pub struct ProbeDevice {
    device: IDirect3DDevice9,
    _d3d: IDirect3D9,
}

// SAFETY: `device` stays alive as long as `self`
unsafe impl ProbeInstance for ProbeDevice {
    fn as_raw(&self) -> *const c_void {
        self.device.as_raw()
    }
}

struct WindowSearch {
    pid: u32,
    found: Option<HWND>,
}

unsafe extern "system" fn visit_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam.0 as *mut WindowSearch);

    let mut pid = 0u32;
    GetWindowThreadProcessId(hwnd, Some(&mut pid));
    if pid != search.pid || !IsWindowVisible(hwnd).as_bool() {
        return true.into();
    }

    // Top-level windows only
    if GetWindow(hwnd, GW_OWNER).is_ok_and(|owner| !owner.is_invalid()) {
        return true.into();
    }

    search.found = Some(hwnd);
    false.into()
}

impl Host for Win32Host {
    type Probe = ProbeDevice;

    fn find_main_window(&self) -> Option<WindowHandle> {
        let mut search = WindowSearch {
            pid: unsafe { GetCurrentProcessId() },
            found: None,
        };

        // Fails when the callback stops early; only `found` matters
        let _ = unsafe {
            EnumWindows(
                Some(visit_window),
                LPARAM(&mut search as *mut WindowSearch as isize),
            )
        };

        search.found.map(|hwnd| WindowHandle(hwnd.0 as usize))
    }

    fn window_title(&self, window: WindowHandle) -> Option<String> {
        let hwnd = HWND(window.0 as *mut c_void);
        let len = unsafe { GetWindowTextLengthW(hwnd) };
        if len <= 0 {
            return None;
        }

        let mut buf = vec![0u16; len as usize + 1];
        let copied = unsafe { GetWindowTextW(hwnd, &mut buf) };
        Some(String::from_utf16_lossy(&buf[..copied.max(0) as usize]))
    }

    fn create_probe_instance(&self, window: WindowHandle) -> Result<ProbeDevice, ResolveError> {
        let d3d = unsafe { Direct3DCreate9(D3D_SDK_VERSION) }
            .ok_or_else(|| ResolveError::Probe("Direct3DCreate9 returned null".to_string()))?;

        let mut params = D3DPRESENT_PARAMETERS {
            Windowed: true.into(),
            SwapEffect: D3DSWAPEFFECT_DISCARD,
            BackBufferFormat: D3DFMT_UNKNOWN,
            hDeviceWindow: HWND(window.0 as *mut c_void),
            ..Default::default()
        };

        let mut device = None;
        unsafe {
            d3d.CreateDevice(
                D3DADAPTER_DEFAULT,
                D3DDEVTYPE_NULLREF,
                params.hDeviceWindow,
                (D3DCREATE_SOFTWARE_VERTEXPROCESSING | D3DCREATE_DISABLE_DRIVER_MANAGEMENT) as _,
                &mut params,
                &mut device,
            )
        }
        .map_err(|e| ResolveError::Probe(format!("CreateDevice: {}", e)))?;

        let device =
            device.ok_or_else(|| ResolveError::Probe("CreateDevice returned no device".to_string()))?;
        tracing::debug!("Created probe device {:p}", device.as_raw());

        Ok(ProbeDevice { device, _d3d: d3d })
    }

    fn bind_originals(&self, slots: &ResolvedSlots) {
        d3d9::bind_originals(slots);
    }

    fn replacements(&self) -> Replacements {
        Replacements {
            end_of_frame: FunctionAddress::new(d3d9::end_scene as usize, END_SCENE_ABI),
            reset: FunctionAddress::new(d3d9::reset as usize, RESET_ABI),
        }
    }
}
