//! Window-procedure subclass
//!
//! One procedure is installed on the bound window. It runs every message
//! through the overlay's message chain and ends at the procedure that was
//! installed before it.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicIsize, Ordering};

use windows::Win32::Foundation::{GetLastError, SetLastError, HWND, LPARAM, LRESULT, WIN32_ERROR, WPARAM};
use windows::Win32::UI::Input::KeyboardAndMouse::{GetKeyState, VK_CONTROL, VK_MENU, VK_SHIFT};
use windows::Win32::UI::WindowsAndMessaging::{CallWindowProcW, DefWindowProcW, GWLP_WNDPROC, WNDPROC};

#[cfg(target_pointer_width = "64")]
use windows::Win32::UI::WindowsAndMessaging::{GetWindowLongPtrW, SetWindowLongPtrW};
#[cfg(target_pointer_width = "32")]
use windows::Win32::UI::WindowsAndMessaging::{
    GetWindowLongW as GetWindowLongPtrW, SetWindowLongW as SetWindowLongPtrW,
};

use framehook_core::overlay::{Modifiers, OverlayError, WindowMessage, WindowSubclass};
use framehook_sdk::WindowHandle;

use super::CHAIN;

/// Procedure that was installed before ours
static ORIGINAL_PROC: AtomicIsize = AtomicIsize::new(0);

unsafe extern "system" fn overlay_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let message = WindowMessage::new(WindowHandle(hwnd.0 as usize), msg, wparam.0, lparam.0);

    let dispatched = catch_unwind(AssertUnwindSafe(|| {
        CHAIN.dispatch(&message, |m| call_original(hwnd, m))
    }));
    match dispatched {
        Ok(result) => LRESULT(result),
        Err(_) => {
            tracing::error!("Panic in message chain for {:#x}", msg);
            LRESULT(call_original(hwnd, &message))
        }
    }
}

fn call_original(hwnd: HWND, message: &WindowMessage) -> isize {
    let original = ORIGINAL_PROC.load(Ordering::SeqCst);
    let (wparam, lparam) = (WPARAM(message.wparam), LPARAM(message.lparam));

    unsafe {
        if original == 0 {
            return DefWindowProcW(hwnd, message.msg, wparam, lparam).0;
        }
        let proc = std::mem::transmute::<isize, WNDPROC>(original);
        CallWindowProcW(proc, hwnd, message.msg, wparam, lparam).0
    }
}

/// Modifier state synchronized with the message being processed
pub fn key_modifiers() -> Modifiers {
    let down = |key: u16| unsafe { GetKeyState(key as i32) } < 0;

    let mut modifiers = Modifiers::empty();
    modifiers.set(Modifiers::SHIFT, down(VK_SHIFT.0));
    modifiers.set(Modifiers::CTRL, down(VK_CONTROL.0));
    modifiers.set(Modifiers::ALT, down(VK_MENU.0));
    modifiers
}

/// `GWLP_WNDPROC` swap on one window
pub struct WndProcSubclass {
    window: Option<WindowHandle>,
}

impl WndProcSubclass {
    pub fn new() -> Self {
        Self { window: None }
    }
}

impl WindowSubclass for WndProcSubclass {
    fn install(&mut self, window: WindowHandle) -> Result<(), OverlayError> {
        if let Some(current) = self.window {
            return Err(OverlayError::Window(format!(
                "already subclassing window {}",
                current
            )));
        }

        let hwnd = HWND(window.0 as *mut c_void);
        unsafe {
            // Published first so messages arriving mid-swap still chain
            let previous = GetWindowLongPtrW(hwnd, GWLP_WNDPROC) as isize;
            ORIGINAL_PROC.store(previous, Ordering::SeqCst);

            SetLastError(WIN32_ERROR(0));
            let replaced = SetWindowLongPtrW(hwnd, GWLP_WNDPROC, overlay_wnd_proc as usize as _) as isize;
            if replaced == 0 && GetLastError() != WIN32_ERROR(0) {
                ORIGINAL_PROC.store(0, Ordering::SeqCst);
                return Err(OverlayError::Window(format!(
                    "SetWindowLongPtrW failed: {:?}",
                    GetLastError()
                )));
            }
            ORIGINAL_PROC.store(replaced, Ordering::SeqCst);
        }

        self.window = Some(window);
        tracing::info!("Subclassed window {}", window);
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), OverlayError> {
        let Some(window) = self.window.take() else {
            return Ok(());
        };

        let original = ORIGINAL_PROC.load(Ordering::SeqCst);
        let hwnd = HWND(window.0 as *mut c_void);
        unsafe {
            SetLastError(WIN32_ERROR(0));
            let replaced = SetWindowLongPtrW(hwnd, GWLP_WNDPROC, original as _) as isize;
            if replaced == 0 && GetLastError() != WIN32_ERROR(0) {
                return Err(OverlayError::Window(format!(
                    "restoring window procedure failed: {:?}",
                    GetLastError()
                )));
            }
            if replaced != overlay_wnd_proc as usize as isize {
                // Someone subclassed on top of us; their chain still ends here
                tracing::warn!("Window {} was subclassed after the overlay", window);
            }
        }

        tracing::info!("Restored window procedure of {}", window);
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.window.is_some()
    }
}
