//! Direct3D 9 overlay backend
//!
//! Draws a translucent status panel and a cursor marker with pre-transformed
//! vertices. The only device resource is a dynamic vertex buffer in the
//! default pool, which must be released before the device resets.

use std::ffi::c_void;
use std::{mem, ptr};

use windows::Win32::Foundation::{HWND, POINT, RECT};
use windows::Win32::Graphics::Direct3D9::*;
use windows::Win32::Graphics::Gdi::ScreenToClient;
use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, GetCursorPos};

use framehook_core::overlay::{OverlayBackend, OverlayError};
use framehook_sdk::WindowHandle;

#[derive(Clone, Copy)]
#[repr(C)]
struct Vertex {
    pos: (f32, f32),
    pos_z: f32,
    rhw: f32,
    color: u32,
}

impl Vertex {
    const FVF: u32 = D3DFVF_XYZRHW | D3DFVF_DIFFUSE;

    const fn new(x: f32, y: f32, color: u32) -> Self {
        Self {
            pos: (x, y),
            pos_z: 0.0,
            rhw: 1.0,
            color,
        }
    }
}

/// Two triangles each for panel, accent bar and cursor
const VERTEX_CAPACITY: usize = 18;

const PANEL_ORIGIN: (f32, f32) = (12.0, 12.0);
const PANEL_SIZE: (f32, f32) = (240.0, 64.0);
const ACCENT_HEIGHT: f32 = 4.0;
const CURSOR_SIZE: f32 = 6.0;

// ARGB
const PANEL_COLOR: u32 = 0xB0_10_14_1C;
const ACCENT_COLOR: u32 = 0xFF_3C_B4_FF;
const CURSOR_COLOR: u32 = 0xE0_FF_FF_FF;

/// Fixed state for drawing untextured 2-D triangles
const RENDER_STATES: &[(D3DRENDERSTATETYPE, u32)] = &[
    (D3DRS_FILLMODE, D3DFILL_SOLID.0 as u32),
    (D3DRS_SHADEMODE, D3DSHADE_GOURAUD.0 as u32),
    (D3DRS_ZENABLE, D3DZB_FALSE.0 as u32),
    (D3DRS_ZWRITEENABLE, 0),
    (D3DRS_ALPHATESTENABLE, 0),
    (D3DRS_CULLMODE, D3DCULL_NONE.0 as u32),
    (D3DRS_SRGBWRITEENABLE, 0),
    (D3DRS_ALPHABLENDENABLE, 1),
    (D3DRS_BLENDOP, D3DBLENDOP_ADD.0 as u32),
    (D3DRS_SRCBLEND, D3DBLEND_SRCALPHA.0 as u32),
    (D3DRS_DESTBLEND, D3DBLEND_INVSRCALPHA.0 as u32),
    (D3DRS_SEPARATEALPHABLENDENABLE, 1),
    (D3DRS_SRCBLENDALPHA, D3DBLEND_ONE.0 as u32),
    (D3DRS_DESTBLENDALPHA, D3DBLEND_INVSRCALPHA.0 as u32),
    (D3DRS_SCISSORTESTENABLE, 0),
    (D3DRS_FOGENABLE, 0),
    (D3DRS_RANGEFOGENABLE, 0),
    (D3DRS_SPECULARENABLE, 0),
    (D3DRS_STENCILENABLE, 0),
    (D3DRS_CLIPPING, 1),
    (D3DRS_LIGHTING, 0),
];

pub struct Dx9Backend {
    vertex_buffer: Option<IDirect3DVertexBuffer9>,
    window: Option<WindowHandle>,
}

// Only touched from the render thread, or after the detours drained
unsafe impl Send for Dx9Backend {}

impl Dx9Backend {
    pub fn new() -> Self {
        Self {
            vertex_buffer: None,
            window: None,
        }
    }

    fn cursor_in_client(&self) -> Option<(f32, f32)> {
        let hwnd = hwnd(self.window?);
        let mut point = POINT::default();
        unsafe {
            GetCursorPos(&mut point).ok()?;
            if !ScreenToClient(hwnd, &mut point).as_bool() {
                return None;
            }
        }
        Some((point.x as f32, point.y as f32))
    }
}

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as *mut c_void)
}

fn borrow(raw: &*mut c_void) -> Result<&IDirect3DDevice9, OverlayError> {
    unsafe { IDirect3DDevice9::from_raw_borrowed(raw) }
        .ok_or_else(|| OverlayError::Init("null device".to_string()))
}

fn state_failure(what: &str) -> impl FnOnce(windows::core::Error) -> OverlayError + '_ {
    move |e| OverlayError::RenderStateFailure(format!("{}: {}", what, e))
}

fn draw_failure(what: &str) -> impl FnOnce(windows::core::Error) -> OverlayError + '_ {
    move |e| OverlayError::Draw(format!("{}: {}", what, e))
}

fn push_rect(vertices: &mut Vec<Vertex>, (x, y): (f32, f32), (w, h): (f32, f32), color: u32) {
    let (l, t, r, b) = (x, y, x + w, y + h);
    vertices.extend_from_slice(&[
        Vertex::new(l, t, color),
        Vertex::new(r, t, color),
        Vertex::new(l, b, color),
        Vertex::new(r, t, color),
        Vertex::new(r, b, color),
        Vertex::new(l, b, color),
    ]);
}

impl OverlayBackend for Dx9Backend {
    type Device = *mut c_void;
    type Snapshot = IDirect3DStateBlock9;

    fn window_for(&mut self, device: *mut c_void) -> Result<WindowHandle, OverlayError> {
        let device = borrow(&device)?;
        let mut params = D3DDEVICE_CREATION_PARAMETERS::default();
        unsafe { device.GetCreationParameters(&mut params) }
            .map_err(|e| OverlayError::Window(format!("GetCreationParameters: {}", e)))?;

        if params.hFocusWindow.is_invalid() {
            return Err(OverlayError::Window("device has no focus window".to_string()));
        }
        Ok(WindowHandle(params.hFocusWindow.0 as usize))
    }

    fn device_ready(&mut self, device: *mut c_void) -> Result<(), OverlayError> {
        unsafe { borrow(&device)?.TestCooperativeLevel() }.map_err(|_| OverlayError::DeviceLost)
    }

    #[tracing::instrument(skip(self, device))]
    fn init(&mut self, device: *mut c_void, window: WindowHandle) -> Result<(), OverlayError> {
        let device = borrow(&device)?;

        let mut vertex_buffer = None;
        unsafe {
            device.CreateVertexBuffer(
                (mem::size_of::<Vertex>() * VERTEX_CAPACITY) as u32,
                (D3DUSAGE_WRITEONLY | D3DUSAGE_DYNAMIC) as _,
                Vertex::FVF,
                D3DPOOL_DEFAULT,
                &mut vertex_buffer,
                ptr::null_mut(),
            )
        }
        .map_err(|e| OverlayError::Init(format!("CreateVertexBuffer: {}", e)))?;

        self.vertex_buffer = Some(
            vertex_buffer.ok_or_else(|| OverlayError::Init("no vertex buffer".to_string()))?,
        );
        self.window = Some(window);

        tracing::debug!("Direct3D 9 resources created");
        Ok(())
    }

    fn capture_state(&mut self, device: *mut c_void) -> Result<IDirect3DStateBlock9, OverlayError> {
        unsafe { borrow(&device)?.CreateStateBlock(D3DSBT_ALL) }
            .map_err(state_failure("CreateStateBlock"))
    }

    fn apply_baseline(&mut self, device: *mut c_void, window: WindowHandle) -> Result<(), OverlayError> {
        let device = borrow(&device)?;

        let mut rect = RECT::default();
        unsafe { GetClientRect(hwnd(window), &mut rect) }
            .map_err(|e| OverlayError::Window(format!("GetClientRect: {}", e)))?;

        unsafe {
            device
                .SetViewport(&D3DVIEWPORT9 {
                    X: 0,
                    Y: 0,
                    Width: (rect.right - rect.left).max(0) as u32,
                    Height: (rect.bottom - rect.top).max(0) as u32,
                    MinZ: 0.0,
                    MaxZ: 1.0,
                })
                .map_err(state_failure("SetViewport"))?;
            device.SetPixelShader(None).map_err(state_failure("SetPixelShader"))?;
            device.SetVertexShader(None).map_err(state_failure("SetVertexShader"))?;

            for &(state, value) in RENDER_STATES {
                device
                    .SetRenderState(state, value)
                    .map_err(state_failure("SetRenderState"))?;
            }

            let stage_states = [
                (0, D3DTSS_COLOROP, D3DTOP_SELECTARG1.0 as u32),
                (0, D3DTSS_COLORARG1, D3DTA_DIFFUSE),
                (0, D3DTSS_ALPHAOP, D3DTOP_SELECTARG1.0 as u32),
                (0, D3DTSS_ALPHAARG1, D3DTA_DIFFUSE),
                (1, D3DTSS_COLOROP, D3DTOP_DISABLE.0 as u32),
                (1, D3DTSS_ALPHAOP, D3DTOP_DISABLE.0 as u32),
            ];
            for (stage, state, value) in stage_states {
                device
                    .SetTextureStageState(stage, state, value)
                    .map_err(state_failure("SetTextureStageState"))?;
            }

            device
                .SetSamplerState(0, D3DSAMP_MINFILTER, D3DTEXF_LINEAR.0 as _)
                .map_err(state_failure("SetSamplerState"))?;
            device
                .SetSamplerState(0, D3DSAMP_MAGFILTER, D3DTEXF_LINEAR.0 as _)
                .map_err(state_failure("SetSamplerState"))?;
            device.SetTexture(0, None).map_err(state_failure("SetTexture"))?;
            device.SetFVF(Vertex::FVF).map_err(state_failure("SetFVF"))?;
        }

        Ok(())
    }

    fn draw(&mut self, device: *mut c_void) -> Result<(), OverlayError> {
        let device = borrow(&device)?;
        let Some(vertex_buffer) = self.vertex_buffer.as_ref() else {
            return Err(OverlayError::Draw("resources not created".to_string()));
        };

        let mut vertices = Vec::with_capacity(VERTEX_CAPACITY);
        push_rect(&mut vertices, PANEL_ORIGIN, PANEL_SIZE, PANEL_COLOR);
        push_rect(
            &mut vertices,
            PANEL_ORIGIN,
            (PANEL_SIZE.0, ACCENT_HEIGHT),
            ACCENT_COLOR,
        );
        if let Some((x, y)) = self.cursor_in_client() {
            let half = CURSOR_SIZE / 2.0;
            push_rect(
                &mut vertices,
                (x - half, y - half),
                (CURSOR_SIZE, CURSOR_SIZE),
                CURSOR_COLOR,
            );
        }

        unsafe {
            let mut buf = ptr::null_mut();
            let bytes = mem::size_of_val(vertices.as_slice());
            vertex_buffer
                .Lock(0, bytes as u32, &mut buf, D3DLOCK_DISCARD as _)
                .map_err(draw_failure("Lock"))?;
            ptr::copy_nonoverlapping(vertices.as_ptr(), buf.cast::<Vertex>(), vertices.len());
            vertex_buffer.Unlock().map_err(draw_failure("Unlock"))?;

            device
                .SetStreamSource(0, vertex_buffer, 0, mem::size_of::<Vertex>() as u32)
                .map_err(draw_failure("SetStreamSource"))?;
            device
                .DrawPrimitive(D3DPT_TRIANGLELIST, 0, (vertices.len() / 3) as u32)
                .map_err(draw_failure("DrawPrimitive"))?;
        }

        tracing::trace!("Overlay drew {} vertices", vertices.len());
        Ok(())
    }

    fn restore_state(
        &mut self,
        _device: *mut c_void,
        snapshot: IDirect3DStateBlock9,
    ) -> Result<(), OverlayError> {
        unsafe { snapshot.Apply() }.map_err(state_failure("Apply"))
    }

    fn invalidate(&mut self) {
        if self.vertex_buffer.take().is_some() {
            tracing::debug!("Direct3D 9 resources released");
        }
    }

    fn shutdown(&mut self) {
        self.invalidate();
        self.window = None;
    }
}
