//! C-compatible exports called by the launcher
//!
//! Both exports catch every error and panic and convert it to the integer
//! return code; nothing unwinds into the host.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::instrument;

use framehook_core::config::framehook_base_dir;
use framehook_core::{FramehookConfig, RuntimeError};

use crate::{logging, platform};

/// Return code for success
pub const SUCCESS: u32 = 0;

/// Return code for failure; details are in the log
pub const FAILURE: u32 = 1;

/// Install both detours on the host's Direct3D 9 device
///
/// Installs nothing on failure.
#[no_mangle]
#[allow(non_snake_case)]
#[instrument(skip_all)]
pub extern "C" fn Load() -> u32 {
    match catch_unwind(AssertUnwindSafe(load_module)) {
        Ok(Ok(())) => {
            tracing::info!("framehook loaded");
            SUCCESS
        }
        Ok(Err(e)) => {
            tracing::error!("Load failed: {}", e);
            FAILURE
        }
        Err(_) => {
            tracing::error!("Panic during load");
            FAILURE
        }
    }
}

/// Remove both detours and tear the overlay down
///
/// Every cleanup step is attempted even if an earlier one fails.
#[no_mangle]
#[allow(non_snake_case)]
#[instrument(skip_all)]
pub extern "C" fn Unload() -> u32 {
    tracing::info!("framehook unloading...");

    match catch_unwind(AssertUnwindSafe(platform::unload)) {
        Ok(Ok(())) => {
            tracing::info!("framehook unloaded");
            SUCCESS
        }
        Ok(Err(e)) => {
            tracing::error!("Unload finished with errors: {}", e);
            FAILURE
        }
        Err(_) => {
            tracing::error!("Panic during unload");
            FAILURE
        }
    }
}

fn load_module() -> Result<(), RuntimeError> {
    let config = FramehookConfig::load();
    logging::init(config.as_ref().ok());
    let config = config?;

    tracing::info!("framehook loading (layout '{}')...", config.interface_layout);
    tracing::info!("Loader thread ID: {:?}", std::thread::current().id());

    let base = framehook_base_dir()?;
    let layouts = config.layout_table(&base)?;

    platform::load(&config, &layouts)
}
