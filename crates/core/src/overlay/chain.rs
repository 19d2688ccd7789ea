//! Window-message middleware chain
//!
//! Handlers are stacked on top of the window's original procedure. A message
//! visits the newest handler first; the first one that claims it ends the
//! walk, otherwise it reaches the original procedure.

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};

use framehook_sdk::WindowHandle;

new_key_type! {
    /// Handle for an installed message handler
    pub struct HandlerKey;
}

/// Window message numbers the overlay reacts to
pub mod msg {
    pub const WM_KEYDOWN: u32 = 0x0100;
    pub const WM_KEYUP: u32 = 0x0101;
    pub const WM_CHAR: u32 = 0x0102;
    pub const WM_SYSKEYDOWN: u32 = 0x0104;
    pub const WM_SYSKEYUP: u32 = 0x0105;
    pub const WM_MOUSEMOVE: u32 = 0x0200;
    pub const WM_LBUTTONDOWN: u32 = 0x0201;
    pub const WM_LBUTTONUP: u32 = 0x0202;
    pub const WM_RBUTTONDOWN: u32 = 0x0204;
    pub const WM_RBUTTONUP: u32 = 0x0205;
    pub const WM_MBUTTONDOWN: u32 = 0x0207;
    pub const WM_MBUTTONUP: u32 = 0x0208;
    pub const WM_MOUSEWHEEL: u32 = 0x020A;
}

/// One message as delivered to a window procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub window: WindowHandle,
    pub msg: u32,
    pub wparam: usize,
    pub lparam: isize,
}

impl WindowMessage {
    pub fn new(window: WindowHandle, msg: u32, wparam: usize, lparam: isize) -> Self {
        Self {
            window,
            msg,
            wparam,
            lparam,
        }
    }
}

/// What a handler did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pass the message on down the chain
    Continue,
    /// Stop here and return this result to the caller
    Claimed(isize),
}

pub type MessageHandler = Box<dyn Fn(&WindowMessage) -> Disposition + Send + Sync>;

#[derive(Default)]
struct ChainInner {
    handlers: SlotMap<HandlerKey, MessageHandler>,
    /// Installation order, oldest first
    order: Vec<HandlerKey>,
}

/// Ordered list of message handlers in front of the original procedure
#[derive(Default)]
pub struct MessageChain {
    inner: RwLock<ChainInner>,
}

impl MessageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler on top of the chain
    pub fn push<F>(&self, handler: F) -> HandlerKey
    where
        F: Fn(&WindowMessage) -> Disposition + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        let key = inner.handlers.insert(Box::new(handler));
        inner.order.push(key);
        key
    }

    /// Remove a handler; returns false if it was already gone
    pub fn remove(&self, key: HandlerKey) -> bool {
        let mut inner = self.inner.write();
        if inner.handlers.remove(key).is_none() {
            return false;
        }
        inner.order.retain(|k| *k != key);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.handlers.clear();
        inner.order.clear();
    }

    /// Run `message` through the chain, ending at `terminal`
    ///
    /// `terminal` is the window's original procedure. It runs unless a
    /// handler claims the message.
    pub fn dispatch(
        &self,
        message: &WindowMessage,
        terminal: impl FnOnce(&WindowMessage) -> isize,
    ) -> isize {
        {
            let inner = self.inner.read();
            for key in inner.order.iter().rev() {
                let Some(handler) = inner.handlers.get(*key) else {
                    continue;
                };
                if let Disposition::Claimed(result) = handler(message) {
                    tracing::trace!("Message {:#x} claimed", message.msg);
                    return result;
                }
            }
        }

        terminal(message)
    }
}
