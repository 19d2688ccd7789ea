//! Function addresses and window handles
//!
//! A [`FunctionAddress`] is an opaque machine address carrying only a
//! calling-convention tag. It is never dereferenced here; callers go through
//! [`FunctionAddress::cast`] to obtain a typed function pointer.

use std::fmt;

/// Calling conventions a detour may be installed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convention {
    /// `extern "C"`
    Cdecl,
    /// `extern "stdcall"` (callee cleans the stack, x86)
    Stdcall,
    /// `extern "thiscall"` (`this` in ECX, x86)
    Thiscall,
    /// `extern "system"`: stdcall on x86 Windows, the platform C ABI elsewhere
    System,
}

/// Calling-convention tag attached to a [`FunctionAddress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Abi {
    pub convention: Convention,
    /// Number of machine-word arguments, including `this` for methods
    pub args: u8,
}

impl Abi {
    pub const fn new(convention: Convention, args: u8) -> Self {
        Self { convention, args }
    }

    pub const fn system(args: u8) -> Self {
        Self::new(Convention::System, args)
    }

    pub const fn cdecl(args: u8) -> Self {
        Self::new(Convention::Cdecl, args)
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.convention {
            Convention::Cdecl => "cdecl",
            Convention::Stdcall => "stdcall",
            Convention::Thiscall => "thiscall",
            Convention::System => "system",
        };
        write!(f, "{}, {} args", name, self.args)
    }
}

/// An untyped code address tagged with its calling convention
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionAddress {
    addr: usize,
    abi: Abi,
}

impl FunctionAddress {
    pub const fn new(addr: usize, abi: Abi) -> Self {
        Self { addr, abi }
    }

    /// Wrap a raw pointer (function pointers cast with `as *const ()`)
    pub fn from_ptr(ptr: *const (), abi: Abi) -> Self {
        Self::new(ptr as usize, abi)
    }

    pub const fn null(abi: Abi) -> Self {
        Self::new(0, abi)
    }

    pub const fn as_usize(&self) -> usize {
        self.addr
    }

    pub fn as_ptr(&self) -> *const () {
        self.addr as *const ()
    }

    pub const fn abi(&self) -> Abi {
        self.abi
    }

    pub const fn is_null(&self) -> bool {
        self.addr == 0
    }

    /// Same address with a different tag
    pub const fn with_abi(self, abi: Abi) -> Self {
        Self::new(self.addr, abi)
    }

    /// Reinterpret as a typed function pointer
    ///
    /// # Safety
    /// `F` must be a function pointer type whose signature and ABI match the
    /// code at this address, and the address must be non-null.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        std::mem::transmute_copy::<usize, F>(&self.addr)
    }
}

impl fmt::Debug for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionAddress({:#x}, {})", self.addr, self.abi)
    }
}

impl fmt::Display for FunctionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr)
    }
}

/// Native window handle (HWND value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub usize);

impl WindowHandle {
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn add_one(x: u32) -> u32 {
        x + 1
    }

    #[test]
    fn test_cast_roundtrips_function_pointer() {
        let addr = FunctionAddress::from_ptr(add_one as *const (), Abi::cdecl(1));
        assert!(!addr.is_null());

        let f: extern "C" fn(u32) -> u32 = unsafe { addr.cast() };
        assert_eq!(f(41), 42);
    }

    #[test]
    fn test_abi_display() {
        let abi = Abi::new(Convention::Stdcall, 2);
        assert_eq!(abi.to_string(), "stdcall, 2 args");
    }

    #[test]
    fn test_null_address() {
        let addr = FunctionAddress::null(Abi::system(1));
        assert!(addr.is_null());
        assert_eq!(format!("{}", addr), "0x0");
    }
}
