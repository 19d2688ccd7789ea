//! Trampoline builder
//!
//! Relocates the instructions a 5-byte jump would clobber into an executable
//! slot, followed by a jump back into the original function. Slot layout:
//!
//! ```text
//! +0   relay: jmp qword [rip+2]; int3; int3; dq replacement   (x86_64 only)
//! +16  stub:  relocated prologue; jmp original+len
//! ```
//!
//! The patch at the original entry jumps to the relay on x86_64 (which can
//! reach anywhere) and straight to the replacement on x86.

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock, OpKind,
};

use framehook_sdk::FunctionAddress;

use super::alloc::{self, ExecSlot, SLOT_SIZE};
use super::error::HookError;
use super::patch::{self, JMP_REL32_LEN};

/// Bytes read from the original entry when decoding
const MAX_PROLOGUE: usize = 32;

/// Bytes reserved for the relay at the start of each slot
const RELAY_LEN: usize = 16;

/// Offset of the absolute target inside the relay
#[cfg(target_arch = "x86_64")]
const RELAY_TARGET_OFFSET: usize = 8;

#[cfg(target_arch = "x86_64")]
const BITNESS: u32 = 64;
#[cfg(target_arch = "x86")]
const BITNESS: u32 = 32;

/// Relocated prologue of one function plus everything needed to patch and
/// restore its entry
#[derive(Debug)]
pub struct Trampoline {
    /// Original function entry
    target: FunctionAddress,

    /// Executable slot holding relay and stub
    slot: ExecSlot,

    /// Number of prologue bytes relocated into the stub
    prologue_len: usize,

    /// Entry bytes overwritten by the patch
    saved: [u8; JMP_REL32_LEN],

    /// Address the patched entry jumps to, once a replacement is set
    redirect: Option<usize>,

    /// Whether the entry currently carries the patch
    patched: bool,
}

impl Trampoline {
    /// Build a trampoline for `original`
    ///
    /// Nothing at `original` is modified; see [`Trampoline::patch_entry`].
    ///
    /// # Safety
    /// `original` must point at the entry of a function with at least
    /// `MAX_PROLOGUE` readable bytes.
    pub unsafe fn build(original: FunctionAddress) -> Result<Self, HookError> {
        if original.is_null() {
            return Err(HookError::AddressUnresolved(
                "trampoline target is null".to_string(),
            ));
        }

        let start = original.as_usize();
        let code = std::slice::from_raw_parts(start as *const u8, MAX_PROLOGUE);
        let prologue = decode_prologue(start, code)?;

        let slot = alloc::alloc_slot(start).ok_or(HookError::Allocation(start))?;
        let stub_ip = slot.address() + RELAY_LEN;

        let mut instructions = prologue.instructions;
        if !prologue.terminates {
            let back = Instruction::with_branch(jmp_code(), (start + prologue.len) as u64)
                .map_err(|e| HookError::too_small(start, e.to_string()))?;
            instructions.push(back);
        }

        let block = InstructionBlock::new(&instructions, stub_ip as u64);
        let encoded = BlockEncoder::encode(BITNESS, block, BlockEncoderOptions::NONE)
            .map_err(|e| HookError::too_small(start, format!("relocation failed: {}", e)))?;
        let stub = encoded.code_buffer;

        if stub.len() > SLOT_SIZE - RELAY_LEN {
            return Err(HookError::too_small(
                start,
                format!("relocated prologue needs {} bytes", stub.len()),
            ));
        }

        std::ptr::copy_nonoverlapping(stub.as_ptr(), stub_ip as *mut u8, stub.len());

        let mut saved = [0u8; JMP_REL32_LEN];
        saved.copy_from_slice(&code[..JMP_REL32_LEN]);

        tracing::debug!(
            "Built trampoline for {} at {:x} ({} prologue bytes, {} stub bytes)",
            original,
            stub_ip,
            prologue.len,
            stub.len()
        );

        Ok(Self {
            target: original,
            slot,
            prologue_len: prologue.len,
            saved,
            redirect: None,
            patched: false,
        })
    }

    /// Callable address that behaves like the unpatched original
    pub fn entry(&self) -> FunctionAddress {
        FunctionAddress::new(self.slot.address() + RELAY_LEN, self.target.abi())
    }

    pub fn target(&self) -> FunctionAddress {
        self.target
    }

    pub fn prologue_len(&self) -> usize {
        self.prologue_len
    }

    pub fn is_patched(&self) -> bool {
        self.patched
    }

    /// Point the redirection at `replacement`
    ///
    /// Returns the address the patched entry will jump to.
    pub fn redirect_to(&mut self, replacement: FunctionAddress) -> Result<usize, HookError> {
        if replacement.is_null() {
            return Err(HookError::AddressUnresolved(
                "replacement is null".to_string(),
            ));
        }

        #[cfg(target_arch = "x86_64")]
        let redirect = {
            let relay = self.slot.address();
            // jmp qword ptr [rip+2]
            let head: [u8; RELAY_TARGET_OFFSET] = [0xFF, 0x25, 0x02, 0x00, 0x00, 0x00, 0xCC, 0xCC];
            unsafe {
                std::ptr::copy_nonoverlapping(head.as_ptr(), relay as *mut u8, head.len());
                patch::store_slot_word(relay + RELAY_TARGET_OFFSET, replacement.as_usize());
            }
            relay
        };

        #[cfg(target_arch = "x86")]
        let redirect = replacement.as_usize();

        self.redirect = Some(redirect);
        Ok(redirect)
    }

    /// Overwrite the original entry with a jump to the redirect address
    ///
    /// # Safety
    /// The replacement set by [`Trampoline::redirect_to`] must be callable
    /// with the original's signature.
    pub unsafe fn patch_entry(&mut self) -> Result<(), HookError> {
        let start = self.target.as_usize();
        let redirect = self.redirect.ok_or_else(|| {
            HookError::AddressUnresolved(format!("no replacement set for {:#x}", start))
        })?;

        let jump = patch::jmp_rel32(start, redirect)
            .ok_or_else(|| HookError::too_small(start, "redirect out of rel32 range"))?;

        if !patch::is_atomic_write(start, jump.len()) {
            tracing::warn!(
                "Entry {:#x} straddles an 8-byte word; patch is not a single atomic store",
                start
            );
        }

        patch::write_code(start, &jump)?;
        self.patched = true;
        tracing::trace!("Patched {:x} -> {:x}", start, redirect);
        Ok(())
    }

    /// Put the saved entry bytes back
    ///
    /// # Safety
    /// The original function's module must still be mapped.
    pub unsafe fn restore_entry(&mut self) -> Result<(), HookError> {
        if !self.patched {
            return Ok(());
        }

        patch::write_code(self.target.as_usize(), &self.saved)?;
        self.patched = false;
        tracing::trace!("Restored entry bytes at {}", self.target);
        Ok(())
    }

    /// Rewire the slot so anything still inside it lands on the original entry
    fn retire(&mut self) {
        let start = self.target.as_usize();

        #[cfg(target_arch = "x86_64")]
        if self.redirect.is_some() {
            unsafe { patch::store_slot_word(self.slot.address() + RELAY_TARGET_OFFSET, start) };
        }

        let stub = self.slot.address() + RELAY_LEN;
        if let Some(jump) = patch::jmp_rel32(stub, start) {
            unsafe {
                if let Err(e) = patch::write_code(stub, &jump) {
                    tracing::warn!("Failed to retire trampoline stub {:x}: {}", stub, e);
                }
            }
        }
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        if self.patched {
            // Unreachable through DetourRecord, which restores before dropping
            if let Err(e) = unsafe { self.restore_entry() } {
                tracing::error!("Failed to restore {} on drop: {}", self.target, e);
            }
        }
        self.retire();
    }
}

/// Decoded prologue covering at least [`JMP_REL32_LEN`] bytes
struct Prologue {
    instructions: Vec<Instruction>,
    len: usize,
    /// The last instruction never falls through
    terminates: bool,
}

fn decode_prologue(start: usize, code: &[u8]) -> Result<Prologue, HookError> {
    let mut decoder = Decoder::with_ip(BITNESS, code, start as u64, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut len = 0usize;
    let mut terminates = false;

    while len < JMP_REL32_LEN {
        if !decoder.can_decode() {
            return Err(HookError::too_small(start, "ran out of prologue bytes"));
        }

        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(HookError::too_small(
                start,
                format!("undecodable instruction at {:#x}", instr.ip()),
            ));
        }

        len += instr.len();
        terminates = ends_flow(&instr);
        instructions.push(instr);

        if terminates && len < JMP_REL32_LEN {
            // The function is shorter than the patch; only padding may follow
            if code[len..JMP_REL32_LEN].iter().all(|&b| b == 0xCC || b == 0x90) {
                len = JMP_REL32_LEN;
            } else {
                return Err(HookError::too_small(
                    start,
                    format!("function ends after {} bytes", len),
                ));
            }
        }
    }

    let patched = start as u64..(start + len) as u64;
    for instr in &instructions {
        if is_near_branch(instr) && patched.contains(&instr.near_branch_target()) {
            return Err(HookError::too_small(
                start,
                format!(
                    "branch at {:#x} targets patched byte {:#x}",
                    instr.ip(),
                    instr.near_branch_target()
                ),
            ));
        }
    }

    Ok(Prologue {
        instructions,
        len,
        terminates,
    })
}

fn ends_flow(instr: &Instruction) -> bool {
    matches!(
        instr.flow_control(),
        FlowControl::Return
            | FlowControl::UnconditionalBranch
            | FlowControl::IndirectBranch
            | FlowControl::Interrupt
            | FlowControl::Exception
    )
}

fn is_near_branch(instr: &Instruction) -> bool {
    matches!(
        instr.op0_kind(),
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
    )
}

fn jmp_code() -> Code {
    if BITNESS == 64 {
        Code::Jmp_rel32_64
    } else {
        Code::Jmp_rel32_32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framehook_sdk::Abi;

    fn decode(bytes: &[u8]) -> Result<Prologue, HookError> {
        let mut code = bytes.to_vec();
        code.resize(MAX_PROLOGUE, 0xCC);
        decode_prologue(0x1000, &code)
    }

    #[test]
    fn test_decodes_until_patch_covered() {
        // push rbp/ebp; mov ebp, esp (2 bytes); sub esp, 0x20 (3 bytes)
        let prologue = decode(&[0x55, 0x89, 0xE5, 0x83, 0xEC, 0x20, 0xC3]).unwrap();
        assert_eq!(prologue.instructions.len(), 3);
        assert_eq!(prologue.len, 6);
        assert!(!prologue.terminates);
    }

    #[test]
    fn test_short_function_with_padding() {
        // xor eax, eax; ret; int3 padding
        let prologue = decode(&[0x31, 0xC0, 0xC3, 0xCC, 0xCC]).unwrap();
        assert_eq!(prologue.len, JMP_REL32_LEN);
        assert!(prologue.terminates);
    }

    #[test]
    fn test_short_function_without_padding() {
        // xor eax, eax; ret; followed by the next function
        let err = decode(&[0x31, 0xC0, 0xC3, 0x55, 0x89]).err().unwrap();
        assert!(matches!(err, HookError::PatchTooSmall { address: 0x1000, .. }));
    }

    #[test]
    fn test_branch_into_patched_range() {
        // nop; jmp short -3 (back onto the nop); more bytes
        let err = decode(&[0x90, 0xEB, 0xFD, 0x90, 0x90, 0x90]).err().unwrap();
        assert!(matches!(err, HookError::PatchTooSmall { .. }));
    }

    #[test]
    fn test_invalid_instruction() {
        // FF /7 is undefined
        let err = decode(&[0xFF, 0xFF, 0x90, 0x90, 0x90]).err().unwrap();
        assert!(matches!(err, HookError::PatchTooSmall { .. }));
    }

    #[test]
    fn test_null_target() {
        let err = unsafe { Trampoline::build(FunctionAddress::null(Abi::cdecl(0))) }.unwrap_err();
        assert!(matches!(err, HookError::AddressUnresolved(_)));
    }

    #[inline(never)]
    extern "C" fn scaled(x: u64) -> u64 {
        let a = std::hint::black_box(x);
        let b = std::hint::black_box(3u64);
        a.wrapping_mul(b).wrapping_add(std::hint::black_box(11))
    }

    #[test]
    fn test_trampoline_behaves_like_original() {
        let original = FunctionAddress::from_ptr(scaled as *const (), Abi::cdecl(1));
        let trampoline = unsafe { Trampoline::build(original) }.unwrap();

        assert!(trampoline.prologue_len() >= JMP_REL32_LEN);
        assert!(!trampoline.is_patched());

        let call: extern "C" fn(u64) -> u64 = unsafe { trampoline.entry().cast() };
        assert_eq!(call(5), scaled(5));
        assert_eq!(call(0), 11);
    }
}
