//! Executable memory.
//!
//! The buffer is mapped writable, the code is copied in, and the mapping is
//! then re-protected read+execute. Unmapped on drop.

use tang_core::context::ExecutionContext;
use tang_core::value::Value;

/// Entry point of a compiled program. The context pointer arrives in `rdi`;
/// the result value is returned in `rax`.
pub type NativeEntry = unsafe extern "C" fn(*mut ExecutionContext) -> *mut Value;

pub struct ExecutableMemory {
    ptr: *mut u8,
    len: usize,
}

// The mapping is immutable once protected read+execute.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    /// Map, copy and protect. `None` if the kernel refuses either step.
    pub fn new(code: &[u8]) -> Option<Self> {
        if code.is_empty() {
            return None;
        }
        let len = code.len();
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return None;
            }
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.cast::<u8>(), len);
            if libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                libc::munmap(ptr, len);
                return None;
            }
            Some(ExecutableMemory {
                ptr: ptr.cast::<u8>(),
                len,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The program entry point at offset zero.
    pub fn entry(&self) -> NativeEntry {
        // Safety: the mapping holds a complete function emitted by the
        // native generator and is protected read+execute.
        unsafe { std::mem::transmute::<*mut u8, NativeEntry>(self.ptr) }
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_executes() {
        // mov rax, rdi; ret — the identity function.
        let code = [0x48, 0x89, 0xF8, 0xC3];
        let memory = ExecutableMemory::new(&code).unwrap();
        let f = memory.entry();
        let mut context = ExecutionContext::new();
        let ctx: *mut ExecutionContext = &mut context;
        let result = unsafe { f(ctx) };
        assert_eq!(result.cast::<ExecutionContext>(), ctx);
    }
}
