//! Executable and data memory blocks, and entrypoint invocation.
//!
//! [`ExecBlock`] owns an anonymous, private mapping with read, write and
//! execute permission; [`DataBlock`] wraps an ordinary heap allocation
//! behind the same byte-level interface. [`MachineCodeBlock`] is an
//! assembled code block serialized into executable memory together with its
//! required-site table for the linker.
//!
//! Freeing a block invalidates every address previously derived from it;
//! invoking an entrypoint after free is undefined behavior, which is why
//! [`ExecBlock::invoke`] is `unsafe`.

use std::rc::Rc;

use crate::addr::Addr;
use crate::block::CodeBlock;
use crate::error::AsmError;
use crate::linker::RequiredSite;
use crate::runtime::{RuntimeContext, Word};

/// Byte-level access shared by executable and data blocks.
pub trait ByteBlock {
    /// Host pointer to the first byte. Stable for the block's lifetime.
    fn base_ptr(&self) -> *const u8;

    /// Mutable host pointer to the first byte.
    fn base_ptr_mut(&mut self) -> *mut u8;

    /// Block length in bytes.
    fn len(&self) -> usize;

    /// Whether the block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the byte at `offset`.
    ///
    /// # Errors
    ///
    /// [`AsmError::OutOfBounds`] when `offset` is past the end.
    fn read_byte(&self, offset: usize) -> Result<u8, AsmError> {
        if offset >= self.len() {
            return Err(AsmError::OutOfBounds {
                offset,
                len: self.len(),
            });
        }
        Ok(unsafe { *self.base_ptr().add(offset) })
    }

    /// Write the byte at `offset`.
    ///
    /// # Errors
    ///
    /// [`AsmError::OutOfBounds`] when `offset` is past the end.
    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), AsmError> {
        if offset >= self.len() {
            return Err(AsmError::OutOfBounds {
                offset,
                len: self.len(),
            });
        }
        unsafe { *self.base_ptr_mut().add(offset) = value };
        Ok(())
    }

    /// Write `bytes` starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`AsmError::OutOfBounds`] when the write would leave the block.
    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), AsmError> {
        let end = offset.checked_add(bytes.len()).ok_or(AsmError::OutOfBounds {
            offset,
            len: self.len(),
        })?;
        if end > self.len() {
            return Err(AsmError::OutOfBounds {
                offset: end,
                len: self.len(),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base_ptr_mut().add(offset), bytes.len());
        }
        Ok(())
    }

    /// Host address of the byte at `offset`, at host word width.
    ///
    /// # Errors
    ///
    /// [`AsmError::OutOfBounds`] when `offset` indexes past the end.
    fn addr(&self, offset: usize) -> Result<Addr, AsmError> {
        if offset >= self.len() {
            return Err(AsmError::OutOfBounds {
                offset,
                len: self.len(),
            });
        }
        Addr::from_u64(self.base_ptr() as usize as u64 + offset as u64, usize::BITS)
    }
}

// ─── ExecBlock ─────────────────────────────────────────────

/// An anonymous, private, page-aligned memory region with read, write and
/// execute permission. Released on drop.
#[derive(Debug)]
pub struct ExecBlock {
    ptr: *mut u8,
    len: usize,
}

impl ExecBlock {
    /// Reserve an `n`-byte executable region.
    ///
    /// # Errors
    ///
    /// [`AsmError::Exec`] when the OS refuses the mapping.
    pub fn alloc(len: usize) -> Result<Self, AsmError> {
        // The OS rejects zero-length mappings; keep a one-byte floor so
        // empty blocks still carry a stable base address.
        let ptr = alloc_exec_pages(len.max(1))?;
        Ok(Self { ptr, len })
    }

    /// Treat the first byte as a `word (*fn)(RuntimeContext*)` entrypoint
    /// and call it, returning the machine word it produces.
    ///
    /// # Safety
    ///
    /// The block must contain valid machine code for the host following the
    /// entrypoint ABI, `ctx` and its handler pointers must stay valid for
    /// the duration of the call, and the block must not have been freed.
    pub unsafe fn invoke(&self, ctx: &mut RuntimeContext) -> Word {
        let entry: unsafe extern "C" fn(*mut RuntimeContext) -> Word =
            unsafe { std::mem::transmute(self.ptr) };
        unsafe { entry(ctx) }
    }
}

impl Drop for ExecBlock {
    fn drop(&mut self) {
        let _ = free_exec_pages(self.ptr, self.len.max(1));
    }
}

impl ByteBlock for ExecBlock {
    fn base_ptr(&self) -> *const u8 {
        self.ptr
    }

    fn base_ptr_mut(&mut self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

// ─── DataBlock ─────────────────────────────────────────────

/// An ordinary zero-initialized heap block behind the [`ByteBlock`]
/// interface; no execute permission.
#[derive(Debug)]
pub struct DataBlock {
    buf: Box<[u8]>,
}

impl DataBlock {
    /// Allocate an `n`-byte zeroed data block.
    pub fn alloc(len: usize) -> Self {
        Self {
            buf: vec![0u8; len].into_boxed_slice(),
        }
    }
}

impl ByteBlock for DataBlock {
    fn base_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    fn base_ptr_mut(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

// ─── MachineCodeBlock ──────────────────────────────────────

/// An assembled code block serialized into executable memory, carrying the
/// required-site table for [`Linker::link`](crate::linker::Linker::link).
#[derive(Debug)]
pub struct MachineCodeBlock {
    block: ExecBlock,
    start_pos: u64,
    required: Vec<RequiredSite>,
}

impl MachineCodeBlock {
    /// Assemble `code` (if it is not already assembled), copy its bytes
    /// into a fresh executable region, hand every provided site its host
    /// address, and record the required-site offsets.
    pub(crate) fn from_code_block(code: &mut CodeBlock) -> Result<Self, AsmError> {
        let len = code.assemble()?;
        let start_pos = code.start_pos();
        let mut block = ExecBlock::alloc(len as usize)?;
        block.write_bytes(0, &code.bytes())?;

        let base = block.ptr as usize as u64;
        for (label, link) in code.provided_sites() {
            let offset = site_offset(code, *label, start_pos)?;
            link.set_addr(Addr::from_u64(base + offset as u64, usize::BITS)?);
        }

        let required = code
            .required_sites()
            .iter()
            .map(|(label, link)| {
                Ok(RequiredSite {
                    offset: site_offset(code, *label, start_pos)?,
                    link: Rc::clone(link),
                })
            })
            .collect::<Result<Vec<_>, AsmError>>()?;

        Ok(Self {
            block,
            start_pos,
            required,
        })
    }

    /// The block's base position from assembly time.
    pub fn start_pos(&self) -> u64 {
        self.start_pos
    }

    /// The host address of the block's first byte.
    pub fn base_addr(&self) -> Result<Addr, AsmError> {
        Addr::from_u64(self.block.ptr as usize as u64, usize::BITS)
    }

    /// The required sites recorded at serialization, in stream order.
    pub fn required_sites(&self) -> &[RequiredSite] {
        &self.required
    }

    /// See [`ExecBlock::invoke`].
    ///
    /// # Safety
    ///
    /// Same contract as [`ExecBlock::invoke`].
    pub unsafe fn invoke(&self, ctx: &mut RuntimeContext) -> Word {
        unsafe { self.block.invoke(ctx) }
    }
}

impl ByteBlock for MachineCodeBlock {
    fn base_ptr(&self) -> *const u8 {
        self.block.base_ptr()
    }

    fn base_ptr_mut(&mut self) -> *mut u8 {
        self.block.base_ptr_mut()
    }

    fn len(&self) -> usize {
        self.block.len()
    }
}

fn site_offset(code: &CodeBlock, label: crate::block::LabelId, start_pos: u64) -> Result<usize, AsmError> {
    let pos = code.label_pos(label).ok_or_else(|| AsmError::Usage {
        msg: format!(
            "link site label '{}' was never positioned",
            code.label_name(label).unwrap_or("?")
        ),
    })?;
    Ok((pos - start_pos) as usize)
}

// ─── Platform page allocation ──────────────────────────────

#[cfg(all(unix, not(target_os = "macos")))]
fn alloc_exec_pages(len: usize) -> Result<*mut u8, AsmError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(AsmError::Exec {
            msg: format!("mmap failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(ptr as *mut u8)
}

#[cfg(target_os = "macos")]
fn alloc_exec_pages(len: usize) -> Result<*mut u8, AsmError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_JIT,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(AsmError::Exec {
            msg: format!("mmap(MAP_JIT) failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn free_exec_pages(ptr: *mut u8, len: usize) -> Result<(), AsmError> {
    if ptr.is_null() {
        return Ok(());
    }
    let rc = unsafe { libc::munmap(ptr as *mut _, len) };
    if rc != 0 {
        return Err(AsmError::Exec {
            msg: format!("munmap failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn alloc_exec_pages(len: usize) -> Result<*mut u8, AsmError> {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null_mut(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        ) as *mut u8
    };
    if ptr.is_null() {
        return Err(AsmError::Exec {
            msg: format!("VirtualAlloc failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(ptr)
}

#[cfg(target_os = "windows")]
fn free_exec_pages(ptr: *mut u8, _len: usize) -> Result<(), AsmError> {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

    if ptr.is_null() {
        return Ok(());
    }
    let ok = unsafe { VirtualFree(ptr as *mut _, 0, MEM_RELEASE) };
    if ok == 0 {
        return Err(AsmError::Exec {
            msg: format!("VirtualFree failed: {}", std::io::Error::last_os_error()),
        });
    }
    Ok(())
}

#[cfg(not(any(unix, target_os = "windows")))]
fn alloc_exec_pages(_len: usize) -> Result<*mut u8, AsmError> {
    Err(AsmError::Exec {
        msg: String::from("executable memory is not supported on this platform"),
    })
}

#[cfg(not(any(unix, target_os = "windows")))]
fn free_exec_pages(_ptr: *mut u8, _len: usize) -> Result<(), AsmError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_block_reads_back_writes() {
        let mut block = ExecBlock::alloc(16).unwrap();
        assert_eq!(block.len(), 16);
        block.write_byte(0, 0x90).unwrap();
        block.write_byte(15, 0xc3).unwrap();
        assert_eq!(block.read_byte(0).unwrap(), 0x90);
        assert_eq!(block.read_byte(15).unwrap(), 0xc3);
    }

    #[test]
    fn accessors_are_bounds_checked() {
        let mut block = ExecBlock::alloc(4).unwrap();
        assert!(matches!(
            block.read_byte(4),
            Err(AsmError::OutOfBounds { offset: 4, len: 4 })
        ));
        assert!(matches!(
            block.write_byte(7, 0),
            Err(AsmError::OutOfBounds { offset: 7, len: 4 })
        ));
        assert!(matches!(
            block.write_bytes(2, &[0, 0, 0]),
            Err(AsmError::OutOfBounds { offset: 5, len: 4 })
        ));
    }

    #[test]
    fn block_addr_indexes_bytes() {
        let block = ExecBlock::alloc(8).unwrap();
        let base = block.addr(0).unwrap();
        let third = block.addr(3).unwrap();
        assert_eq!(base.width(), usize::BITS);
        assert_eq!(base.add_offset(3).unwrap(), third);
        assert!(block.addr(8).is_err());
    }

    #[test]
    fn data_block_is_zeroed_and_stable() {
        let mut block = DataBlock::alloc(32);
        assert!(block.buf.iter().all(|b| *b == 0));
        let before = block.base_ptr();
        block.write_bytes(4, &[1, 2, 3]).unwrap();
        assert_eq!(block.base_ptr(), before);
        assert_eq!(block.read_byte(5).unwrap(), 2);
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    #[test]
    fn invoke_runs_emitted_code() {
        // mov eax, 42; ret
        let mut block = ExecBlock::alloc(6).unwrap();
        block
            .write_bytes(0, &[0xb8, 0x2a, 0x00, 0x00, 0x00, 0xc3])
            .unwrap();
        let mut ctx = RuntimeContext::new();
        let result = unsafe { block.invoke(&mut ctx) };
        assert_eq!(result, 42);
    }
}
