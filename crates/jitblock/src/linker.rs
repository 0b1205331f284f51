//! Required/provided link objects and cross-block patching.
//!
//! A *required* site is a placeholder inside a block that needs an
//! address-derived value patched in; a *provided* site hands its host
//! address to a link object once the owning block lands in executable
//! memory. Matching between the two is the caller's business: a required
//! link object holds on to the provided object it resolves against (shared
//! `Rc` identity), and the linker only drives the patching.

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::addr::Addr;
use crate::error::AsmError;

/// Capability of a required site: produce the bytes that replace the
/// placeholder.
pub trait RequiredLink {
    /// Patch width in bits; must be a positive multiple of 8.
    fn width(&self) -> u32;

    /// The bytes written over the placeholder, `width() / 8` of them.
    ///
    /// `dst` is the host address of the first placeholder byte; any
    /// endianness and pc-relative arithmetic is the link object's
    /// responsibility, via the [`Addr`] API.
    fn link_value(&self, dst: &Addr) -> Vec<u8>;
}

/// Capability of a provided site: receive the site's host address when the
/// owning block is serialized to executable memory.
pub trait ProvidedLink {
    /// Record the host address of the provided site.
    fn set_addr(&self, addr: Addr);
}

/// A required site of a serialized block: the placeholder offset and the
/// link object that fills it.
#[derive(Clone)]
pub struct RequiredSite {
    /// Byte offset of the placeholder within the block.
    pub offset: usize,
    /// The link object producing the patch bytes.
    pub link: Rc<dyn RequiredLink>,
}

impl core::fmt::Debug for RequiredSite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequiredSite")
            .field("offset", &self.offset)
            .field("width", &self.link.width())
            .finish()
    }
}

/// A record of one patched required site: where a value was written.
/// Useful for tooling, debugging, and re-linking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppliedPatch {
    /// Byte offset in the block where the value was written.
    pub offset: usize,
    /// Size of the patched value in bytes.
    pub size: usize,
}

/// The linker: patches the required sites of serialized blocks.
#[derive(Debug, Default)]
pub struct Linker;

#[cfg(feature = "std")]
impl Linker {
    /// Patch every required site of `block` in order, returning a record of
    /// the applied patches.
    ///
    /// # Errors
    ///
    /// [`AsmError::LinkValueLengthMismatch`] when a link object produces a
    /// byte count different from its declared width,
    /// [`AsmError::OutOfBounds`] when a patch would leave the block, and
    /// any address arithmetic error.
    pub fn link(
        block: &mut crate::exec::MachineCodeBlock,
    ) -> Result<Vec<AppliedPatch>, AsmError> {
        use crate::exec::ByteBlock;

        let base = block.base_addr()?;
        let sites: Vec<RequiredSite> = block.required_sites().to_vec();
        let mut applied = Vec::with_capacity(sites.len());
        for site in sites {
            let size = (site.link.width() / 8) as usize;
            let dst = base.add_offset(site.offset as i64)?;
            let value = site.link.link_value(&dst);
            if value.len() != size {
                return Err(AsmError::LinkValueLengthMismatch {
                    expected: size,
                    actual: value.len(),
                });
            }
            block.write_bytes(site.offset, &value)?;
            applied.push(AppliedPatch {
                offset: site.offset,
                size,
            });
        }
        Ok(applied)
    }

    /// Link a set of blocks that share link objects by identity.
    ///
    /// # Errors
    ///
    /// See [`Linker::link`]; linking stops at the first failing block.
    pub fn link_all(
        blocks: &mut [crate::exec::MachineCodeBlock],
    ) -> Result<Vec<AppliedPatch>, AsmError> {
        let mut applied = Vec::new();
        for block in blocks {
            applied.extend(Self::link(block)?);
        }
        Ok(applied)
    }
}
