//! # Block Heap & Protection-Window Translator
//!
//! The kernel heap is a fixed array of equal-size blocks laid over the
//! MPU-protected SRAM range. One block is exactly one MPU subregion (1 KiB),
//! eight subregions form one 8 KiB MPU region, and an allocation must never
//! cross a region boundary because the hardware only grants access at
//! region + subregion granularity.
//!
//! Every allocation is tagged with the owning task's identity, and the
//! translator converts the allocated byte window into the subregion-open
//! bits (`AccessMask`) that the dispatch path writes into the MPU's SRD
//! fields. A set bit means "this subregion is opened to the running task";
//! in hardware that is an SRD *disable* bit, which drops the subregion out
//! of the privileged-only SRAM rule and lets access fall through to the
//! permissive background rule.

use crate::config::{
    BLOCK_SIZE, HEAP_BASE, HEAP_FIRST_SUBREGION, HEAP_SIZE, MPU_REGION_SIZE, NUM_BLOCKS,
    SUBREGIONS_PER_REGION,
};
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// Access mask
// ---------------------------------------------------------------------------

/// Bitmask of opened SRAM subregions, one bit per 1 KiB subregion counted
/// from the SRAM base. Bits 0..4 cover the kernel-reserved page and are
/// never set; heap block `i` maps to bit `HEAP_FIRST_SUBREGION + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessMask(u64);

impl AccessMask {
    /// No subregions opened: the task may touch nothing in SRAM.
    pub const NONE: AccessMask = AccessMask(0);

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Rebuild a mask from its raw bits (shadow-register round trip).
    #[inline]
    pub const fn from_bits(bits: u64) -> AccessMask {
        AccessMask(bits)
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Grant every window in `other` in addition to the current grant.
    #[inline]
    pub fn insert(&mut self, other: AccessMask) {
        self.0 |= other.0;
    }

    /// The 8-bit slice of this mask belonging to one SRAM MPU region,
    /// in the layout the hardware SRD field expects.
    #[inline]
    pub const fn region_byte(self, region: usize) -> u8 {
        (self.0 >> (region * SUBREGIONS_PER_REGION)) as u8
    }

    /// Translate an allocated byte window into subregion bits.
    ///
    /// Returns `None` if the window is not block-aligned or lies outside
    /// the heap range; the caller treats that as "no grant".
    pub fn window(base: usize, size_in_bytes: usize) -> Option<AccessMask> {
        if size_in_bytes == 0 || size_in_bytes % BLOCK_SIZE != 0 {
            return None;
        }
        if base < HEAP_BASE || base + size_in_bytes > HEAP_BASE + HEAP_SIZE {
            return None;
        }
        let start = (base - HEAP_BASE) / BLOCK_SIZE + HEAP_FIRST_SUBREGION;
        let end = start + size_in_bytes / BLOCK_SIZE;
        let mut mask = 0u64;
        for bit in start..end {
            mask |= 1 << bit;
        }
        Some(AccessMask(mask))
    }
}

// ---------------------------------------------------------------------------
// Block table
// ---------------------------------------------------------------------------

/// Bookkeeping for one heap block. `run_len` is stored on every block of an
/// allocation, so the length of a run is an O(1) lookup from any block in it.
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub allocated: bool,
    pub owner: Option<TaskId>,
    pub run_len: usize,
}

impl Block {
    pub const FREE: Block = Block {
        allocated: false,
        owner: None,
        run_len: 0,
    };
}

/// A successful allocation: the base address of the run and the subregion
/// bits the owning task must be granted for it.
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    pub base: usize,
    pub size_in_bytes: usize,
    pub mask: AccessMask,
}

/// The MPU region index a block falls in (counting SRAM regions from 0).
#[inline]
const fn region_of_block(index: usize) -> usize {
    (index + HEAP_FIRST_SUBREGION) / SUBREGIONS_PER_REGION
}

/// Block-granular first-fit heap with per-task ownership.
#[derive(Debug)]
pub struct BlockHeap {
    blocks: [Block; NUM_BLOCKS],
}

impl BlockHeap {
    pub const fn new() -> Self {
        BlockHeap {
            blocks: [Block::FREE; NUM_BLOCKS],
        }
    }

    /// Allocate `size_in_bytes` rounded up to whole blocks for `owner`.
    ///
    /// First-fit scan over runs of free blocks that stay inside a single
    /// MPU region. Never partially allocates: either the whole run is
    /// claimed or the request fails with `None` (out of memory, zero size,
    /// or a request larger than one region).
    pub fn allocate(&mut self, owner: TaskId, size_in_bytes: usize) -> Option<Allocation> {
        if size_in_bytes == 0 || size_in_bytes > MPU_REGION_SIZE {
            return None;
        }
        let need = size_in_bytes.div_ceil(BLOCK_SIZE);

        let mut i = 0;
        while i < NUM_BLOCKS {
            if self.blocks[i].allocated {
                i += 1;
                continue;
            }
            // Count free blocks following i within the same region.
            let region = region_of_block(i);
            let mut run = 1;
            while run < need {
                let j = i + run;
                if j >= NUM_BLOCKS || self.blocks[j].allocated || region_of_block(j) != region {
                    break;
                }
                run += 1;
            }
            if run == need {
                for block in &mut self.blocks[i..i + need] {
                    *block = Block {
                        allocated: true,
                        owner: Some(owner),
                        run_len: need,
                    };
                }
                let base = HEAP_BASE + i * BLOCK_SIZE;
                let bytes = need * BLOCK_SIZE;
                // In range and block-aligned by construction.
                let mask = AccessMask::window(base, bytes)?;
                log::trace!(
                    "heap: allocated {need} block(s) at {base:#010x} for {:#x}",
                    owner.as_usize()
                );
                return Some(Allocation {
                    base,
                    size_in_bytes: bytes,
                    mask,
                });
            }
            // The run was too short; everything checked was free, so skip
            // past it rather than rescanning.
            i += run;
        }
        log::debug!("heap: out of memory for {size_in_bytes} byte request");
        None
    }

    /// Release the run based at `address`, if it is in range, allocated,
    /// owned by `owner`, and a run base. Returns the subregion bits to
    /// revoke, or `None` if the request was ignored (fail-safe no-op
    /// policy).
    pub fn free(&mut self, owner: TaskId, address: usize) -> Option<AccessMask> {
        if address < HEAP_BASE || address >= HEAP_BASE + HEAP_SIZE {
            return None;
        }
        let index = (address - HEAP_BASE) / BLOCK_SIZE;
        let block = self.blocks[index];
        if !block.allocated || block.owner != Some(owner) {
            return None;
        }
        // An address inside a run must not clear blocks past the run's
        // end. A base is preceded by a block that is free, foreign, or of
        // a different run shape; back-to-back runs of the same owner and
        // length are told apart only by freeing in ascending order, which
        // is how `free_all` works.
        if index > 0 {
            let prev = self.blocks[index - 1];
            if prev.allocated && prev.owner == Some(owner) && prev.run_len == block.run_len {
                return None;
            }
        }
        let run = block.run_len;
        for b in &mut self.blocks[index..index + run] {
            *b = Block::FREE;
        }
        log::trace!(
            "heap: freed {run} block(s) at {address:#010x} of {:#x}",
            owner.as_usize()
        );
        AccessMask::window(HEAP_BASE + index * BLOCK_SIZE, run * BLOCK_SIZE)
    }

    /// Release every run owned by `owner` (kill/restart reclamation path).
    /// Returns the accumulated subregion bits to revoke.
    pub fn free_all(&mut self, owner: TaskId) -> AccessMask {
        let mut revoked = AccessMask::NONE;
        let mut i = 0;
        while i < NUM_BLOCKS {
            let block = self.blocks[i];
            if block.allocated && block.owner == Some(owner) {
                let base = HEAP_BASE + i * BLOCK_SIZE;
                if let Some(bits) = self.free(owner, base) {
                    revoked.insert(bits);
                }
                i += block.run_len;
            } else {
                i += 1;
            }
        }
        revoked
    }

    /// The exact grant the heap currently extends to `owner`. The task
    /// table's `srd` field must always equal this.
    pub fn owned_mask(&self, owner: TaskId) -> AccessMask {
        let mut mask = AccessMask::NONE;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.allocated && block.owner == Some(owner) {
                if let Some(bits) = AccessMask::window(HEAP_BASE + i * BLOCK_SIZE, BLOCK_SIZE) {
                    mask.insert(bits);
                }
            }
        }
        mask
    }

    /// Number of free blocks, for diagnostics.
    pub fn free_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| !b.allocated).count()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
