//! # VRAM Range Allocator
//!
//! Page-granular allocation over a flat pool. The pool is kept as an
//! ordered list of blocks covering `[0, total)` exactly; free neighbours
//! are always merged.

use alloc::vec::Vec;
use core::fmt;

use basalt_core::types::{align_down, align_up};
use basalt_core::{Error, Result};

// =============================================================================
// PAGE RANGE
// =============================================================================

/// Half-open range of pages
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageRange {
    /// First page
    pub start: u64,
    /// One past the last page
    pub end: u64,
}

impl PageRange {
    /// Range of `pages` pages starting at `start`
    pub const fn new(start: u64, pages: u64) -> Self {
        Self {
            start,
            end: start + pages,
        }
    }

    /// Number of pages
    pub const fn pages(&self) -> u64 {
        self.end - self.start
    }

    /// Check if ranges overlap
    pub const fn overlaps(&self, other: &PageRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Debug for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

// =============================================================================
// ALLOCATION REQUEST
// =============================================================================

/// What to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    /// Size in pages
    pub pages: u64,
    /// Alignment of the first page, in pages (power of two, 0 means 1)
    pub alignment: u64,
    /// Place at the top of the pool
    pub top_down: bool,
}

impl RangeRequest {
    /// Bottom-up request without alignment
    pub const fn new(pages: u64) -> Self {
        Self {
            pages,
            alignment: 1,
            top_down: false,
        }
    }

    /// Set alignment in pages
    pub const fn aligned(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Allocate from the top
    pub const fn top_down(mut self, top_down: bool) -> Self {
        self.top_down = top_down;
        self
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Block {
    range: PageRange,
    free: bool,
}

/// Allocator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeStats {
    /// Successful allocations
    pub allocations: u64,
    /// Frees
    pub frees: u64,
    /// Requests that ended in OutOfMemory
    pub failures: u64,
    /// Pages currently allocated
    pub allocated_pages: u64,
    /// High-water mark of allocated pages
    pub peak_pages: u64,
}

// =============================================================================
// RANGE ALLOCATOR
// =============================================================================

/// First-fit page allocator
#[derive(Debug)]
pub struct RangeAllocator {
    total: u64,
    blocks: Vec<Block>,
    stats: RangeStats,
}

impl RangeAllocator {
    /// Pool of `total_pages` pages, all free
    pub fn new(total_pages: u64) -> Self {
        let blocks = if total_pages == 0 {
            Vec::new()
        } else {
            alloc::vec![Block {
                range: PageRange::new(0, total_pages),
                free: true,
            }]
        };
        Self {
            total: total_pages,
            blocks,
            stats: RangeStats::default(),
        }
    }

    /// Pool size in pages
    pub fn total_pages(&self) -> u64 {
        self.total
    }

    /// Allocate a range
    pub fn allocate(&mut self, req: RangeRequest) -> Result<PageRange> {
        let alignment = Self::check_request(&req)?;
        match self.find_fit(req.pages, alignment, req.top_down) {
            Some(range) => Ok(range),
            None => {
                self.stats.failures += 1;
                Err(Error::OutOfMemory)
            }
        }
    }

    /// Allocate a range, evicting candidates in order until it fits
    ///
    /// `candidates` is walked once. `evict` receives the allocator so it
    /// can free the victim's range, and reports whether it did. A request
    /// larger than the pool fails without evicting anything.
    pub fn allocate_or_evict<I, F>(
        &mut self,
        req: RangeRequest,
        candidates: I,
        mut evict: F,
    ) -> Result<PageRange>
    where
        I: IntoIterator,
        F: FnMut(&mut Self, I::Item) -> bool,
    {
        let alignment = Self::check_request(&req)?;
        if let Some(range) = self.find_fit(req.pages, alignment, req.top_down) {
            return Ok(range);
        }

        if req.pages <= self.total {
            for candidate in candidates {
                if !evict(self, candidate) {
                    continue;
                }
                if let Some(range) = self.find_fit(req.pages, alignment, req.top_down) {
                    return Ok(range);
                }
            }
        }

        self.stats.failures += 1;
        Err(Error::OutOfMemory)
    }

    /// Return a range to the pool
    ///
    /// The range must be exactly one previously allocated range.
    pub fn free(&mut self, range: PageRange) -> Result<()> {
        let index = self
            .blocks
            .iter()
            .position(|b| b.range == range && !b.free)
            .ok_or(Error::NotFound)?;

        self.blocks[index].free = true;
        self.stats.frees += 1;
        self.stats.allocated_pages -= range.pages();

        self.merge_around(index);
        Ok(())
    }

    fn check_request(req: &RangeRequest) -> Result<u64> {
        let alignment = req.alignment.max(1);
        if req.pages == 0 || !alignment.is_power_of_two() {
            return Err(Error::InvalidArgument);
        }
        Ok(alignment)
    }

    fn find_fit(&mut self, pages: u64, alignment: u64, top_down: bool) -> Option<PageRange> {
        if pages > self.total {
            return None;
        }

        let fit = if top_down {
            self.blocks.iter().enumerate().rev().find_map(|(i, b)| {
                if !b.free || b.range.pages() < pages {
                    return None;
                }
                let start = align_down(b.range.end - pages, alignment);
                (start >= b.range.start).then(|| (i, PageRange::new(start, pages)))
            })
        } else {
            self.blocks.iter().enumerate().find_map(|(i, b)| {
                if !b.free {
                    return None;
                }
                let start = align_up(b.range.start, alignment);
                (start + pages <= b.range.end).then(|| (i, PageRange::new(start, pages)))
            })
        };

        let (index, range) = fit?;
        self.split_block(index, range);

        self.stats.allocations += 1;
        self.stats.allocated_pages += pages;
        self.stats.peak_pages = self.stats.peak_pages.max(self.stats.allocated_pages);
        log::debug!("vram: allocated pages {:?}", range);
        Some(range)
    }

    /// Split a free block around an allocation
    fn split_block(&mut self, index: usize, alloc: PageRange) {
        let block = self.blocks.remove(index);
        let mut at = index;

        if alloc.start > block.range.start {
            self.blocks.insert(
                at,
                Block {
                    range: PageRange {
                        start: block.range.start,
                        end: alloc.start,
                    },
                    free: true,
                },
            );
            at += 1;
        }

        self.blocks.insert(
            at,
            Block {
                range: alloc,
                free: false,
            },
        );

        if alloc.end < block.range.end {
            self.blocks.insert(
                at + 1,
                Block {
                    range: PageRange {
                        start: alloc.end,
                        end: block.range.end,
                    },
                    free: true,
                },
            );
        }
    }

    /// Merge a freed block with free neighbours
    fn merge_around(&mut self, index: usize) {
        if index + 1 < self.blocks.len() && self.blocks[index + 1].free {
            self.blocks[index].range.end = self.blocks[index + 1].range.end;
            self.blocks.remove(index + 1);
        }
        if index > 0 && self.blocks[index - 1].free {
            self.blocks[index - 1].range.end = self.blocks[index].range.end;
            self.blocks.remove(index);
        }
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Free pages
    pub fn free_pages(&self) -> u64 {
        self.total - self.stats.allocated_pages
    }

    /// Allocated pages
    pub fn allocated_pages(&self) -> u64 {
        self.stats.allocated_pages
    }

    /// Largest contiguous free range in pages
    pub fn largest_free(&self) -> u64 {
        self.blocks
            .iter()
            .filter(|b| b.free)
            .map(|b| b.range.pages())
            .max()
            .unwrap_or(0)
    }

    /// Allocated ranges in address order
    pub fn allocated_ranges(&self) -> impl Iterator<Item = PageRange> + '_ {
        self.blocks.iter().filter(|b| !b.free).map(|b| b.range)
    }

    /// Free ranges in address order
    pub fn free_ranges(&self) -> impl Iterator<Item = PageRange> + '_ {
        self.blocks.iter().filter(|b| b.free).map(|b| b.range)
    }

    /// Get statistics
    pub fn stats(&self) -> &RangeStats {
        &self.stats
    }

    /// Whether the block list is a gapless, non-overlapping, fully merged
    /// cover of the pool whose accounting matches
    pub fn is_consistent(&self) -> bool {
        let mut cursor = 0;
        let mut allocated = 0;
        let mut prev_free = false;
        for b in &self.blocks {
            if b.range.start != cursor || b.range.end <= b.range.start {
                return false;
            }
            if b.free && prev_free {
                return false;
            }
            if !b.free {
                allocated += b.range.pages();
            }
            prev_free = b.free;
            cursor = b.range.end;
        }
        cursor == self.total && allocated == self.stats.allocated_pages
    }
}
