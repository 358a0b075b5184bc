//! # Synchronization Collaborator
//!
//! Outstanding GPU usage of a buffer object is tracked outside this core.
//! The memory manager only asks the collaborator to wait before a move or
//! destroy.

use crate::error::Result;
use crate::types::BoHandle;

// =============================================================================
// FENCE COLLABORATOR
// =============================================================================

/// Fence wait contract
pub trait Fences: Send + Sync {
    /// Block until all GPU usage of `bo` has completed
    ///
    /// An error makes the caller skip the object (eviction) or abort the
    /// operation (explicit move, destroy).
    fn wait_idle(&self, bo: BoHandle) -> Result<()>;
}

/// Collaborator for hardware without GPU-side users of buffer memory
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFences;

impl Fences for NoFences {
    fn wait_idle(&self, _bo: BoHandle) -> Result<()> {
        Ok(())
    }
}

static_assertions::assert_impl_all!(NoFences: Fences, Send, Sync);
