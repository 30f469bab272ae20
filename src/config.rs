use serde::{Deserialize, Serialize};
use crate::arena::DEFAULT_ALIGNMENT;




/**
 * Settings shared by schedules and the boundary node sum. Every process in a
 * communicator must use the same `base_tag`.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Pack outgoing messages for different peers in parallel.
    pub parallel_pack: bool,

    /// Alignment, in bytes, of message buffers carved from the send arena.
    pub arena_alignment: usize,

    /// First message tag handed out to schedules built from this config.
    pub base_tag: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            parallel_pack: true,
            arena_alignment: DEFAULT_ALIGNMENT,
            base_tag: 0,
        }
    }
}
