//! Frame geometry

use serde::{Deserialize, Serialize};

/// Frame resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions non-zero and even (required for 4:2:0 chroma)
    pub fn is_valid_420(&self) -> bool {
        self.width > 0 && self.height > 0 && self.width % 2 == 0 && self.height % 2 == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
