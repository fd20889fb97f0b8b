//! Typed layout of the nominal state and the error state.
//!
//! The nominal state is `[core (17) | feature 0 (5) | feature 1 (5) | ...]`,
//! the error state `[core (16) | feature 0 (3) | feature 1 (3) | ...]`.
//! Every offset used by the filter is derived here.
//!
//! ```text
//! block        state offset  width   error offset  width
//! position          0          3          0          3
//! velocity          3          3          3          3
//! attitude          6          4 (q)      6          3
//! accel bias       10          3          9          3
//! gyro bias        13          3         12          3
//! drag             16          1         15          1
//! feature i    17+5i           4+1    16+3i          2+1
//! ```

/// Width of the core nominal state.
pub const CORE_STATE_DIM: usize = 17;
/// Width of the core error state.
pub const CORE_ERROR_DIM: usize = 16;
/// Nominal entries per feature: bearing quaternion + inverse depth.
pub const FEATURE_STATE_DIM: usize = 5;
/// Error entries per feature: bearing tangent + inverse depth.
pub const FEATURE_ERROR_DIM: usize = 3;

/// A contiguous range `[offset, offset + width)` of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: usize,
    pub width: usize,
}

impl Block {
    pub const fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Named sub-blocks of the core state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreBlock {
    Position,
    Velocity,
    Attitude,
    AccelBias,
    GyroBias,
    Drag,
}

impl CoreBlock {
    pub const ALL: [CoreBlock; 6] = [
        CoreBlock::Position,
        CoreBlock::Velocity,
        CoreBlock::Attitude,
        CoreBlock::AccelBias,
        CoreBlock::GyroBias,
        CoreBlock::Drag,
    ];

    /// Nominal width (4 for the attitude quaternion).
    pub const fn state_width(self) -> usize {
        match self {
            CoreBlock::Attitude => 4,
            CoreBlock::Drag => 1,
            _ => 3,
        }
    }

    /// Minimal tangent width.
    pub const fn error_width(self) -> usize {
        match self {
            CoreBlock::Drag => 1,
            _ => 3,
        }
    }

    const fn index(self) -> usize {
        match self {
            CoreBlock::Position => 0,
            CoreBlock::Velocity => 1,
            CoreBlock::Attitude => 2,
            CoreBlock::AccelBias => 3,
            CoreBlock::GyroBias => 4,
            CoreBlock::Drag => 5,
        }
    }

    /// Location in the nominal state.
    pub const fn state(self) -> Block {
        let mut offset = 0;
        let mut i = 0;
        while i < self.index() {
            offset += Self::ALL[i].state_width();
            i += 1;
        }
        Block::new(offset, self.state_width())
    }

    /// Location in the error state.
    pub const fn error(self) -> Block {
        let mut offset = 0;
        let mut i = 0;
        while i < self.index() {
            offset += Self::ALL[i].error_width();
            i += 1;
        }
        Block::new(offset, self.error_width())
    }

    /// True for blocks updated by plain addition.
    pub const fn is_euclidean(self) -> bool {
        !matches!(self, CoreBlock::Attitude)
    }
}

/// Location of one feature's sub-blocks in either vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureBlock {
    /// Bearing quaternion (nominal, width 4) or tangent (error, width 2).
    pub bearing: Block,
    /// Inverse depth (width 1).
    pub inv_depth: usize,
}

/// Layout for a filter holding `num_features` features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    pub num_features: usize,
}

impl StateLayout {
    pub const fn new(num_features: usize) -> Self {
        Self { num_features }
    }

    pub const fn state_dim(&self) -> usize {
        CORE_STATE_DIM + self.num_features * FEATURE_STATE_DIM
    }

    pub const fn error_dim(&self) -> usize {
        CORE_ERROR_DIM + self.num_features * FEATURE_ERROR_DIM
    }

    /// Nominal-state location of feature `slot`.
    pub const fn feature_state(slot: usize) -> FeatureBlock {
        let start = CORE_STATE_DIM + slot * FEATURE_STATE_DIM;
        FeatureBlock {
            bearing: Block::new(start, 4),
            inv_depth: start + 4,
        }
    }

    /// Error-state location of feature `slot`.
    pub const fn feature_error(slot: usize) -> FeatureBlock {
        let start = CORE_ERROR_DIM + slot * FEATURE_ERROR_DIM;
        FeatureBlock {
            bearing: Block::new(start, 2),
            inv_depth: start + 2,
        }
    }

    /// Number of features implied by a nominal-state length, if consistent.
    pub const fn features_from_state_dim(dim: usize) -> Option<usize> {
        if dim < CORE_STATE_DIM || (dim - CORE_STATE_DIM) % FEATURE_STATE_DIM != 0 {
            return None;
        }
        Some((dim - CORE_STATE_DIM) / FEATURE_STATE_DIM)
    }
}
