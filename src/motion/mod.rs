// motion::mod.rs
// Shared motion types consumed by the shaper, planner, and segment pool

pub mod daa;
pub mod planner;
pub mod segment;
pub mod shaper;

use segment::SegmentChain;

/// Step timer tick rate in Hz. Segment times and phase clocks are
/// expressed in these ticks.
pub const STEP_CLOCK_RATE: f32 = 750_000.0;
pub const STEP_CLOCK_RATE_SQUARED: f32 = STEP_CLOCK_RATE * STEP_CLOCK_RATE;

/// Lifecycle of a queued move. Once a move leaves `Provisional` its state
/// only advances, so neighbour snapshots taken during planning stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Provisional,
    Frozen,
    Executing,
    Completed,
}

/// Kinematic record of one queued trapezoidal move. Speeds are mm/s,
/// distances mm, accelerations mm/s². The speed plan (`start_speed`,
/// `top_speed`, `end_speed` and the phase distances) is computed upstream;
/// the shaping planner only rewrites it.
#[derive(Debug, Clone, Default)]
pub struct QueuedMove {
    pub start_speed: f32,
    pub top_speed: f32,
    pub end_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub total_distance: f32,
    pub accel_distance: f32,
    pub decel_distance: f32,
    pub state: MoveState,
    /// Set after planning when the move ended up all-acceleration.
    pub accel_only: bool,
    /// Shaped segment chain, attached by the planner. Exclusively owned by
    /// this move; released back to the pool on completion.
    pub segments: SegmentChain,
}

impl QueuedMove {
    /// Build a move record with phase distances derived from the speed plan.
    pub fn trapezoidal(
        start_speed: f32,
        top_speed: f32,
        end_speed: f32,
        acceleration: f32,
        deceleration: f32,
        total_distance: f32,
    ) -> Self {
        let accel_distance = if acceleration > 0.0 {
            (top_speed * top_speed - start_speed * start_speed) / (2.0 * acceleration)
        } else {
            0.0
        };
        let decel_distance = if deceleration > 0.0 {
            (top_speed * top_speed - end_speed * end_speed) / (2.0 * deceleration)
        } else {
            0.0
        };
        Self {
            start_speed,
            top_speed,
            end_speed,
            acceleration,
            deceleration,
            total_distance,
            accel_distance,
            decel_distance,
            ..Self::default()
        }
    }

    /// True when the move decelerates over its whole length.
    pub fn is_deceleration_move(&self) -> bool {
        self.accel_distance <= 0.0 && self.decel_distance >= self.total_distance
    }
}

/// Planning-relevant snapshot of a neighbouring move.
#[derive(Debug, Clone, Copy)]
pub struct MoveSummary {
    pub state: MoveState,
    pub accel_only: bool,
    pub deceleration_move: bool,
}

impl MoveSummary {
    /// A completed (or absent) neighbour that imposes no constraints.
    pub fn idle() -> Self {
        Self {
            state: MoveState::Completed,
            accel_only: false,
            deceleration_move: false,
        }
    }

    pub fn of(mv: &QueuedMove) -> Self {
        Self {
            state: mv.state,
            accel_only: mv.accel_only,
            deceleration_move: mv.is_deceleration_move(),
        }
    }
}

impl Default for MoveSummary {
    fn default() -> Self {
        Self::idle()
    }
}

/// Previous/next move snapshots consulted while planning one move.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborContext {
    pub prev: MoveSummary,
    pub next: MoveSummary,
}

/// Phase distances and clock counts for one move, mutated by the planner
/// as shaping is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepParams {
    pub accel_distance: f32,
    pub decel_distance: f32,
    /// Distance at which deceleration begins.
    pub decel_start_distance: f32,
    pub accel_clocks: f32,
    pub steady_clocks: f32,
    pub decel_clocks: f32,
}

impl PrepParams {
    pub fn from_move(mv: &QueuedMove) -> Self {
        let accel_clocks = if mv.acceleration > 0.0 {
            (mv.top_speed - mv.start_speed) / mv.acceleration * STEP_CLOCK_RATE
        } else {
            0.0
        };
        let decel_clocks = if mv.deceleration > 0.0 {
            (mv.top_speed - mv.end_speed) / mv.deceleration * STEP_CLOCK_RATE
        } else {
            0.0
        };
        Self {
            accel_distance: mv.accel_distance,
            decel_distance: mv.decel_distance,
            decel_start_distance: mv.total_distance - mv.decel_distance,
            accel_clocks,
            steady_clocks: 0.0,
            decel_clocks,
        }
    }

    /// Compute the steady-speed clocks once the shaped phase distances are
    /// settled.
    pub(crate) fn finalise(&mut self, mv: &QueuedMove) {
        let steady_distance = self.decel_start_distance - self.accel_distance;
        self.steady_clocks = if steady_distance > 0.0 && mv.top_speed > 0.0 {
            steady_distance / mv.top_speed * STEP_CLOCK_RATE
        } else {
            0.0
        };
    }

    pub fn total_clocks(&self) -> f32 {
        self.accel_clocks + self.steady_clocks + self.decel_clocks
    }
}

/// Which of the four phase boundaries of a move get shaped, plus the
/// per-phase segment counts actually emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapingPlan {
    pub shape_accel_start: bool,
    pub shape_accel_end: bool,
    pub shape_decel_start: bool,
    pub shape_decel_end: bool,
    pub accel_segments: usize,
    pub decel_segments: usize,
}

impl ShapingPlan {
    pub fn shapes_anything(&self) -> bool {
        self.shape_accel_start
            || self.shape_accel_end
            || self.shape_decel_start
            || self.shape_decel_end
    }
}
