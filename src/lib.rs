// quell: input-shaping motion planner for printer/CNC motion controllers

pub mod config;
pub mod gcode;
pub mod motion;

pub use config::{load_shaper_config, ConfigError, ShaperConfig};
pub use gcode::{CommandArgs, CommandError};
pub use motion::planner::ShapingPlanner;
pub use motion::segment::{MoveSegment, SegmentChain, SegmentLaw, SegmentPool};
pub use motion::shaper::{AxisShaper, ConfigReply, InputShaperType, ShaperConfigError};
pub use motion::{
    MoveState, MoveSummary, NeighborContext, PrepParams, QueuedMove, ShapingPlan,
    STEP_CLOCK_RATE,
};

/// Notified after every successful shaper parameter change so the move
/// subsystem can drain in-flight planning before the new parameters are
/// consulted. Configuration and planning are never concurrent.
pub trait MoveUpdateListener: Send + Sync {
    fn move_updated(&self);
}
