//! Shaping planner: decides which phase boundaries of a queued move to
//! shape and emits the move's segment chain.
//!
//! Planning runs to completion on the planner thread with no suspension
//! points. Infeasible shaping is never an error: the move collapses to an
//! unshaped chain. Attaching the chain to the move is the final write of
//! planning, so the step interrupt only ever observes completed chains.

use super::segment::{SegmentChain, SegmentIndex, SegmentPool};
use super::shaper::{AxisShaper, InputShaperType};
use super::{
    daa, MoveState, NeighborContext, PrepParams, QueuedMove, ShapingPlan, STEP_CLOCK_RATE,
    STEP_CLOCK_RATE_SQUARED,
};

#[derive(Debug, Default)]
pub struct ShapingPlanner {
    pool: SegmentPool,
}

impl ShapingPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// Release a completed move's chain back to the pool.
    pub fn release_segments(&mut self, mv: &mut QueuedMove) {
        self.pool.release_chain(mv.segments.take());
    }

    /// Plan shaping for one move and attach its segment chain. Returns the
    /// plan together with the final (possibly mutated) phase parameters.
    pub fn plan_move(
        &mut self,
        shaper: &AxisShaper,
        mv: &mut QueuedMove,
        neighbors: &NeighborContext,
        shaping_enabled: bool,
    ) -> (ShapingPlan, PrepParams) {
        let mut plan = ShapingPlan::default();
        let effective_type = if shaping_enabled {
            shaper.shaper_type()
        } else {
            InputShaperType::None
        };

        let mut params = match effective_type {
            InputShaperType::None => PrepParams::from_move(mv),

            InputShaperType::Daa => {
                // DAA rewrites the move's accelerations in place, then the
                // move gets an ordinary unshaped chain.
                daa::adjust_move(shaper, mv, neighbors);
                PrepParams::from_move(mv)
            }

            // The impulse shapers all have multiple impulses with varying
            // coefficients.
            InputShaperType::Zvd
            | InputShaperType::Zvdd
            | InputShaperType::Ei2
            | InputShaperType::Ei3
            | InputShaperType::Custom => {
                let mut params = PrepParams::from_move(mv);
                self.propose_plan(shaper, mv, &mut params, neighbors, &mut plan);
                params
            }
        };

        // Any chain left from an earlier planning pass goes back first.
        self.pool.release_chain(mv.segments.take());

        let accel_segs = self.build_acceleration_segments(shaper, mv, &params, &mut plan);
        let decel_segs = self.build_deceleration_segments(shaper, mv, &params, &mut plan);

        params.finalise(mv);
        let head = self.finish_segments(mv, &params, accel_segs, decel_segs);

        mv.accel_only =
            params.accel_clocks > 0.0 && params.steady_clocks <= 0.0 && params.decel_clocks <= 0.0;
        mv.segments = SegmentChain { head };
        (plan, params)
    }

    /// Set the plan to what we would like to do, then cut it back to what
    /// the move's geometry and neighbours allow.
    fn propose_plan(
        &self,
        shaper: &AxisShaper,
        mv: &QueuedMove,
        params: &mut PrepParams,
        neighbors: &NeighborContext,
        plan: &mut ShapingPlan,
    ) {
        let total_shaping_clocks = shaper.total_shaping_clocks();
        let prev = neighbors.prev;
        let next = neighbors.next;

        plan.shape_accel_start = params.accel_clocks + shaper.clocks_lost_at_start()
            >= total_shaping_clocks
            && ((prev.state != MoveState::Frozen && prev.state != MoveState::Executing)
                || !prev.accel_only);
        plan.shape_accel_end = params.accel_clocks + shaper.clocks_lost_at_end()
            >= total_shaping_clocks
            && params.decel_start_distance > params.accel_distance;
        plan.shape_decel_start = params.decel_clocks + shaper.clocks_lost_at_start()
            >= total_shaping_clocks
            && params.decel_start_distance > params.accel_distance;
        plan.shape_decel_end = params.decel_clocks + shaper.clocks_lost_at_end()
            >= total_shaping_clocks
            && (next.state != MoveState::Provisional || !next.deceleration_move);

        // See if we can shape the acceleration.
        if plan.shape_accel_start || plan.shape_accel_end {
            if plan.shape_accel_start
                && plan.shape_accel_end
                && params.accel_clocks < 2.0 * total_shaping_clocks
            {
                // Acceleration phase too short to shape both ends.
                plan.shape_accel_start = false;
                plan.shape_accel_end = false;
            } else {
                let mut extra_accel_distance = if plan.shape_accel_start {
                    extra_accel_start_distance(shaper, mv)
                } else {
                    0.0
                };
                if plan.shape_accel_end {
                    extra_accel_distance += extra_accel_end_distance(shaper, mv);
                }
                if params.accel_distance + extra_accel_distance <= params.decel_start_distance {
                    params.accel_distance += extra_accel_distance;
                    if plan.shape_accel_start {
                        params.accel_clocks += shaper.clocks_lost_at_start();
                    }
                    if plan.shape_accel_end {
                        params.accel_clocks += shaper.clocks_lost_at_end();
                    }
                } else {
                    // Not enough constant-speed distance to absorb it.
                    plan.shape_accel_start = false;
                    plan.shape_accel_end = false;
                    tracing::debug!("insufficient steady distance, not shaping acceleration");
                }
            }
        }

        // See if we can shape the deceleration.
        if plan.shape_decel_start || plan.shape_decel_end {
            if plan.shape_decel_start
                && plan.shape_decel_end
                && params.decel_clocks < 2.0 * total_shaping_clocks
            {
                plan.shape_decel_start = false;
                plan.shape_decel_end = false;
            } else {
                let mut extra_decel_distance = if plan.shape_decel_start {
                    extra_decel_start_distance(shaper, mv)
                } else {
                    0.0
                };
                if plan.shape_decel_end {
                    extra_decel_distance += extra_decel_end_distance(shaper, mv);
                }
                if params.accel_distance + extra_decel_distance <= params.decel_start_distance {
                    params.decel_start_distance -= extra_decel_distance;
                    if plan.shape_decel_start {
                        params.decel_clocks += shaper.clocks_lost_at_start();
                    }
                    if plan.shape_decel_end {
                        params.decel_clocks += shaper.clocks_lost_at_end();
                    }
                } else {
                    plan.shape_decel_start = false;
                    plan.shape_decel_end = false;
                    tracing::debug!("insufficient steady distance, not shaping deceleration");
                }
            }
        }
    }

    /// Emit the acceleration-phase segments for the plan and record their
    /// count.
    fn build_acceleration_segments(
        &mut self,
        shaper: &AxisShaper,
        mv: &QueuedMove,
        params: &PrepParams,
        plan: &mut ShapingPlan,
    ) -> Option<SegmentIndex> {
        if params.accel_distance <= 0.0 {
            plan.accel_segments = 0;
            return None;
        }
        let coefficients = shaper.coefficients();
        let durations = shaper.durations();
        let num_impulses = coefficients.len();

        let mut num_segs = 0;
        let mut accumulated_seg_time = 0.0;
        let mut end_distance = params.accel_distance;
        let mut end_segs: Option<SegmentIndex> = None;
        if plan.shape_accel_end {
            // Shape the end of the acceleration, walking back from the top
            // speed.
            let mut seg_start_speed = mv.top_speed;
            for i in (0..num_impulses).rev() {
                num_segs += 1;
                let index = self.pool.allocate(end_segs);
                let acceleration = mv.acceleration * (1.0 - coefficients[i]);
                let seg_time = durations[i];
                seg_start_speed -= acceleration * seg_time;
                let b = (seg_start_speed * STEP_CLOCK_RATE) / acceleration;
                let c = (2.0 * STEP_CLOCK_RATE_SQUARED * mv.total_distance) / acceleration;
                self.pool.get_mut(index).set_non_linear(
                    end_distance / mv.total_distance,
                    seg_time * STEP_CLOCK_RATE,
                    b,
                    c,
                );
                end_distance -= (seg_start_speed + 0.5 * acceleration * seg_time) * seg_time;
                end_segs = Some(index);
            }
            accumulated_seg_time += shaper.total_duration();
        }

        let mut start_distance = 0.0;
        let mut start_speed = mv.start_speed;
        let mut start_segs: Option<SegmentIndex> = None;
        if plan.shape_accel_start {
            // Shape the start of the acceleration.
            for i in 0..num_impulses {
                num_segs += 1;
                let index = self.pool.allocate(None);
                let acceleration = mv.acceleration * coefficients[i];
                let seg_time = durations[i];
                let b = (start_speed * STEP_CLOCK_RATE) / acceleration;
                let c = (2.0 * STEP_CLOCK_RATE_SQUARED * mv.total_distance) / acceleration;
                start_distance += (start_speed + 0.5 * acceleration * seg_time) * seg_time;
                self.pool.get_mut(index).set_non_linear(
                    start_distance / mv.total_distance,
                    seg_time * STEP_CLOCK_RATE,
                    b,
                    c,
                );
                match start_segs {
                    None => start_segs = Some(index),
                    Some(head) => self.pool.add_to_tail(head, index),
                }
                start_speed += acceleration * seg_time;
            }
            accumulated_seg_time += shaper.total_duration();
        }

        // Constant-acceleration bridge between the shaped ends.
        if end_distance > start_distance {
            num_segs += 1;
            let index = self.pool.allocate(end_segs);
            let b = (start_speed * STEP_CLOCK_RATE) / mv.acceleration;
            let c = (2.0 * STEP_CLOCK_RATE_SQUARED * mv.total_distance) / mv.acceleration;
            self.pool.get_mut(index).set_non_linear(
                end_distance / mv.total_distance,
                params.accel_clocks - accumulated_seg_time * STEP_CLOCK_RATE,
                b,
                c,
            );
            end_segs = Some(index);
        }

        plan.accel_segments = num_segs;
        match start_segs {
            None => end_segs,
            Some(head) => {
                if let Some(tail) = end_segs {
                    self.pool.add_to_tail(head, tail);
                }
                Some(head)
            }
        }
    }

    /// Emit the deceleration-phase segments for the plan and record their
    /// count. Accelerations are negated here.
    fn build_deceleration_segments(
        &mut self,
        shaper: &AxisShaper,
        mv: &QueuedMove,
        params: &PrepParams,
        plan: &mut ShapingPlan,
    ) -> Option<SegmentIndex> {
        if params.decel_distance <= 0.0 {
            plan.decel_segments = 0;
            return None;
        }
        let coefficients = shaper.coefficients();
        let durations = shaper.durations();
        let num_impulses = coefficients.len();

        let mut num_segs = 0;
        let mut accumulated_seg_time = 0.0;
        let mut end_distance = mv.total_distance;
        let mut end_segs: Option<SegmentIndex> = None;
        if plan.shape_decel_end {
            // Shape the end of the deceleration, walking back from the end
            // speed.
            let mut seg_start_speed = mv.end_speed;
            for i in (0..num_impulses).rev() {
                num_segs += 1;
                let index = self.pool.allocate(end_segs);
                let acceleration = -mv.deceleration * (1.0 - coefficients[i]);
                let seg_time = durations[i];
                seg_start_speed -= acceleration * seg_time;
                let b = (seg_start_speed * STEP_CLOCK_RATE) / acceleration;
                let c = (2.0 * STEP_CLOCK_RATE_SQUARED * mv.total_distance) / acceleration;
                self.pool.get_mut(index).set_non_linear(
                    end_distance / mv.total_distance,
                    seg_time * STEP_CLOCK_RATE,
                    b,
                    c,
                );
                end_distance -= (seg_start_speed + 0.5 * acceleration * seg_time) * seg_time;
                end_segs = Some(index);
            }
            accumulated_seg_time += shaper.total_duration();
        }

        let mut start_distance = params.decel_start_distance;
        let mut start_speed = mv.top_speed;
        let mut start_segs: Option<SegmentIndex> = None;
        if plan.shape_decel_start {
            // Shape the start of the deceleration.
            for i in 0..num_impulses {
                num_segs += 1;
                let index = self.pool.allocate(None);
                let acceleration = -mv.deceleration * coefficients[i];
                let seg_time = durations[i];
                let b = (start_speed * STEP_CLOCK_RATE) / acceleration;
                let c = (2.0 * STEP_CLOCK_RATE_SQUARED * mv.total_distance) / acceleration;
                start_distance += (start_speed + 0.5 * acceleration * seg_time) * seg_time;
                self.pool.get_mut(index).set_non_linear(
                    start_distance / mv.total_distance,
                    seg_time * STEP_CLOCK_RATE,
                    b,
                    c,
                );
                match start_segs {
                    None => start_segs = Some(index),
                    Some(head) => self.pool.add_to_tail(head, index),
                }
                start_speed += acceleration * seg_time;
            }
            accumulated_seg_time += shaper.total_duration();
        }

        // Constant-deceleration bridge.
        if end_distance > start_distance {
            num_segs += 1;
            let index = self.pool.allocate(end_segs);
            let b = -(start_speed * STEP_CLOCK_RATE) / mv.deceleration;
            let c = -(2.0 * STEP_CLOCK_RATE_SQUARED * mv.total_distance) / mv.deceleration;
            self.pool.get_mut(index).set_non_linear(
                end_distance / mv.total_distance,
                params.decel_clocks - accumulated_seg_time * STEP_CLOCK_RATE,
                b,
                c,
            );
            end_segs = Some(index);
        }

        plan.decel_segments = num_segs;
        match start_segs {
            None => end_segs,
            Some(head) => {
                if let Some(tail) = end_segs {
                    self.pool.add_to_tail(head, tail);
                }
                Some(head)
            }
        }
    }

    /// Insert the steady-speed segment (if any) ahead of the deceleration
    /// segments and join the two halves.
    fn finish_segments(
        &mut self,
        mv: &QueuedMove,
        params: &PrepParams,
        accel_segs: Option<SegmentIndex>,
        decel_segs: Option<SegmentIndex>,
    ) -> Option<SegmentIndex> {
        let mut decel_segs = decel_segs;
        if params.steady_clocks > 0.0 {
            let index = self.pool.allocate(decel_segs);
            let c = (mv.total_distance * STEP_CLOCK_RATE) / mv.top_speed;
            self.pool.get_mut(index).set_linear(
                params.decel_start_distance / mv.total_distance,
                params.steady_clocks,
                c,
            );
            decel_segs = Some(index);
        }

        match accel_segs {
            Some(head) => {
                if let Some(tail) = decel_segs {
                    self.pool.add_to_tail(head, tail);
                }
                Some(head)
            }
            None => decel_segs,
        }
    }
}

/// Additional distance travelled when the start of acceleration is shaped:
/// the shaped profile lags the nominal one, so the phase covers more
/// ground before reaching top speed.
fn extra_accel_start_distance(shaper: &AxisShaper, mv: &QueuedMove) -> f32 {
    let mut extra_distance = 0.0;
    let mut u = mv.start_speed;
    for (&coefficient, &seg_time) in shaper.coefficients().iter().zip(shaper.durations()) {
        let speed_change = coefficient * mv.acceleration * seg_time;
        extra_distance += (1.0 - coefficient) * (u + 0.5 * speed_change) * seg_time;
        u += speed_change;
    }
    extra_distance
}

fn extra_accel_end_distance(shaper: &AxisShaper, mv: &QueuedMove) -> f32 {
    let coefficients = shaper.coefficients();
    let durations = shaper.durations();
    let mut extra_distance = 0.0;
    let mut v = mv.top_speed;
    for i in (0..coefficients.len()).rev() {
        let seg_time = durations[i];
        let speed_change = (1.0 - coefficients[i]) * mv.acceleration * seg_time;
        extra_distance += coefficients[i] * (v - 0.5 * speed_change) * seg_time;
        v -= speed_change;
    }
    extra_distance
}

fn extra_decel_start_distance(shaper: &AxisShaper, mv: &QueuedMove) -> f32 {
    let mut extra_distance = 0.0;
    let mut u = mv.top_speed;
    for (&coefficient, &seg_time) in shaper.coefficients().iter().zip(shaper.durations()) {
        let speed_change = coefficient * mv.deceleration * seg_time;
        extra_distance += (1.0 - coefficient) * (u - 0.5 * speed_change) * seg_time;
        u -= speed_change;
    }
    extra_distance
}

fn extra_decel_end_distance(shaper: &AxisShaper, mv: &QueuedMove) -> f32 {
    let coefficients = shaper.coefficients();
    let durations = shaper.durations();
    let mut extra_distance = 0.0;
    let mut v = mv.end_speed;
    for i in (0..coefficients.len()).rev() {
        let seg_time = durations[i];
        let speed_change = (1.0 - coefficients[i]) * mv.deceleration * seg_time;
        extra_distance += coefficients[i] * (v + 0.5 * speed_change) * seg_time;
        v += speed_change;
    }
    extra_distance
}
