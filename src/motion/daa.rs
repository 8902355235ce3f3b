//! Dynamic acceleration adjustment.
//!
//! DAA does not add impulses. It stretches the acceleration and
//! deceleration phases in time so each spans the machine's ringing period
//! (or twice it), which places the excitation on a vibration node. The
//! planner then emits an ordinary unshaped chain for the rewritten move.

use crate::motion::shaper::AxisShaper;
use crate::motion::{MoveState, NeighborContext, QueuedMove};

fn square(value: f32) -> f32 {
    value * value
}

/// Rewrite the move's acceleration/deceleration magnitudes and phase
/// distances in place. A move that cannot be adjusted without violating
/// the minimum acceleration (or exceeding its original magnitudes) is
/// left untouched.
pub(crate) fn adjust_move(
    shaper: &AxisShaper,
    mv: &mut QueuedMove,
    neighbors: &NeighborContext,
) {
    let ideal_period = shaper.daa_ideal_period();
    let minimum_acceleration = shaper.minimum_acceleration();

    let mut proposed_acceleration = mv.acceleration;
    let mut proposed_accel_distance = mv.accel_distance;
    let mut adjust_acceleration = false;
    let prev = neighbors.prev;
    if mv.top_speed > mv.start_speed
        && ((prev.state != MoveState::Frozen && prev.state != MoveState::Executing)
            || !prev.accel_only)
    {
        let accel_time = (mv.top_speed - mv.start_speed) / mv.acceleration;
        if accel_time < ideal_period {
            proposed_acceleration = (mv.top_speed - mv.start_speed) / ideal_period;
            adjust_acceleration = true;
        } else if accel_time < ideal_period * 2.0 {
            proposed_acceleration = (mv.top_speed - mv.start_speed) / (ideal_period * 2.0);
            adjust_acceleration = true;
        }
        if adjust_acceleration {
            proposed_accel_distance = (square(mv.top_speed) - square(mv.start_speed))
                / (2.0 * proposed_acceleration);
        }
    }

    let mut proposed_deceleration = mv.deceleration;
    let mut proposed_decel_distance = mv.decel_distance;
    let mut adjust_deceleration = false;
    let next = neighbors.next;
    if next.state != MoveState::Provisional || !next.deceleration_move {
        let decel_time = (mv.top_speed - mv.end_speed) / mv.deceleration;
        if decel_time < ideal_period {
            proposed_deceleration = (mv.top_speed - mv.end_speed) / ideal_period;
            adjust_deceleration = true;
        } else if decel_time < ideal_period * 2.0 {
            proposed_deceleration = (mv.top_speed - mv.end_speed) / (ideal_period * 2.0);
            adjust_deceleration = true;
        }
        if adjust_deceleration {
            proposed_decel_distance =
                (square(mv.top_speed) - square(mv.end_speed)) / (2.0 * proposed_deceleration);
        }
    }

    if !adjust_acceleration && !adjust_deceleration {
        return;
    }

    if proposed_accel_distance + proposed_decel_distance <= mv.total_distance {
        if proposed_acceleration < minimum_acceleration
            || proposed_deceleration < minimum_acceleration
        {
            return;
        }
        mv.acceleration = proposed_acceleration;
        mv.deceleration = proposed_deceleration;
        mv.accel_distance = proposed_accel_distance;
        mv.decel_distance = proposed_decel_distance;
    } else {
        // The move can't stay trapezoidal at the original top speed. Try an
        // accelerate-decelerate profile with both phases spanning exactly
        // one ringing period.
        let twice_total_distance = 2.0 * mv.total_distance;
        let proposed_top_speed =
            mv.total_distance / ideal_period - (mv.start_speed + mv.end_speed) / 2.0;
        if proposed_top_speed > mv.start_speed && proposed_top_speed > mv.end_speed {
            let proposed_acceleration = (twice_total_distance
                - (3.0 * mv.start_speed + mv.end_speed) * ideal_period)
                / (2.0 * square(ideal_period));
            let proposed_deceleration = (twice_total_distance
                - (mv.start_speed + 3.0 * mv.end_speed) * ideal_period)
                / (2.0 * square(ideal_period));
            if proposed_acceleration < minimum_acceleration
                || proposed_deceleration < minimum_acceleration
                || proposed_acceleration > mv.acceleration
                || proposed_deceleration > mv.deceleration
            {
                return;
            }
            mv.top_speed = proposed_top_speed;
            mv.acceleration = proposed_acceleration;
            mv.deceleration = proposed_deceleration;
            mv.accel_distance =
                mv.start_speed * ideal_period + (mv.acceleration * square(ideal_period)) / 2.0;
            mv.decel_distance =
                mv.end_speed * ideal_period + (mv.deceleration * square(ideal_period)) / 2.0;
        } else if mv.start_speed < mv.end_speed {
            // Change it into an accelerate-only move, accelerating as slowly
            // as we can.
            let proposed_acceleration =
                (square(mv.end_speed) - square(mv.start_speed)) / twice_total_distance;
            if proposed_acceleration < minimum_acceleration {
                return;
            }
            mv.acceleration = proposed_acceleration;
            mv.top_speed = mv.end_speed;
            mv.accel_distance = mv.total_distance;
            mv.decel_distance = 0.0;
        } else if mv.start_speed > mv.end_speed {
            // Decelerate-only, as slowly as we can.
            let proposed_deceleration =
                (square(mv.start_speed) - square(mv.end_speed)) / twice_total_distance;
            if proposed_deceleration < minimum_acceleration {
                return;
            }
            mv.deceleration = proposed_deceleration;
            mv.top_speed = mv.start_speed;
            mv.accel_distance = 0.0;
            mv.decel_distance = mv.total_distance;
        } else {
            // Start and end speeds are equal, possibly zero; give up.
            return;
        }
    }

    tracing::debug!(
        "adjusted move onto ringing period: a={:.1} d={:.1}",
        mv.acceleration,
        mv.deceleration
    );
}
