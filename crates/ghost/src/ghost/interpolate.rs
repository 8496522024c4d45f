use std::collections::VecDeque;

use crate::state::{State, Transform};

/// Samples a ghost's buffered states at `query` (in the ghost's own clock).
///
/// Outside the buffered range the nearest end is returned as is. Inside it, position is blended
/// between the two bracketing states and rotation is taken from the nearer one. Bracketing
/// states from different zones are never blended; the nearer one is returned as is.
pub fn sample(states: &VecDeque<State>, query: i64) -> Option<State> {
    let first = states.front()?;
    let last = states.back()?;

    if query <= first.timestamp as i64 {
        return Some(*first);
    }
    if query >= last.timestamp as i64 {
        return Some(*last);
    }

    // first index with timestamp >= query; 1..len because of the checks above
    let index = states.partition_point(|s| (s.timestamp as i64) < query);
    let upper = &states[index];
    let lower = &states[index - 1];

    if upper.timestamp as i64 == query {
        return Some(*upper);
    }

    let lower_dist = query - lower.timestamp as i64;
    let upper_dist = upper.timestamp as i64 - query;
    let closer = if lower_dist < upper_dist { lower } else { upper };

    if lower.zone != upper.zone {
        return Some(*closer);
    }

    let pct = lower_dist as f64 / (lower_dist + upper_dist) as f64;
    let position = lower.position().lerp(upper.position(), pct);

    Some(State::new(
        lower.peer_id,
        query as u32,
        lower.zone,
        Transform::new(position, closer.rotation()),
    ))
}
