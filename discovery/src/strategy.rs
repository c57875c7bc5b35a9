use crate::settings::JoinStrategy;
use rand::Rng;
use std::time::Duration;

/// Delay before the next join signal is delivered to the coordinator.
///
/// The locking strategy signals immediately and leaves mutual exclusion to
/// the backend lock. The lockless strategy skips a random number of turns to
/// spread simultaneous bootstrap attempts across a window.
pub(crate) fn next_join_delay(strategy: &JoinStrategy) -> Duration {
    match strategy {
        JoinStrategy::Locking { .. } => Duration::ZERO,
        JoinStrategy::Lockless {
            turn_period,
            max_turns,
        } => *turn_period * draw_turns(*max_turns, &mut rand::thread_rng()),
    }
}

/// Uniform draw from `[0, max_turns)`.
pub(crate) fn draw_turns<R: Rng>(max_turns: u32, rng: &mut R) -> u32 {
    rng.gen_range(0..max_turns)
}
