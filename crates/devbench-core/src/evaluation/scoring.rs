//! Turn-capped scoring for lifecycle tasks.

/// Highest score reachable on a given 1-based turn: 5, then 3, then 1.
pub fn turn_cap(turn: u32) -> u32 {
    match turn {
        0 | 1 => 5,
        2 => 3,
        _ => 1,
    }
}

/// Scores a lifecycle run, penalizing answers that needed retries.
///
/// A full pass earns the turn's cap; otherwise the pass ratio on a 0–5 scale
/// is rounded and capped.
pub fn score_for_turn(turn: u32, total_tests: u32, passed_tests: u32) -> u32 {
    let cap = turn_cap(turn);
    if total_tests > 0 && passed_tests == total_tests {
        return cap;
    }
    let partial = (f64::from(passed_tests) / f64::from(total_tests.max(1)) * 5.0).round() as u32;
    partial.min(cap)
}
