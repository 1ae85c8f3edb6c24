use super::models::{MatchType, MissionStep, StepMatch, Zone};

/// Minimum similarity a fuzzy candidate must exceed to be accepted.
pub const FUZZY_THRESHOLD: f64 = 0.7;

/// Map the robot's current node onto a step of the mission.
///
/// Exact position matches win, then zone membership, then the best fuzzy
/// candidate above [`FUZZY_THRESHOLD`]. When nothing qualifies no index is
/// reported.
pub fn correlate(node_code: &str, steps: &[MissionStep], zones: &[Zone]) -> StepMatch {
    let node = node_code.trim();
    if node.is_empty() || steps.is_empty() {
        return StepMatch::unmatched();
    }

    if let Some(idx) = steps
        .iter()
        .position(|s| s.position.trim().eq_ignore_ascii_case(node))
    {
        return matched(idx, steps.len(), MatchType::Exact, Some(1.0), false);
    }

    if let Some(idx) = steps.iter().position(|s| {
        zone_for_position(&s.position, zones)
            .map(|z| node_in_zone(node, z))
            .unwrap_or(false)
    }) {
        return matched(idx, steps.len(), MatchType::Area, None, true);
    }

    let mut best: Option<(usize, f64)> = None;
    for (idx, step) in steps.iter().enumerate() {
        let score = similarity(node, step.position.trim());
        if score <= FUZZY_THRESHOLD {
            continue;
        }
        // strict comparison keeps the earliest step on ties
        if best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((idx, score));
        }
    }

    match best {
        Some((idx, score)) => matched(idx, steps.len(), MatchType::Fuzzy, Some(score), false),
        None => StepMatch::unmatched(),
    }
}

/// Prefix/suffix similarity in `[0, 1]`, case-insensitive.
///
/// The shared prefix counts double, the shared suffix of what remains after
/// the prefix counts once, normalised by twice the longer length. Permuted or
/// rotated codes score poorly even when they share every character.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 0.0;
    }

    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    (2 * prefix + suffix) as f64 / (2 * max_len) as f64
}

/// Zone whose name or code equals the given step position.
pub fn zone_for_position<'a>(position: &str, zones: &'a [Zone]) -> Option<&'a Zone> {
    let position = position.trim();
    zones.iter().find(|z| {
        z.name.trim().eq_ignore_ascii_case(position) || z.code.trim().eq_ignore_ascii_case(position)
    })
}

/// Zone containing the node, resolved through the zone code prefix.
/// The longest matching code wins so nested zones resolve to the inner one.
pub fn zone_of_node<'a>(node_code: &str, zones: &'a [Zone]) -> Option<&'a Zone> {
    zones
        .iter()
        .filter(|z| node_in_zone(node_code, z))
        .max_by_key(|z| z.code.trim().len())
}

fn node_in_zone(node_code: &str, zone: &Zone) -> bool {
    let code = zone.code.trim().to_lowercase();
    !code.is_empty() && node_code.trim().to_lowercase().starts_with(&code)
}

fn matched(
    idx: usize,
    total: usize,
    match_type: MatchType,
    confidence: Option<f64>,
    is_in_area: bool,
) -> StepMatch {
    StepMatch {
        current_step_index: Some(idx),
        match_type,
        confidence,
        is_in_area,
        completed_steps: (0..idx).collect(),
        progress_percentage: round1(idx as f64 / total as f64 * 100.0),
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
