use std::collections::HashMap;

/// Outcome of a proximity check over one document's term positions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityResult {
    pub is_proximity: bool,
    /// Pairwise minimum distances recorded while connecting the chain. On
    /// failure this holds whatever was accumulated before the last failed
    /// branch — diagnostic output only, not a partial-success signal.
    pub min_distances: Vec<usize>,
}

impl ProximityResult {
    fn no_match() -> Self {
        Self {
            is_proximity: false,
            min_distances: Vec::new(),
        }
    }
}

/// Minimum pairwise distance between two sorted position lists, two-pointer
/// scan, O(|a| + |b|).
fn min_pair_distance(a: &[usize], b: &[usize]) -> Option<usize> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (mut i, mut j) = (0, 0);
    let mut best = usize::MAX;
    while i < a.len() && j < b.len() {
        let d = a[i].abs_diff(b[j]);
        if d < best {
            best = d;
        }
        if a[i] <= b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    Some(best)
}

/// Decide whether `query_terms` can be connected into one transitively
/// proximate chain: every term joins the chain through a pairwise minimum
/// distance `<= threshold` to some already-connected term.
///
/// Position lists must be sorted ascending (the index stores them that way).
/// Duplicated query terms are collapsed; terms absent from `term_positions`
/// are dropped. An empty remaining set is not proximate; a single remaining
/// term is trivially proximate with no distances.
///
/// Iterative state machine over (remaining set, anchor stack, cursor): the
/// top of the stack tries each remaining term in order, pushing the first
/// one within threshold; exhausting the cursor pops the anchor and abandons
/// its subtree. `min_distances` entries are never unwound on backtrack.
pub fn terms_proximity(
    term_positions: &HashMap<String, Vec<usize>>,
    query_terms: &[String],
    threshold: usize,
) -> ProximityResult {
    let mut remaining: Vec<&str> = Vec::new();
    for term in query_terms {
        let present = term_positions
            .get(term.as_str())
            .map(|p| !p.is_empty())
            .unwrap_or(false);
        if present && !remaining.contains(&term.as_str()) {
            remaining.push(term);
        }
    }

    match remaining.len() {
        0 => return ProximityResult::no_match(),
        1 => {
            return ProximityResult {
                is_proximity: true,
                min_distances: Vec::new(),
            }
        }
        _ => {}
    }

    let seed = remaining.remove(0);
    let mut stack: Vec<&str> = vec![seed];
    let mut cursor = 0usize;
    let mut min_distances: Vec<usize> = Vec::new();

    while !remaining.is_empty() {
        let Some(&anchor) = stack.last() else {
            // Every anchor exhausted with terms still unconnected.
            return ProximityResult {
                is_proximity: false,
                min_distances,
            };
        };

        if cursor >= remaining.len() {
            stack.pop();
            cursor = 0;
            continue;
        }

        let candidate = remaining[cursor];
        let distance = min_pair_distance(&term_positions[anchor], &term_positions[candidate])
            .unwrap_or(usize::MAX);

        if distance <= threshold {
            stack.push(candidate);
            remaining.remove(cursor);
            min_distances.push(distance);
            cursor = 0;
        } else {
            cursor += 1;
        }
    }

    ProximityResult {
        is_proximity: true,
        min_distances,
    }
}
