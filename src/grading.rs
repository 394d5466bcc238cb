use std::cmp::Ordering;
use std::collections::HashMap;

/// Fixed score scale: inclusive lower bounds, evaluated top-down, first match
/// wins. The numeric letter variant ("4", "3.5", ...) is used uniformly.
const SCALE: &[(f64, &str, f64)] = &[
    (80.0, "4", 4.0),
    (75.0, "3.5", 3.5),
    (70.0, "3", 3.0),
    (65.0, "2.5", 2.5),
    (60.0, "2", 2.0),
    (55.0, "1.5", 1.5),
    (50.0, "1", 1.0),
];

pub fn grade_for_score(score: f64) -> (&'static str, f64) {
    for &(min, letter, gpa) in SCALE {
        if score >= min {
            return (letter, gpa);
        }
    }
    ("0", 0.0)
}

/// Parses a free-form score field from the grade grid. Empty or anything that
/// is not a plain optional-decimal number clears the grade (None); it never
/// coerces to zero and never rejects the write.
pub fn parse_score(raw: &str) -> Option<f64> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    let mut dots = 0;
    for c in t.chars() {
        match c {
            '0'..='9' => {}
            '.' => dots += 1,
            _ => return None,
        }
    }
    if dots > 1 {
        return None;
    }
    t.parse::<f64>().ok()
}

/// Mean GPA over a student's graded subjects. A student with no graded
/// subjects has no average and is excluded from ranking.
pub fn average_gpa(gpas: &[f64]) -> Option<f64> {
    if gpas.is_empty() {
        return None;
    }
    Some(gpas.iter().sum::<f64>() / gpas.len() as f64)
}

/// Dense rank by first occurrence over the ranked students' averages,
/// descending: a student's rank is the position of the first occurrence of
/// its GPA in the sorted list, plus one. Ties share a rank and the sequence
/// skips after a tie group ([4.0, 4.0, 3.0] ranks as [1, 1, 3]).
pub fn dense_ranks(averages: &[(String, f64)]) -> HashMap<String, usize> {
    let mut sorted: Vec<f64> = averages.iter().map(|(_, g)| *g).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));

    averages
        .iter()
        .map(|(id, gpa)| {
            let rank = sorted
                .iter()
                .position(|v| v == gpa)
                .map(|i| i + 1)
                .unwrap_or(sorted.len());
            (id.clone(), rank)
        })
        .collect()
}
