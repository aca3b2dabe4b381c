//! Safety classification of raw backend output.
//!
//! Rules are case-insensitive substring matches on the label, evaluated in a fixed
//! order; the first match wins:
//!
//! 1. people: HIGH above the alert threshold, MEDIUM otherwise
//! 2. fire, smoke, danger, emergency: HIGH
//! 3. safety equipment (helmet, hard hat, vest): MEDIUM
//! 4. vehicles and machinery: MEDIUM
//! 5. anything else: LOW

use regex::Regex;
use std::sync::OnceLock;

use crate::detect::{Detection, Priority, RawDetection};

struct Rules {
    person: Regex,
    emergency: Regex,
    equipment: Regex,
    vehicle: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| Rules {
        person: Regex::new(r"(?i)person|people|human|worker").expect("static pattern"),
        emergency: Regex::new(r"(?i)fire|smoke|danger|emergency").expect("static pattern"),
        equipment: Regex::new(r"(?i)helmet|hard hat|vest|safety").expect("static pattern"),
        vehicle: Regex::new(r"(?i)truck|vehicle|machine|equipment").expect("static pattern"),
    })
}

/// Map a label and score to a priority tier.
pub fn classify(label: &str, score: f32, alert_threshold: f32) -> Priority {
    let rules = rules();
    if rules.person.is_match(label) {
        return if score > alert_threshold {
            Priority::High
        } else {
            Priority::Medium
        };
    }
    if rules.emergency.is_match(label) {
        return Priority::High;
    }
    if rules.equipment.is_match(label) || rules.vehicle.is_match(label) {
        return Priority::Medium;
    }
    Priority::Low
}

/// Filter raw detections by `threshold` and classify the survivors.
///
/// Raw detections outside the data-model bounds are repaired or dropped first.
/// Every detection in the batch gets the same `timestamp`.
pub fn classify_all(
    raw: Vec<RawDetection>,
    threshold: f32,
    alert_threshold: f32,
    timestamp: u64,
) -> Vec<Detection> {
    raw.into_iter()
        .filter_map(RawDetection::sanitized)
        .filter(|det| det.score >= threshold)
        .map(|det| Detection {
            priority: classify(&det.label, det.score, alert_threshold),
            label: det.label,
            score: det.score,
            bbox: det.bbox,
            timestamp,
        })
        .collect()
}
