use std::cmp::Ordering;

use crate::detect::Detection;

/// Stable sort: priority descending, then score descending.
pub fn rank(batch: &mut [Detection]) {
    batch.sort_by(compare);
}

fn compare(a: &Detection, b: &Detection) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.score.total_cmp(&a.score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Priority};

    fn det(label: &str, priority: Priority, score: f32) -> Detection {
        Detection {
            label: label.to_string(),
            score,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            priority,
            timestamp: 0,
        }
    }

    #[test]
    fn orders_by_priority_then_score() {
        let mut batch = vec![
            det("chair", Priority::Low, 0.99),
            det("fire", Priority::High, 0.9),
            det("truck", Priority::Medium, 0.5),
            det("smoke", Priority::High, 0.6),
        ];
        rank(&mut batch);
        let labels: Vec<&str> = batch.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["fire", "smoke", "truck", "chair"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let mut batch = vec![
            det("first", Priority::Medium, 0.5),
            det("second", Priority::Medium, 0.5),
            det("third", Priority::Medium, 0.5),
        ];
        rank(&mut batch);
        let labels: Vec<&str> = batch.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "second", "third"]);
    }

    #[test]
    fn empty_batch_is_fine() {
        let mut batch: Vec<Detection> = Vec::new();
        rank(&mut batch);
        assert!(batch.is_empty());
    }
}
