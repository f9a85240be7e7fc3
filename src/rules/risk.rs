use crate::rules::severity::EventType;

/// Per-type contribution to the risk score, before confidence weighting.
pub fn base_delta(event_type: EventType) -> f64 {
    match event_type {
        EventType::MultiPerson => 50.0,
        EventType::SuspiciousObject => 20.0,
        EventType::FaceMissing | EventType::CameraBlocked => 15.0,
        EventType::LookAway => 5.0,
        EventType::LowLight => 2.0,
        // Types with no listed weight count as background noise.
        EventType::TabSwitch | EventType::Unknown => 1.0,
    }
}

/// One scoring step: multiplicative decay, then the weighted delta, floored
/// at zero. With no events the score is non-increasing by construction.
pub fn next_score(current: f64, decay: f64, event_type: EventType, confidence: Option<f64>) -> f64 {
    let delta = base_delta(event_type) * confidence.unwrap_or(1.0);
    (current * decay + delta).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_weights_the_delta() {
        // 5 * 0.8 on a zero score.
        let score = next_score(0.0, 0.98, EventType::LookAway, Some(0.8));
        assert!((score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn missing_confidence_counts_in_full() {
        let score = next_score(0.0, 0.98, EventType::MultiPerson, None);
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn prior_score_decays() {
        let score = next_score(100.0, 0.98, EventType::LowLight, Some(1.0));
        assert!((score - 100.0).abs() < 1e-9); // 98 + 2
    }

    #[test]
    fn score_never_goes_negative() {
        assert_eq!(next_score(0.0, 0.98, EventType::Unknown, Some(0.0)), 0.0);
    }
}
