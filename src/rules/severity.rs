use crate::storage::types::Severity;

/// Event types the rules engine narrows to. Anything else is admitted and
/// stored for audit, but attracts no rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    MultiPerson,
    FaceMissing,
    CameraBlocked,
    TabSwitch,
    LookAway,
    LowLight,
    SuspiciousObject,
    Unknown,
}

impl EventType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "MULTI_PERSON" => EventType::MultiPerson,
            "FACE_MISSING" => EventType::FaceMissing,
            "CAMERA_BLOCKED" => EventType::CameraBlocked,
            "TAB_SWITCH" => EventType::TabSwitch,
            "LOOK_AWAY" => EventType::LookAway,
            "LOW_LIGHT" => EventType::LowLight,
            "SUSPICIOUS_OBJECT" => EventType::SuspiciousObject,
            _ => EventType::Unknown,
        }
    }
}

/// Outcome of the per-type threshold policy for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleDecision {
    /// Severity computed by the policy, if it assigns one.
    pub computed: Option<Severity>,
    /// Whether this event crossed the type's alerting rule.
    pub fired: bool,
}

impl RuleDecision {
    const NONE: RuleDecision = RuleDecision {
        computed: None,
        fired: false,
    };
}

/// The severity policy table. `window_count` is the number of events of
/// this type within the 5-minute evaluation window, including the current
/// one.
pub fn evaluate(event_type: EventType, window_count: u64) -> RuleDecision {
    match event_type {
        EventType::MultiPerson => RuleDecision {
            computed: Some(Severity::Critical),
            fired: true,
        },
        EventType::SuspiciousObject => RuleDecision {
            computed: Some(Severity::Medium),
            fired: true,
        },
        EventType::FaceMissing | EventType::CameraBlocked => {
            if window_count >= 3 {
                RuleDecision {
                    computed: Some(Severity::High),
                    fired: true,
                }
            } else {
                RuleDecision {
                    computed: Some(Severity::Low),
                    fired: false,
                }
            }
        }
        EventType::TabSwitch => {
            if window_count >= 2 {
                RuleDecision {
                    computed: Some(Severity::Medium),
                    fired: true,
                }
            } else {
                RuleDecision::NONE
            }
        }
        EventType::LookAway => {
            if window_count >= 5 {
                RuleDecision {
                    computed: Some(Severity::Medium),
                    fired: true,
                }
            } else {
                RuleDecision::NONE
            }
        }
        // Recorded only.
        EventType::LowLight | EventType::Unknown => RuleDecision::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_person_is_immediately_critical() {
        let decision = evaluate(EventType::MultiPerson, 1);
        assert!(decision.fired);
        assert_eq!(decision.computed, Some(Severity::Critical));
    }

    #[test]
    fn face_missing_escalates_at_three() {
        assert!(!evaluate(EventType::FaceMissing, 2).fired);
        assert_eq!(
            evaluate(EventType::FaceMissing, 2).computed,
            Some(Severity::Low)
        );
        let third = evaluate(EventType::FaceMissing, 3);
        assert!(third.fired);
        assert_eq!(third.computed, Some(Severity::High));
    }

    #[test]
    fn camera_blocked_is_its_own_rule() {
        // Distinct from FACE_MISSING end to end, same thresholds.
        let decision = evaluate(EventType::CameraBlocked, 3);
        assert!(decision.fired);
        assert_eq!(decision.computed, Some(Severity::High));
    }

    #[test]
    fn tab_switch_and_look_away_thresholds() {
        assert!(!evaluate(EventType::TabSwitch, 1).fired);
        assert!(evaluate(EventType::TabSwitch, 2).fired);
        assert!(!evaluate(EventType::LookAway, 4).fired);
        let fifth = evaluate(EventType::LookAway, 5);
        assert!(fifth.fired);
        assert_eq!(fifth.computed, Some(Severity::Medium));
    }

    #[test]
    fn low_light_and_unknown_never_alert() {
        assert_eq!(evaluate(EventType::LowLight, 100), RuleDecision::NONE);
        assert_eq!(evaluate(EventType::Unknown, 100), RuleDecision::NONE);
    }
}
