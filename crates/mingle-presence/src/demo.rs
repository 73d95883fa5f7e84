//! Demo-mode fallback: a scripted phase progression for offline clients.
//!
//! When a client fails to establish a real connection within its
//! bootstrap timeout, it may play this timeline locally so the user sees
//! *something* instead of a dead screen. This is a degraded, purely
//! cosmetic UX path: nothing here touches a session worker, nothing is
//! authoritative, and no message from this script may ever be fed back
//! to a server.

use std::time::Duration;

use mingle_protocol::{
    CheckinEntry, Phase, PlateAssignment, ServerMessage, UserId,
};

/// One step of the demo timeline: emit `message` once `after` has
/// elapsed since the timeline started. Offsets are absolute from start
/// and non-decreasing.
#[derive(Debug, Clone)]
pub struct DemoStep {
    pub after: Duration,
    pub message: ServerMessage,
}

/// Builds the scripted progression for a single offline participant.
///
/// The script walks the same phases a real session would: the user
/// checks in alone, receives plate 1, the ready quorum "passes", and the
/// icebreaker opens with a canned topic. Deliberately unhurried so it
/// reads like a real gathering warming up.
pub fn demo_timeline(
    user_id: UserId,
    display_name: &str,
    expected_attendees: u32,
) -> Vec<DemoStep> {
    let me = CheckinEntry {
        user_id,
        display_name: display_name.to_string(),
    };

    vec![
        DemoStep {
            after: Duration::from_secs(1),
            message: ServerMessage::PhaseChange {
                phase: Phase::Checkin,
                previous_phase: Phase::Waiting,
            },
        },
        DemoStep {
            after: Duration::from_secs(2),
            message: ServerMessage::CheckinUpdate {
                checked_in_count: 1,
                expected_attendees,
                checkins: vec![me],
            },
        },
        DemoStep {
            after: Duration::from_secs(5),
            message: ServerMessage::PhaseChange {
                phase: Phase::NumberAssign,
                previous_phase: Phase::Checkin,
            },
        },
        DemoStep {
            after: Duration::from_secs(6),
            message: ServerMessage::NumberAssigned {
                assignments: vec![PlateAssignment {
                    user_id,
                    number_plate: 1,
                }],
            },
        },
        DemoStep {
            after: Duration::from_secs(8),
            message: ServerMessage::ReadyCountUpdate {
                ready_count: 1,
                ready_ratio: 1.0,
            },
        },
        DemoStep {
            after: Duration::from_secs(9),
            message: ServerMessage::PhaseChange {
                phase: Phase::Icebreaker,
                previous_phase: Phase::NumberAssign,
            },
        },
        DemoStep {
            after: Duration::from_secs(11),
            message: ServerMessage::TopicSelected {
                topic_id: 1,
                topic_title: "Two truths and a lie".to_string(),
                selected_by: user_id,
            },
        },
    ]
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_timeline_offsets_are_non_decreasing() {
        let steps = demo_timeline(UserId(1), "Solo", 4);
        for pair in steps.windows(2) {
            assert!(pair[0].after <= pair[1].after);
        }
    }

    #[test]
    fn test_demo_timeline_reaches_icebreaker_phase() {
        let steps = demo_timeline(UserId(1), "Solo", 4);
        assert!(steps.iter().any(|s| matches!(
            s.message,
            ServerMessage::PhaseChange {
                phase: Phase::Icebreaker,
                ..
            }
        )));
    }

    #[test]
    fn test_demo_timeline_assigns_plate_one_to_the_user() {
        let steps = demo_timeline(UserId(9), "Solo", 2);
        let assigned = steps.iter().find_map(|s| match &s.message {
            ServerMessage::NumberAssigned { assignments } => {
                Some(assignments.clone())
            }
            _ => None,
        });
        let assignments = assigned.expect("script must assign a plate");
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].user_id, UserId(9));
        assert_eq!(assignments[0].number_plate, 1);
    }

    #[test]
    fn test_demo_timeline_never_ends_the_session() {
        // The fake session must not tell the user the party is over.
        let steps = demo_timeline(UserId(1), "Solo", 4);
        assert!(!steps
            .iter()
            .any(|s| matches!(s.message, ServerMessage::SessionEnded { .. })));
    }
}
