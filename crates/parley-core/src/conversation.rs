// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persisted cursor of the conversation state machine.
//!
//! Each state carries exactly the scratch data its handler needs, so a
//! customer always has a single state and no stale fields from earlier flows.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "context", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingOrderId,
    CollectingOrder {
        #[serde(default)]
        product_hint: Option<String>,
    },
    ConfirmingOrder {
        details: String,
    },
    CollectingService,
    CollectingBookingTime {
        service_type: String,
    },
    ConfirmingBooking {
        service_type: String,
        preferred_time: String,
    },
    CollectingPhone,
    CollectingCallTime {
        phone: String,
    },
    ConfirmingCall {
        phone: String,
        preferred_time: String,
    },
    AwaitingProposalResponse {
        item_name: String,
        proposed_price: f64,
        currency: String,
    },
    HumanTakeover,
}

impl ConversationState {
    /// Stable upper-case label used in logs and interaction meta.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingOrderId => "AWAITING_ORDER_ID",
            Self::CollectingOrder { .. } => "COLLECTING_ORDER",
            Self::ConfirmingOrder { .. } => "CONFIRMING_ORDER",
            Self::CollectingService => "COLLECTING_SERVICE",
            Self::CollectingBookingTime { .. } => "COLLECTING_BOOKING_TIME",
            Self::ConfirmingBooking { .. } => "CONFIRMING_BOOKING",
            Self::CollectingPhone => "COLLECTING_PHONE",
            Self::CollectingCallTime { .. } => "COLLECTING_CALL_TIME",
            Self::ConfirmingCall { .. } => "CONFIRMING_CALL",
            Self::AwaitingProposalResponse { .. } => "AWAITING_PROPOSAL_RESPONSE",
            Self::HumanTakeover => "HUMAN_TAKEOVER",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::HumanTakeover)
    }

    /// Yes/no steps that end a flow.
    pub fn is_confirmation(&self) -> bool {
        matches!(
            self,
            Self::ConfirmingOrder { .. }
                | Self::ConfirmingBooking { .. }
                | Self::ConfirmingCall { .. }
                | Self::AwaitingProposalResponse { .. }
        )
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_state_and_context_separately() {
        let state = ConversationState::ConfirmingBooking {
            service_type: "Haircut".into(),
            preferred_time: "Tomorrow 3pm".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "CONFIRMING_BOOKING");
        assert_eq!(json["context"]["service_type"], "Haircut");
        assert_eq!(json["context"]["preferred_time"], "Tomorrow 3pm");

        let back: ConversationState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn unit_states_have_no_context() {
        let json = serde_json::to_value(ConversationState::Idle).unwrap();
        assert_eq!(json, serde_json::json!({"state": "IDLE"}));
    }

    #[test]
    fn collecting_order_tolerates_missing_hint() {
        let state: ConversationState =
            serde_json::from_str(r#"{"state":"COLLECTING_ORDER","context":{}}"#).unwrap();
        assert_eq!(
            state,
            ConversationState::CollectingOrder { product_hint: None }
        );
    }

    #[test]
    fn only_human_takeover_is_terminal() {
        assert!(ConversationState::HumanTakeover.is_terminal());
        assert!(!ConversationState::Idle.is_terminal());
        assert!(!ConversationState::CollectingPhone.is_terminal());
        assert_eq!(ConversationState::CollectingPhone.to_string(), "COLLECTING_PHONE");
    }
}
