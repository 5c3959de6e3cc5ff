// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic conversation flows that capture exact structured data.
//!
//! The machine sits in front of the model for orders, bookings, call-backs,
//! order lookups and seller counter-offers. It never invents a value: every
//! field it records is text the customer typed. Replies are authored in the
//! base language and translated by the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use parley_core::{
    Confirmation, ConversationState, Customer, Order, OrderKind, ParleyError,
};
use regex::Regex;
use tracing::debug;

/// Resolves yes/no answers in confirmation steps.
#[async_trait]
pub trait IntentDetector: Send + Sync {
    async fn confirm(&self, workspace_id: &str, text: &str) -> Confirmation;
}

/// Everything needed to record a confirmed flow.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub workspace_id: String,
    pub customer_id: String,
    pub kind: OrderKind,
    pub summary: String,
    pub fields: BTreeMap<String, String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

impl OrderDraft {
    fn new(customer: &Customer, kind: OrderKind, summary: impl Into<String>) -> Self {
        Self {
            workspace_id: customer.workspace_id.clone(),
            customer_id: customer.id.clone(),
            kind,
            summary: summary.into(),
            fields: BTreeMap::new(),
            amount: None,
            currency: None,
        }
    }

    fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

/// Persists a confirmed order and tells the seller about it.
#[async_trait]
pub trait OrderCreator: Send + Sync {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, ParleyError>;
}

#[async_trait]
pub trait OrderLookup: Send + Sync {
    async fn find_order(
        &self,
        workspace_id: &str,
        reference: &str,
    ) -> Result<Option<Order>, ParleyError>;
}

/// Result of feeding one message to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Not a state-machine turn; run the full pipeline.
    Defer,
    /// A human owns the conversation; stay silent.
    Hold,
    Reply {
        text: String,
        next: ConversationState,
        /// Set when this step confirmed an order.
        order: Option<Order>,
    },
}

impl Step {
    fn reply(text: impl Into<String>, next: ConversationState) -> Self {
        Self::Reply {
            text: text.into(),
            next,
            order: None,
        }
    }
}

static ORDER_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ORD|BKG|CALL)-[A-Z0-9]{4,}\b").expect("valid regex")
});

pub const CANCELLED_REPLY: &str = "Okay, I've cancelled that. Is there anything else I can help with?";

/// The question that starts (or repeats) a state's step.
pub fn prompt_for(state: &ConversationState) -> Option<String> {
    use ConversationState::*;
    let text = match state {
        Idle | HumanTakeover => return None,
        AwaitingOrderId => {
            "Please send your order reference (for example ORD-1A2B3C4D), or type cancel.".into()
        }
        CollectingOrder { product_hint: Some(hint) } => {
            format!("Which options and quantity of {hint} would you like? Type cancel to stop.")
        }
        CollectingOrder { product_hint: None } => {
            "What would you like to order? Include the item and quantity, or type cancel.".into()
        }
        ConfirmingOrder { details } => {
            format!("Please confirm your order: {details}. Reply yes to place it or no to cancel.")
        }
        CollectingService => "Which service would you like to book? Type cancel to stop.".into(),
        CollectingBookingTime { service_type } => {
            format!("When would you like to book {service_type}?")
        }
        ConfirmingBooking {
            service_type,
            preferred_time,
        } => format!(
            "Please confirm: {service_type} on {preferred_time}. Reply yes to book or no to cancel."
        ),
        CollectingPhone => {
            "What phone number should we call? Type cancel to stop.".into()
        }
        CollectingCallTime { .. } => "When is a good time to call you?".into(),
        ConfirmingCall {
            phone,
            preferred_time,
        } => format!(
            "Please confirm: we call {phone} at {preferred_time}. Reply yes to confirm or no to cancel."
        ),
        AwaitingProposalResponse {
            item_name,
            proposed_price,
            currency,
        } => format!(
            "We can offer {item_name} for {} {currency}. Would you like to accept? Reply yes or no.",
            format_price(*proposed_price)
        ),
    };
    Some(text)
}

fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.0}")
    } else {
        format!("{price:.2}")
    }
}

/// Whether the whole message is the universal escape word.
pub fn is_cancel(input: &str) -> bool {
    input
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .eq_ignore_ascii_case("cancel")
}

/// Normalises a phone number with 7 to 15 digits, keeping a leading `+`.
pub fn parse_phone(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || " +-().".contains(c))
    {
        return None;
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    Some(if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    })
}

/// Finds an order reference in free text.
pub fn parse_order_reference(input: &str) -> Option<String> {
    if let Some(m) = ORDER_REFERENCE.find(input) {
        return Some(m.as_str().to_uppercase());
    }
    let token = input.trim().trim_matches(|c: char| c.is_ascii_punctuation() && c != '-');
    let plausible = token.len() >= 4
        && !token.contains(char::is_whitespace)
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    plausible.then(|| token.to_uppercase())
}

pub struct StateMachine {
    detector: Arc<dyn IntentDetector>,
    creator: Arc<dyn OrderCreator>,
    lookup: Arc<dyn OrderLookup>,
}

impl StateMachine {
    pub fn new(
        detector: Arc<dyn IntentDetector>,
        creator: Arc<dyn OrderCreator>,
        lookup: Arc<dyn OrderLookup>,
    ) -> Self {
        Self {
            detector,
            creator,
            lookup,
        }
    }

    /// Advances the customer's conversation by one message.
    pub async fn step(&self, customer: &Customer, input: &str) -> Result<Step, ParleyError> {
        let state = &customer.state;
        match state {
            ConversationState::Idle => return Ok(Step::Defer),
            ConversationState::HumanTakeover => return Ok(Step::Hold),
            _ => {}
        }
        if is_cancel(input) {
            debug!(customer_id = %customer.id, from = %state, "flow cancelled");
            return Ok(Step::reply(CANCELLED_REPLY, ConversationState::Idle));
        }

        let text = input.trim();
        if text.is_empty() {
            return Ok(self.repeat(state));
        }

        use ConversationState::*;
        let step = match state {
            Idle | HumanTakeover => Step::Defer,

            AwaitingOrderId => self.lookup_order(customer, text).await?,

            CollectingOrder { product_hint } => {
                let details = match product_hint {
                    Some(hint) if !text.to_lowercase().contains(&hint.to_lowercase()) => {
                        format!("{hint}, {text}")
                    }
                    _ => text.to_string(),
                };
                self.ask(ConfirmingOrder { details })
            }

            ConfirmingOrder { details } => {
                match self.detector.confirm(&customer.workspace_id, text).await {
                    Confirmation::Yes => {
                        let draft =
                            OrderDraft::new(customer, OrderKind::Product, details.clone())
                                .field("details", details);
                        let order = self.creator.create_order(draft).await?;
                        Step::Reply {
                            text: format!(
                                "Thank you! Your order is placed: {details}. Reference: {}. We'll confirm it shortly.",
                                order.reference
                            ),
                            next: Idle,
                            order: Some(order),
                        }
                    }
                    Confirmation::No => Step::reply("No problem, I've cancelled that order.", Idle),
                    Confirmation::Unknown => self.repeat(state),
                }
            }

            CollectingService => self.ask(CollectingBookingTime {
                service_type: text.to_string(),
            }),

            CollectingBookingTime { service_type } => self.ask(ConfirmingBooking {
                service_type: service_type.clone(),
                preferred_time: text.to_string(),
            }),

            ConfirmingBooking {
                service_type,
                preferred_time,
            } => match self.detector.confirm(&customer.workspace_id, text).await {
                Confirmation::Yes => {
                    let draft = OrderDraft::new(
                        customer,
                        OrderKind::Booking,
                        format!("{service_type} on {preferred_time}"),
                    )
                    .field("service_type", service_type)
                    .field("preferred_time", preferred_time);
                    let order = self.creator.create_order(draft).await?;
                    Step::Reply {
                        text: format!(
                            "Your booking for {service_type} on {preferred_time} is requested. Reference: {}. We'll confirm it shortly.",
                            order.reference
                        ),
                        next: Idle,
                        order: Some(order),
                    }
                }
                Confirmation::No => Step::reply("No problem, I've cancelled that booking.", Idle),
                Confirmation::Unknown => self.repeat(state),
            },

            CollectingPhone => match parse_phone(text) {
                Some(phone) => self.ask(CollectingCallTime { phone }),
                None => Step::reply(
                    "That doesn't look like a phone number. Please send a number with 7 to 15 digits, or type cancel.",
                    state.clone(),
                ),
            },

            CollectingCallTime { phone } => self.ask(ConfirmingCall {
                phone: phone.clone(),
                preferred_time: text.to_string(),
            }),

            ConfirmingCall {
                phone,
                preferred_time,
            } => match self.detector.confirm(&customer.workspace_id, text).await {
                Confirmation::Yes => {
                    let draft = OrderDraft::new(
                        customer,
                        OrderKind::Call,
                        format!("Call {phone} at {preferred_time}"),
                    )
                    .field("phone", phone)
                    .field("preferred_time", preferred_time);
                    let order = self.creator.create_order(draft).await?;
                    Step::Reply {
                        text: format!(
                            "Great, we'll call you at {phone} around {preferred_time}. Reference: {}.",
                            order.reference
                        ),
                        next: Idle,
                        order: Some(order),
                    }
                }
                Confirmation::No => Step::reply("No problem, I've cancelled the call request.", Idle),
                Confirmation::Unknown => self.repeat(state),
            },

            AwaitingProposalResponse {
                item_name,
                proposed_price,
                currency,
            } => match self.detector.confirm(&customer.workspace_id, text).await {
                Confirmation::Yes => {
                    let price = format_price(*proposed_price);
                    let mut draft = OrderDraft::new(
                        customer,
                        OrderKind::Product,
                        format!("{item_name} at {price} {currency}"),
                    )
                    .field("item_name", item_name);
                    draft.amount = Some(*proposed_price);
                    draft.currency = Some(currency.clone());
                    let order = self.creator.create_order(draft).await?;
                    Step::Reply {
                        text: format!(
                            "Deal! Your order for {item_name} at {price} {currency} is placed. Reference: {}.",
                            order.reference
                        ),
                        next: Idle,
                        order: Some(order),
                    }
                }
                Confirmation::No => Step::reply(
                    "No problem. Let us know if you change your mind.",
                    Idle,
                ),
                Confirmation::Unknown => self.repeat(state),
            },
        };
        Ok(step)
    }

    async fn lookup_order(&self, customer: &Customer, text: &str) -> Result<Step, ParleyError> {
        let Some(reference) = parse_order_reference(text) else {
            return Ok(self.repeat(&customer.state));
        };
        let found = self
            .lookup
            .find_order(&customer.workspace_id, &reference)
            .await?
            .filter(|o| o.customer_id == customer.id);
        Ok(match found {
            Some(order) => Step::reply(
                format!(
                    "Order {}: {}. Status: {}.",
                    order.reference, order.summary, order.status
                ),
                ConversationState::Idle,
            ),
            None => Step::reply(
                format!(
                    "I couldn't find an order with reference {reference}. Please check it and send it again, or type cancel."
                ),
                customer.state.clone(),
            ),
        })
    }

    /// Moves to `next` and asks its question.
    fn ask(&self, next: ConversationState) -> Step {
        let text = prompt_for(&next).unwrap_or_default();
        Step::reply(text, next)
    }

    /// Stays put and repeats the current question.
    fn repeat(&self, state: &ConversationState) -> Step {
        self.ask(state.clone())
    }
}
