// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store-backed order creation and lookup for the state machine.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{Order, OrderKind, OrderStore, ParleyError, SellerNotification};
use tracing::info;

use crate::state_machine::{OrderCreator, OrderDraft, OrderLookup};

pub struct StoreOrders {
    store: Arc<dyn OrderStore>,
}

impl StoreOrders {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

fn notification_for(order: &Order) -> SellerNotification {
    let (kind, title) = match order.kind {
        OrderKind::Product => ("new_order", "New order"),
        OrderKind::Booking => ("new_booking", "New booking request"),
        OrderKind::Call => ("call_request", "Call-back requested"),
    };
    let mut body = format!("{} ({})", order.summary, order.reference);
    for (k, v) in &order.fields {
        body.push_str(&format!("\n{k}: {v}"));
    }
    let mut notification =
        SellerNotification::new(&order.workspace_id, kind, format!("{title} {}", order.reference), body);
    notification.related_id = Some(order.id.clone());
    notification
}

#[async_trait]
impl OrderCreator for StoreOrders {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, ParleyError> {
        let mut order = Order::new(
            draft.workspace_id,
            draft.customer_id,
            draft.kind,
            draft.summary,
        );
        order.fields = draft.fields;
        order.amount = draft.amount;
        order.currency = draft.currency;

        let notification = notification_for(&order);
        self.store
            .create_order_with_notification(&order, &notification)
            .await?;
        info!(
            workspace_id = %order.workspace_id,
            reference = %order.reference,
            kind = %order.kind,
            "order captured"
        );
        Ok(order)
    }
}

#[async_trait]
impl OrderLookup for StoreOrders {
    async fn find_order(
        &self,
        workspace_id: &str,
        reference: &str,
    ) -> Result<Option<Order>, ParleyError> {
        self.store.find_order(workspace_id, reference).await
    }
}
