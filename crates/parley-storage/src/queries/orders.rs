// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orders, bookings, call-backs and the seller notifications they raise.

use parley_core::{Order, ParleyError, SellerNotification};
use rusqlite::{Connection, OptionalExtension, params};

use crate::codec::{enum_col, json_col, to_json, ts, ts_col};
use crate::database::{Database, map_tr_err};

fn insert_notification_row(conn: &Connection, n: &SellerNotification) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO seller_notifications (id, workspace_id, kind, title, body, related_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            n.id,
            n.workspace_id,
            n.kind,
            n.title,
            n.body,
            n.related_id,
            ts(n.created_at)
        ],
    )?;
    Ok(())
}

/// Writes the order and its notification in one transaction.
pub async fn create_order_with_notification(
    db: &Database,
    order: &Order,
    notification: &SellerNotification,
) -> Result<(), ParleyError> {
    let o = order.clone();
    let n = notification.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO orders (id, workspace_id, customer_id, reference, kind, summary,
                                     fields, amount, currency, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    o.id,
                    o.workspace_id,
                    o.customer_id,
                    o.reference,
                    o.kind.to_string(),
                    o.summary,
                    to_json(&o.fields)?,
                    o.amount,
                    o.currency,
                    o.status.to_string(),
                    ts(o.created_at),
                    ts(o.updated_at),
                ],
            )?;
            insert_notification_row(&tx, &n)?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Looks an order up by its customer-facing reference (case-insensitive).
pub async fn find_order(
    db: &Database,
    workspace_id: &str,
    reference: &str,
) -> Result<Option<Order>, ParleyError> {
    let workspace_id = workspace_id.to_string();
    let reference = reference.trim().to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT id, workspace_id, customer_id, reference, kind, summary, fields, amount,
                        currency, status, created_at, updated_at
                 FROM orders WHERE workspace_id = ?1 AND upper(reference) = upper(?2)",
                params![workspace_id, reference],
                |row| {
                    Ok(Order {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        customer_id: row.get(2)?,
                        reference: row.get(3)?,
                        kind: enum_col(row, 4)?,
                        summary: row.get(5)?,
                        fields: json_col(row, 6)?,
                        amount: row.get(7)?,
                        currency: row.get(8)?,
                        status: enum_col(row, 9)?,
                        created_at: ts_col(row, 10)?,
                        updated_at: ts_col(row, 11)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn insert_notification(
    db: &Database,
    notification: &SellerNotification,
) -> Result<(), ParleyError> {
    let n = notification.clone();
    db.connection()
        .call(move |conn| insert_notification_row(conn, &n))
        .await
        .map_err(map_tr_err)
}

pub async fn count_notifications(db: &Database, workspace_id: &str) -> Result<i64, ParleyError> {
    let workspace_id = workspace_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM seller_notifications WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::db;
    use parley_core::{OrderKind, OrderStatus};

    #[tokio::test]
    async fn order_and_notification_are_written_together() {
        let db = db().await;
        let order = Order::new("ws", "cust-1", OrderKind::Booking, "Haircut on Friday")
            .with_field("service", "haircut")
            .with_field("time", "Friday 3pm");
        let note = SellerNotification::new("ws", "booking", "New booking", "Haircut on Friday");
        create_order_with_notification(&db, &order, &note).await.unwrap();

        let found = find_order(&db, "ws", &order.reference.to_lowercase())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, order.id);
        assert_eq!(found.kind, OrderKind::Booking);
        assert_eq!(found.status, OrderStatus::Pending);
        assert_eq!(found.fields["service"], "haircut");
        assert_eq!(count_notifications(&db, "ws").await.unwrap(), 1);
        assert!(find_order(&db, "other", &order.reference).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_notification_rolls_back_order() {
        let db = db().await;
        let first = Order::new("ws", "cust-1", OrderKind::Product, "Scarf");
        let note = SellerNotification::new("ws", "order", "New order", "Scarf");
        create_order_with_notification(&db, &first, &note).await.unwrap();

        // reusing the notification id violates its primary key
        let second = Order::new("ws", "cust-1", OrderKind::Product, "Hat");
        assert!(
            create_order_with_notification(&db, &second, &note)
                .await
                .is_err()
        );
        assert!(find_order(&db, "ws", &second.reference).await.unwrap().is_none());
        assert_eq!(count_notifications(&db, "ws").await.unwrap(), 1);
    }
}
