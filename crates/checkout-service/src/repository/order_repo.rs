//! 订单仓储
//!
//! orders 与 order_items 两张表，订单行在结算时一次写入后不再修改

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::traits::OrderRepositoryTrait;
use crate::error::{CheckoutError, Result};
use crate::models::{NewOrder, Order, OrderItem, OrderStatus};

pub struct OrderRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: i64,
    product_id: String,
    name_snapshot: String,
    unit_price: i64,
    quantity: i32,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            product_id: row.product_id,
            name_snapshot: row.name_snapshot,
            unit_price: row.unit_price,
            quantity: row.quantity,
        }
    }
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 批量加载订单行并挂到对应订单上
    async fn attach_items(&self, mut orders: Vec<Order>) -> Result<Vec<Order>> {
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let rows = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT order_id, product_id, name_snapshot, unit_price, quantity
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            by_order.entry(row.order_id).or_default().push(row.into());
        }
        for order in &mut orders {
            order.items = by_order.remove(&order.id).unwrap_or_default();
        }

        Ok(orders)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    #[instrument(skip(self, order), fields(user_id = %order.user_id, total = order.total))]
    async fn create(&self, order: &NewOrder) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let mut created = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (user_id, total, status, shipping_address)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, total, status, shipping_address, payment_id,
                      stock_committed, created_at, updated_at
            "#,
        )
        .bind(&order.user_id)
        .bind(order.total)
        .bind(OrderStatus::Pending)
        .bind(&order.shipping_address)
        .fetch_one(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, name_snapshot, unit_price, quantity)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(created.id)
            .bind(&item.product_id)
            .bind(&item.name_snapshot)
            .bind(item.unit_price)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        created.items = order.items.clone();
        debug!(order_id = created.id, lines = created.items.len(), "订单已创建");
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total, status, shipping_address, payment_id,
                   stock_committed, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match order {
            Some(order) => Ok(self.attach_items(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total, status, shipping_address, payment_id,
                   stock_committed, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        self.attach_items(orders).await
    }

    async fn find_all(&self) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total, status, shipping_address, payment_id,
                   stock_committed, created_at, updated_at
            FROM orders
            ORDER BY id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.attach_items(orders).await
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckoutError::OrderNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_stock_committed(&self, id: i64, payment_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET stock_committed = TRUE, payment_id = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(payment_id)
        .bind(OrderStatus::Paid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CheckoutError::OrderNotFound(id));
        }
        Ok(())
    }
}
