use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::capabilities::OrderQueries;
use crate::error::Result;
use crate::models::Order;
use crate::repository::OrderRepositoryTrait;

/// 订单查询服务
pub struct OrderQueryService {
    orders: Arc<dyn OrderRepositoryTrait>,
}

impl OrderQueryService {
    pub fn new(orders: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl OrderQueries for OrderQueryService {
    #[instrument(skip(self))]
    async fn user_orders(&self, user_id: &str) -> Result<Vec<Order>> {
        let orders = self.orders.find_by_user(user_id).await?;
        debug!(user_id, count = orders.len(), "查询用户订单");
        Ok(orders)
    }

    #[instrument(skip(self))]
    async fn all_orders(&self) -> Result<Vec<Order>> {
        self.orders.find_all().await
    }
}
