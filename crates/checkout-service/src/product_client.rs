//! 商品服务客户端
//!
//! 库存校验、购物车定价与库存扣减都通过 RPC 委托给商品服务，
//! 请求数据为裸的 `[{productId, quantity}]` 数组。

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::models::{CartCalculation, ProductInput, StockDecrease, StockValidation};
use crate::rpc::RpcClient;

pub const VALIDATE_STOCK: &str = "validate_stock";
pub const CALCULATE_CART: &str = "calculate_cart";
pub const DECREASE_STOCK: &str = "decrease_stock";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn validate_stock(&self, items: &[ProductInput]) -> Result<StockValidation>;

    async fn calculate_cart(&self, items: &[ProductInput]) -> Result<CartCalculation>;

    async fn decrease_stock(&self, items: &[ProductInput]) -> Result<StockDecrease>;
}

pub struct ProductRpcClient {
    rpc: RpcClient,
}

impl ProductRpcClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl ProductCatalog for ProductRpcClient {
    #[instrument(skip(self, items), fields(lines = items.len()))]
    async fn validate_stock(&self, items: &[ProductInput]) -> Result<StockValidation> {
        let result: StockValidation = self.rpc.call(VALIDATE_STOCK, items).await?;
        debug!(valid = result.valid, message = %result.message, "库存校验完成");
        Ok(result)
    }

    #[instrument(skip(self, items), fields(lines = items.len()))]
    async fn calculate_cart(&self, items: &[ProductInput]) -> Result<CartCalculation> {
        self.rpc.call(CALCULATE_CART, items).await
    }

    #[instrument(skip(self, items), fields(lines = items.len()))]
    async fn decrease_stock(&self, items: &[ProductInput]) -> Result<StockDecrease> {
        self.rpc.call(DECREASE_STOCK, items).await
    }
}
