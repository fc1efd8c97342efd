use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::product::ProductInput;

/// 购物车中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: i32,
}

/// 用户购物车
///
/// 存储中的购物车每行数量都大于 0；行数归零时整车从存储中删除，
/// 因此读不到购物车与空购物车等价。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: String,
    #[serde(default)]
    pub items: Vec<CartItem>,
    pub last_updated: DateTime<Utc>,
}

impl Cart {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            items: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 商品当前数量，不存在时为 0
    pub fn quantity_of(&self, product_id: &str) -> i32 {
        self.items
            .iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.quantity)
            .unwrap_or(0)
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.items.iter().any(|item| item.product_id == product_id)
    }

    /// 将商品数量设为目标值
    ///
    /// 目标值大于 0 时替换或追加该行，否则删除该行。
    pub fn set_quantity(&mut self, product_id: &str, quantity: i32) {
        if quantity <= 0 {
            self.remove_item(product_id);
            return;
        }

        match self
            .items
            .iter_mut()
            .find(|item| item.product_id == product_id)
        {
            Some(item) => item.quantity = quantity,
            None => self.items.push(CartItem {
                product_id: product_id.to_string(),
                quantity,
            }),
        }
        self.touch();
    }

    /// 删除一行，返回该行是否存在
    pub fn remove_item(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.product_id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// 转为商品服务的请求载荷
    pub fn product_inputs(&self) -> Vec<ProductInput> {
        self.items
            .iter()
            .map(|item| ProductInput {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
