use serde::{Deserialize, Serialize};

use super::{amount, string_or_number};

/// 商品服务请求中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInput {
    pub product_id: String,
    pub quantity: i32,
}

/// validate_stock 的回复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValidation {
    pub valid: bool,
    #[serde(default)]
    pub message: String,
}

/// calculate_cart 回复中的定价行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedItem {
    #[serde(deserialize_with = "string_or_number")]
    pub product_id: String,
    pub name_snapshot: String,
    #[serde(deserialize_with = "amount")]
    pub unit_price: i64,
    pub quantity: i32,
    #[serde(deserialize_with = "amount")]
    pub subtotal: i64,
}

/// calculate_cart 的回复
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCalculation {
    #[serde(deserialize_with = "amount")]
    pub total_price: i64,
    #[serde(default)]
    pub items: Vec<PricedItem>,
}

impl CartCalculation {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// decrease_stock 的回复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecrease {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_input_wire_names() {
        let json = serde_json::to_value(ProductInput {
            product_id: "p1".into(),
            quantity: 2,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"productId": "p1", "quantity": 2}));
    }

    #[test]
    fn test_cart_calculation_from_product_service() {
        let calc: CartCalculation = serde_json::from_value(serde_json::json!({
            "totalPrice": 5000.0,
            "items": [{
                "productId": "p1",
                "nameSnapshot": "Polera",
                "unitPrice": 1000,
                "quantity": 5,
                "subtotal": 5000
            }]
        }))
        .unwrap();

        assert_eq!(calc.total_price, 5000);
        assert_eq!(calc.items[0].name_snapshot, "Polera");
        assert!(!calc.is_empty());
    }

    #[test]
    fn test_validation_message_optional() {
        let v: StockValidation = serde_json::from_str(r#"{"valid":true}"#).unwrap();
        assert!(v.valid);
        assert!(v.message.is_empty());
    }
}
