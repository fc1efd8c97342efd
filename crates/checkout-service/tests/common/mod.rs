//! 集成测试共用的内存实现
//!
//! mockall 生成的 Mock 只在库自身的单元测试中可见，这里用内存结构替代外部依赖。

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cart_shared::retry::RetryPolicy;
use chrono::Utc;
use checkout_service::dead_letter::DeadLetterSink;
use checkout_service::error::{CheckoutError, Result};
use checkout_service::events::{OrderEvent, OrderEventPublisher, SupervisedPublisher};
use checkout_service::lock::LocalLock;
use checkout_service::models::{
    Cart, CartCalculation, NewOrder, Order, OrderItem, OrderStatus, PaymentStatusDetails,
    PricedItem, ProductInput, StockDecrease, StockValidation,
};
use checkout_service::payment::PaymentGateway;
use checkout_service::product_client::ProductCatalog;
use checkout_service::repository::{CartRepositoryTrait, OrderRepositoryTrait};
use checkout_service::service::{CartService, CheckoutService, PaymentReconciler};

pub const CHECKOUT_TTL: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// 购物车存储
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCarts {
    carts: Mutex<HashMap<String, (Cart, Option<Duration>)>>,
    pub deletes: AtomicU32,
}

impl MemoryCarts {
    pub fn stored(&self, user_id: &str) -> Option<Cart> {
        self.carts
            .lock()
            .unwrap()
            .get(user_id)
            .map(|(cart, _)| cart.clone())
    }

    pub fn ttl_of(&self, user_id: &str) -> Option<Duration> {
        self.carts
            .lock()
            .unwrap()
            .get(user_id)
            .and_then(|(_, ttl)| *ttl)
    }
}

#[async_trait]
impl CartRepositoryTrait for MemoryCarts {
    async fn get(&self, user_id: &str) -> Result<Cart> {
        Ok(self.stored(user_id).unwrap_or_else(|| Cart::empty(user_id)))
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        self.carts.lock().unwrap().insert(
            cart.user_id.clone(),
            (cart.clone(), Some(Duration::from_secs(5 * 24 * 3600))),
        );
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.carts.lock().unwrap().remove(user_id);
        Ok(())
    }

    async fn ttl(&self, user_id: &str) -> Result<Option<Duration>> {
        Ok(self.ttl_of(user_id))
    }

    async fn extend_ttl(&self, user_id: &str, ttl: Duration) -> Result<()> {
        if let Some(entry) = self.carts.lock().unwrap().get_mut(user_id) {
            entry.1 = Some(ttl);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 订单存储
// ---------------------------------------------------------------------------

pub struct MemoryOrders {
    orders: Mutex<Vec<Order>>,
    next_id: AtomicI64,
}

impl MemoryOrders {
    pub fn starting_at(id: i64) -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(id),
        }
    }

    pub fn get(&self, id: i64) -> Option<Order> {
        self.orders.lock().unwrap().iter().find(|o| o.id == id).cloned()
    }

    fn modify(&self, id: i64, f: impl FnOnce(&mut Order)) -> Result<()> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(CheckoutError::OrderNotFound(id))?;
        f(order);
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryOrders {
    async fn create(&self, new: &NewOrder) -> Result<Order> {
        let now = Utc::now();
        let order = Order {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            user_id: new.user_id.clone(),
            total: new.total,
            status: OrderStatus::Pending,
            shipping_address: new.shipping_address.clone(),
            payment_id: None,
            stock_committed: false,
            created_at: now,
            updated_at: now,
            items: new.items.clone(),
        };
        self.orders.lock().unwrap().push(order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.get(id))
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<Order>> {
        Ok(self.orders.lock().unwrap().clone())
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<()> {
        self.modify(id, |o| o.status = status)
    }

    async fn mark_stock_committed(&self, id: i64, payment_id: &str) -> Result<()> {
        self.modify(id, |o| {
            o.stock_committed = true;
            o.payment_id = Some(payment_id.to_string());
            o.status = OrderStatus::Paid;
        })
    }
}

// ---------------------------------------------------------------------------
// 商品服务
// ---------------------------------------------------------------------------

pub struct FakeCatalog {
    /// product_id -> (名称, 单价, 库存)
    products: Mutex<HashMap<String, (String, i64, i32)>>,
    pub validations: AtomicU32,
    pub decrements: Mutex<Vec<Vec<ProductInput>>>,
    pub fail_decrement: Mutex<bool>,
    /// 模拟商品服务的响应耗时
    pub validate_delay: Mutex<Duration>,
    pub decrement_delay: Mutex<Duration>,
}

impl FakeCatalog {
    pub fn with(products: &[(&str, &str, i64, i32)]) -> Self {
        Self {
            products: Mutex::new(
                products
                    .iter()
                    .map(|(id, name, price, stock)| {
                        (id.to_string(), (name.to_string(), *price, *stock))
                    })
                    .collect(),
            ),
            validations: AtomicU32::new(0),
            decrements: Mutex::new(Vec::new()),
            fail_decrement: Mutex::new(false),
            validate_delay: Mutex::new(Duration::ZERO),
            decrement_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn stock_of(&self, product_id: &str) -> i32 {
        self.products
            .lock()
            .unwrap()
            .get(product_id)
            .map(|(_, _, stock)| *stock)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProductCatalog for FakeCatalog {
    async fn validate_stock(&self, items: &[ProductInput]) -> Result<StockValidation> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.validate_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let products = self.products.lock().unwrap();
        for item in items {
            match products.get(&item.product_id) {
                Some((name, _, stock)) if *stock < item.quantity => {
                    return Ok(StockValidation {
                        valid: false,
                        message: format!("Stock insuficiente para {name}"),
                    });
                }
                Some(_) => {}
                None => {
                    return Ok(StockValidation {
                        valid: false,
                        message: format!("Producto {} no encontrado", item.product_id),
                    });
                }
            }
        }
        Ok(StockValidation {
            valid: true,
            message: String::new(),
        })
    }

    async fn calculate_cart(&self, items: &[ProductInput]) -> Result<CartCalculation> {
        let products = self.products.lock().unwrap();
        let items: Vec<PricedItem> = items
            .iter()
            .filter_map(|item| {
                products.get(&item.product_id).map(|(name, price, _)| PricedItem {
                    product_id: item.product_id.clone(),
                    name_snapshot: name.clone(),
                    unit_price: *price,
                    quantity: item.quantity,
                    subtotal: price * i64::from(item.quantity),
                })
            })
            .collect();
        Ok(CartCalculation {
            total_price: items.iter().map(|i| i.subtotal).sum(),
            items,
        })
    }

    async fn decrease_stock(&self, items: &[ProductInput]) -> Result<StockDecrease> {
        let delay = *self.decrement_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.decrements.lock().unwrap().push(items.to_vec());
        if *self.fail_decrement.lock().unwrap() {
            return Err(CheckoutError::RpcTimeout {
                pattern: "decrease_stock".into(),
            });
        }
        let mut products = self.products.lock().unwrap();
        for item in items {
            if let Some(entry) = products.get_mut(&item.product_id) {
                entry.2 -= item.quantity;
            }
        }
        Ok(StockDecrease {
            success: true,
            message: String::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// 支付网关
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeGateway {
    payments: Mutex<HashMap<String, PaymentStatusDetails>>,
    pub created: Mutex<Vec<(i64, i64, Vec<OrderItem>)>>,
}

impl FakeGateway {
    pub fn set_payment(&self, payment_id: &str, status: &str, reference: &str) {
        self.payments.lock().unwrap().insert(
            payment_id.to_string(),
            PaymentStatusDetails {
                status: status.to_string(),
                external_reference: Some(reference.to_string()),
            },
        );
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(
        &self,
        order_id: i64,
        total: i64,
        items: &[OrderItem],
    ) -> Result<String> {
        self.created
            .lock()
            .unwrap()
            .push((order_id, total, items.to_vec()));
        Ok(format!("https://pay.example/checkout/{order_id}"))
    }

    async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatusDetails> {
        self.payments
            .lock()
            .unwrap()
            .get(payment_id)
            .cloned()
            .ok_or_else(|| CheckoutError::PaymentNotFound(payment_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// 事件与死信
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<OrderEvent>>,
}

#[async_trait]
impl OrderEventPublisher for RecordingPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeadLetters {
    pub messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn dead_letter(
        &self,
        message_id: &str,
        source: &str,
        _payload: &[u8],
        _error: &str,
        _attempts: u32,
    ) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((message_id.to_string(), source.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 装配
// ---------------------------------------------------------------------------

pub struct Harness {
    pub carts: Arc<MemoryCarts>,
    pub orders: Arc<MemoryOrders>,
    pub catalog: Arc<FakeCatalog>,
    pub gateway: Arc<FakeGateway>,
    pub events: Arc<RecordingPublisher>,
    pub dead_letters: Arc<RecordingDeadLetters>,
    pub lock: Arc<LocalLock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            carts: Arc::new(MemoryCarts::default()),
            orders: Arc::new(MemoryOrders::starting_at(77)),
            catalog: Arc::new(FakeCatalog::with(&[
                ("p1", "Polera", 1000, 5),
                ("p2", "Gorro", 2500, 10),
            ])),
            gateway: Arc::new(FakeGateway::default()),
            events: Arc::new(RecordingPublisher::default()),
            dead_letters: Arc::new(RecordingDeadLetters::default()),
            lock: Arc::new(LocalLock::new()),
        }
    }

    fn publisher(&self) -> SupervisedPublisher {
        SupervisedPublisher::new(
            self.events.clone(),
            self.dead_letters.clone(),
            RetryPolicy {
                max_retries: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                multiplier: 1.0,
            },
            "cart.order.events",
        )
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(
            self.carts.clone(),
            self.catalog.clone(),
            self.lock.clone(),
        )
    }

    pub fn checkout_service(&self) -> CheckoutService {
        CheckoutService::new(
            self.carts.clone(),
            self.orders.clone(),
            self.catalog.clone(),
            self.gateway.clone(),
            self.publisher(),
            CHECKOUT_TTL,
        )
    }

    pub fn reconciler(&self) -> PaymentReconciler {
        PaymentReconciler::new(
            self.gateway.clone(),
            self.orders.clone(),
            Arc::new(self.cart_service()),
            self.catalog.clone(),
            self.lock.clone(),
            self.publisher(),
        )
    }

    /// 等待后台发布任务写入事件
    pub async fn wait_for_events(&self, count: usize) -> Vec<OrderEvent> {
        for _ in 0..100 {
            {
                let events = self.events.events.lock().unwrap();
                if events.len() >= count {
                    return events.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events.events.lock().unwrap().clone()
    }
}
