//! 仓储层
//!
//! - 购物车：Redis，读不到即空购物车
//! - 订单：PostgreSQL，订单与订单行同事务写入
//!
//! 仓储只负责持久化，状态流转规则由服务层决定。

mod cart_repo;
mod order_repo;
mod traits;

pub use cart_repo::RedisCartRepository;
pub use order_repo::OrderRepository;
pub use traits::*;
