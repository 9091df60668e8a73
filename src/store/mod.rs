//! 外部边界与参考实现
//!
//! - EntityStore / EntityService：实体、边消息与记忆的持久化
//! - Repository / LocalRepository：输出文件
//! - UserResolver：操作账号解析

pub mod local_fs;
pub mod memory;
pub mod service;
pub mod traits;

pub use local_fs::LocalRepository;
pub use memory::InMemoryEntityStore;
pub use service::EntityService;
pub use traits::{EntityStore, PassthroughUserResolver, Repository, UserResolver};
