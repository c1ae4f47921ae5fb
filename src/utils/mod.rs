//! 通用数据结构

pub mod tree;

pub use tree::{NodeId, RbTree};
