//! 测试模块根目录
//!
//! 按功能组织的集成测试

#[allow(unused_imports)]
pub mod engine;
#[allow(unused_imports)]
pub mod invalidation;
