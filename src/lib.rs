//! imagemate — 多平台 AI 图像生成的适配层。
//!
//! 库的分层自下而上：`provider`（适配器 + 共享类型）→ `registry`（适配器
//! 注册与模型目录解析）→ `manager`（模型配置的持久化与修复）→ `storage`
//! （图像缓存）→ `service`（生成编排）。`cli`/`commands` 是命令行入口层，
//! 只被二进制目标使用。

pub mod cli;
pub mod commands;
pub mod config;
pub mod errors;
pub mod manager;
pub mod provider;
pub mod registry;
pub mod service;
pub mod storage;
