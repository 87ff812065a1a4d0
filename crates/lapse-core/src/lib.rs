//! lapse-core
//!
//! Periodic lead-expiration sweep with rate-limited owner notifications.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, lead, notification, outcome, errors）
//! - **ports**: 抽象化レイヤー（LeadStore, NotificationStore, DeliveryChannel, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryLeadStore など開発用、ConnectionRegistry）
//! - **sweep**: パイプライン（scanner, transition, dispatcher, executor, backoff）
//! - **app**: アプリケーション層（config, cron, scheduler, builder, health probe）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod sweep;
