#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod gateway;
pub mod labs;

pub use lab_core::Clock;

pub use app_services::AppServices;
pub use config::ClientConfig;
pub use error::{AppServicesError, ConfigError, GatewayError, LabError};
pub use gateway::{
    GatewayCall, HttpGateway, InMemoryGateway, LabContent, LabGateway, SeedItem, SeedLab,
    StudentAccount,
};
pub use labs::{ActiveLab, LabEvent, LabLoopService, TimeSyncHandle};
