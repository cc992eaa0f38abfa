pub mod calendar_client;
pub mod completion_repository;
pub mod config;
pub mod error;
pub mod event_mapper;
pub mod logging;
pub mod storage;
pub mod task_repository;
pub mod timebox_store;
