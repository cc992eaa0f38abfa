pub mod assignment;
pub mod bootstrap;
pub mod calendar_merge;
pub mod commands;
pub mod gesture;
pub mod navigation;
pub mod task_pool;
