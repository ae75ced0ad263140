pub mod accounts;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod jobs;
pub mod night;
pub mod tasks;
pub mod terminal;
