pub mod alerts;
pub mod config;
pub mod db;
pub mod repos;
pub mod services;
