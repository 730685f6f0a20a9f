pub mod crawlers;
pub mod db;
pub mod domain;
pub mod models;
pub mod processing;
pub mod repository;
pub mod vector_store;
