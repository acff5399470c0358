pub mod rest;
pub mod tasks;
