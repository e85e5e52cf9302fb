pub mod time;
pub mod web;
