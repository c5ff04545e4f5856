mod common;
mod inventory;
mod service;
