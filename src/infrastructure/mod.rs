pub mod adapter;
pub mod bluetooth;
pub mod btleplug;
pub mod logging;
