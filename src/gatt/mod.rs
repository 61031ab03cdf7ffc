pub mod characteristic;
pub mod peripheral_event;
pub mod properties;
pub mod service;
