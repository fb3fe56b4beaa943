//! Outbound sinks the alert consumer acts through.

pub mod actuator;
pub mod sms;

pub use actuator::{Actuator, HttpActuator, LogActuator};
pub use sms::{SmsSink, TwilioConfig, TwilioSms};
