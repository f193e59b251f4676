//! Wire models of the billing service's REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

#[derive(Serialize, Debug)]
pub struct LoginRequest<'a> {
    pub params: Credentials<'a>,
}

#[derive(Serialize, Debug)]
pub struct Credentials<'a> {
    pub login: &'a str,
    pub password: &'a str,
}

#[derive(Deserialize, Debug)]
pub struct LoginResponse {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct AuthInfo<'a> {
    pub session_id: &'a str,
}

/// Parameters of `Customer/get_customer_xdrs`.
#[derive(Serialize, Debug)]
pub struct XdrQuery {
    pub billing_model: i32,
    pub call_recording: i32,
    pub from_date: String,
    pub to_date: String,
    pub i_customer: Value,
}

/// Parameters of `CDR/get_call_recording`.
#[derive(Serialize, Debug)]
pub struct RecordingQuery {
    pub i_xdr: i64,
}

#[derive(Deserialize, Debug)]
pub struct XdrListResponse {
    #[serde(default)]
    pub xdr_list: Vec<CallRecord>,
}

/// A call detail record as listed by the billing service.
///
/// Only `i_xdr` is required. The remaining fields are carried for logging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub i_xdr: i64,
    #[serde(default)]
    pub connect_time: Option<String>,
    #[serde(default)]
    pub i_customer: Option<i64>,
    #[serde(default, rename = "CLI")]
    pub cli: Option<String>,
    #[serde(default, rename = "CLD")]
    pub cld: Option<String>,
    #[serde(default)]
    pub charged_quantity: Option<f64>,
}

impl CallRecord {
    pub fn new(i_xdr: i64) -> Self {
        Self {
            i_xdr,
            connect_time: None,
            i_customer: None,
            cli: None,
            cld: None,
            charged_quantity: None,
        }
    }
}

/// Error body returned by the billing service, usually with a 500 status.
#[derive(Deserialize, Debug, Clone)]
pub struct BillingFault {
    pub faultcode: String,
    #[serde(default)]
    pub faultstring: Option<String>,
}

impl BillingFault {
    /// Tries to read a fault from a response body.
    pub fn parse(body: &[u8]) -> Option<BillingFault> {
        serde_json::from_slice(body).ok()
    }

    /// Determines if the fault reports an unknown, expired or otherwise rejected session.
    pub fn is_session_fault(&self) -> bool {
        let code = self.faultcode.to_lowercase();
        code.contains("session") || code.contains("auth_failed")
    }
}

impl Display for BillingFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.faultstring {
            Some(message) => write!(f, "{} ({})", message, self.faultcode),
            None => write!(f, "{}", self.faultcode),
        }
    }
}

/// Customer ids are sent as numbers whenever they look like one.
pub fn customer_param(customer: &str) -> Value {
    match customer.trim().parse::<i64>() {
        Ok(id) => Value::from(id),
        Err(_) => Value::from(customer),
    }
}
