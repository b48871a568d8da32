pub mod client;

pub use client::{
    sign_payload, ChainStepRequest, GatewayClient, GatewayError, RedirectToken, TokenRequest,
};

/// Field names the gateway posts back through the browser, plus the
/// parameters we embed in the callback URL and get echoed back.
pub mod fields {
    pub const RESULT_CODE: &str = "result_code";
    pub const AUTH_CODE: &str = "auth_code";
    pub const CARD_TYPE: &str = "card_type";
    pub const TOKEN: &str = "token";
    pub const MESSAGE: &str = "result_message";
    pub const REFERENCE: &str = "reference";
    pub const MASKED_ACCOUNT: &str = "masked_account";

    pub const TXN_ID: &str = "txn_id";
    pub const TENANT_ID: &str = "tenant_id";
    pub const KIND: &str = "kind";
    pub const CUSTOMER_ID: &str = "customer_id";
    pub const RETURN_URL: &str = "return_url";
}

/// Header carrying the hex HMAC-SHA256 of the request body.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";
