use crate::payments::codes;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::signature::{render_field_value, SignatureCodec, SignedFieldSet};
use crate::payments::types::{
    CardCallback, CardInitiateRequest, CardRedirect, GatewayResult, WalletInitiateRequest,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

const PROVIDER: &str = "jazzcash";

pub mod fields {
    pub const VERSION: &str = "pp_Version";
    pub const TXN_TYPE: &str = "pp_TxnType";
    pub const LANGUAGE: &str = "pp_Language";
    pub const MERCHANT_ID: &str = "pp_MerchantID";
    pub const PASSWORD: &str = "pp_Password";
    pub const AMOUNT: &str = "pp_Amount";
    pub const BILL_REFERENCE: &str = "pp_BillReference";
    pub const TXN_REF_NO: &str = "pp_TxnRefNo";
    pub const DESCRIPTION: &str = "pp_Description";
    pub const MOBILE_NUMBER: &str = "pp_MobileNumber";
    pub const CNIC: &str = "pp_CNIC";
    pub const TXN_DATE_TIME: &str = "pp_TxnDateTime";
    pub const TXN_EXPIRY_DATE_TIME: &str = "pp_TxnExpiryDateTime";
    pub const RETURN_URL: &str = "pp_ReturnURL";
    pub const RESPONSE_CODE: &str = "pp_ResponseCode";
    pub const PAYMENT_RESPONSE_CODE: &str = "pp_PaymentResponseCode";
    pub const RESPONSE_MESSAGE: &str = "pp_ResponseMessage";
    // gateway spelling
    pub const RETRIEVAL_REFERENCE_NO: &str = "pp_RetreivalReferenceNo";
}

const WALLET_VERSION: &str = "2.0";
const WALLET_TXN_TYPE: &str = "MWALLET";
const CARD_VERSION: &str = "1.1";
const CARD_TXN_TYPE: &str = "CARDPAYMENT";
const LANGUAGE: &str = "EN";

#[derive(Debug, Clone)]
pub struct JazzCashConfig {
    pub merchant_id: String,
    pub password: String,
    pub integrity_salt: String,
    pub return_url: String,
    pub wallet_payment_url: String,
    pub card_payment_url: String,
    pub status_inquiry_url: String,
    pub timeout_secs: u64,
}

impl Default for JazzCashConfig {
    fn default() -> Self {
        Self {
            merchant_id: String::new(),
            password: String::new(),
            integrity_salt: String::new(),
            return_url: String::new(),
            wallet_payment_url:
                "https://sandbox.jazzcash.com.pk/ApplicationAPI/API/2.0/Purchase/DoMWalletTransaction"
                    .to_string(),
            card_payment_url:
                "https://sandbox.jazzcash.com.pk/CustomerPortal/transactionmanagement/merchantform/"
                    .to_string(),
            status_inquiry_url:
                "https://sandbox.jazzcash.com.pk/ApplicationAPI/API/PaymentInquiry/Inquire"
                    .to_string(),
            timeout_secs: 45,
        }
    }
}

impl JazzCashConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| PaymentError::ValidationError {
                    message: format!("{} environment variable is required", name),
                    field: Some(name.to_string()),
                })
        };
        let defaults = Self::default();

        Ok(Self {
            merchant_id: required("JAZZCASH_MERCHANT_ID")?,
            password: required("JAZZCASH_PASSWORD")?,
            integrity_salt: required("JAZZCASH_INTEGRITY_SALT")?,
            return_url: std::env::var("JAZZCASH_RETURN_URL").unwrap_or_default(),
            wallet_payment_url: std::env::var("JAZZCASH_WALLET_PAYMENT_URL")
                .unwrap_or(defaults.wallet_payment_url),
            card_payment_url: std::env::var("JAZZCASH_CARD_PAYMENT_URL")
                .unwrap_or(defaults.card_payment_url),
            status_inquiry_url: std::env::var("JAZZCASH_STATUS_INQUIRY_URL")
                .unwrap_or(defaults.status_inquiry_url),
            timeout_secs: std::env::var("JAZZCASH_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        })
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if self.wallet_payment_url == self.status_inquiry_url {
            return Err(PaymentError::validation(
                "JAZZCASH_WALLET_PAYMENT_URL",
                "wallet payment and status inquiry endpoints must differ",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(PaymentError::validation(
                "JAZZCASH_TIMEOUT_SECONDS",
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

pub struct JazzCashClient {
    config: JazzCashConfig,
    codec: SignatureCodec,
    http: PaymentHttpClient,
}

impl JazzCashClient {
    pub fn new(config: JazzCashConfig) -> PaymentResult<Self> {
        config.validate()?;
        let codec = SignatureCodec::new(config.integrity_salt.clone())?;
        let http = PaymentHttpClient::new(PROVIDER, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            codec,
            http,
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(JazzCashConfig::from_env()?)
    }

    pub fn codec(&self) -> &SignatureCodec {
        &self.codec
    }

    fn wallet_field_set(&self, request: &WalletInitiateRequest) -> SignedFieldSet {
        let mut set = self.merchant_fields(WALLET_VERSION, WALLET_TXN_TYPE);
        set.insert(fields::AMOUNT, request.amount.to_string());
        set.insert(fields::BILL_REFERENCE, request.bill_reference.as_str());
        set.insert(fields::TXN_REF_NO, request.txn_ref_no.as_str());
        set.insert(fields::DESCRIPTION, request.description.as_str());
        set.insert(fields::MOBILE_NUMBER, request.mobile_number.as_str());
        set.insert(fields::CNIC, request.cnic_last6.as_str());
        set.insert(fields::TXN_DATE_TIME, request.txn_date_time.as_str());
        set.insert(
            fields::TXN_EXPIRY_DATE_TIME,
            request.txn_expiry_date_time.as_str(),
        );
        set
    }

    fn card_field_set(&self, request: &CardInitiateRequest) -> SignedFieldSet {
        let mut set = self.merchant_fields(CARD_VERSION, CARD_TXN_TYPE);
        set.insert(fields::AMOUNT, request.amount.to_string());
        set.insert(fields::BILL_REFERENCE, request.bill_reference.as_str());
        set.insert(fields::TXN_REF_NO, request.txn_ref_no.as_str());
        set.insert(fields::DESCRIPTION, request.description.as_str());
        set.insert(fields::RETURN_URL, self.config.return_url.as_str());
        set.insert(fields::TXN_DATE_TIME, request.txn_date_time.as_str());
        set.insert(
            fields::TXN_EXPIRY_DATE_TIME,
            request.txn_expiry_date_time.as_str(),
        );
        set
    }

    fn inquiry_field_set(&self, txn_ref_no: &str) -> SignedFieldSet {
        let mut set = SignedFieldSet::new();
        set.insert(fields::TXN_REF_NO, txn_ref_no);
        set.insert(fields::MERCHANT_ID, self.config.merchant_id.as_str());
        set.insert(fields::PASSWORD, self.config.password.as_str());
        set
    }

    fn merchant_fields(&self, version: &str, txn_type: &str) -> SignedFieldSet {
        let mut set = SignedFieldSet::new();
        set.insert(fields::VERSION, version);
        set.insert(fields::TXN_TYPE, txn_type);
        set.insert(fields::LANGUAGE, LANGUAGE);
        set.insert(fields::MERCHANT_ID, self.config.merchant_id.as_str());
        set.insert(fields::PASSWORD, self.config.password.as_str());
        set
    }

    /// Sign, POST, require 200, verify the response hash.
    async fn exchange(
        &self,
        url: &str,
        set: SignedFieldSet,
    ) -> PaymentResult<Map<String, JsonValue>> {
        let hash = self.codec.sign(&set);
        let body = set.into_signed_fields(hash);

        let response = self.http.post_json(url, &body).await?;
        if let Err(e) = self.codec.verify(&response) {
            warn!(provider = PROVIDER, error = %e, "discarding unverified gateway response");
            return Err(e);
        }
        Ok(response)
    }
}

/// Reads a verified field in the same rendering the signature covered.
fn string_field(map: &Map<String, JsonValue>, key: &str) -> Option<String> {
    map.get(key)
        .map(render_field_value)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Classifies a verified wallet response by `pp_ResponseCode`.
pub fn map_wallet_response(raw: Map<String, JsonValue>) -> GatewayResult {
    let response_code = string_field(&raw, fields::RESPONSE_CODE).unwrap_or_default();
    GatewayResult {
        status: codes::classify(&response_code),
        message: codes::user_message(&response_code),
        payment_response_code: None,
        retrieval_reference_no: string_field(&raw, fields::RETRIEVAL_REFERENCE_NO),
        response_code,
        raw,
    }
}

/// Classifies a verified inquiry response, preferring `pp_PaymentResponseCode`.
pub fn map_inquiry_response(raw: Map<String, JsonValue>) -> GatewayResult {
    let response_code = string_field(&raw, fields::RESPONSE_CODE).unwrap_or_default();
    let payment_response_code = string_field(&raw, fields::PAYMENT_RESPONSE_CODE);
    let effective = payment_response_code
        .clone()
        .unwrap_or_else(|| response_code.clone());

    GatewayResult {
        status: codes::classify(&effective),
        message: codes::user_message(&effective),
        payment_response_code,
        retrieval_reference_no: string_field(&raw, fields::RETRIEVAL_REFERENCE_NO),
        response_code,
        raw,
    }
}

#[async_trait]
impl PaymentGateway for JazzCashClient {
    async fn submit_wallet(&self, request: WalletInitiateRequest) -> PaymentResult<GatewayResult> {
        let set = self.wallet_field_set(&request);
        let raw = self.exchange(&self.config.wallet_payment_url, set).await?;
        let result = map_wallet_response(raw);

        info!(
            txn_ref_no = %request.txn_ref_no,
            response_code = %result.response_code,
            status = %result.status,
            "wallet payment submitted"
        );
        Ok(result)
    }

    fn initiate_card(&self, request: CardInitiateRequest) -> PaymentResult<CardRedirect> {
        let set = self.card_field_set(&request);
        let hash = self.codec.sign(&set);

        info!(txn_ref_no = %request.txn_ref_no, "card redirect prepared");
        Ok(CardRedirect {
            post_url: self.config.card_payment_url.clone(),
            fields: set.into_signed_fields(hash),
            return_url: Some(self.config.return_url.clone()).filter(|u| !u.is_empty()),
        })
    }

    async fn inquiry(&self, txn_ref_no: &str) -> PaymentResult<GatewayResult> {
        if txn_ref_no.trim().is_empty() {
            return Err(PaymentError::validation(
                "txn_ref_no",
                "transaction reference is required",
            ));
        }

        let set = self.inquiry_field_set(txn_ref_no);
        let raw = self.exchange(&self.config.status_inquiry_url, set).await?;
        Ok(map_inquiry_response(raw))
    }

    fn parse_and_verify_card_callback(
        &self,
        posted: &BTreeMap<String, String>,
    ) -> PaymentResult<CardCallback> {
        self.codec.verify_fields(posted)?;

        let get = |key: &str| {
            posted
                .get(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let txn_ref_no = get(fields::TXN_REF_NO);
        if txn_ref_no.is_empty() {
            return Err(PaymentError::validation(
                fields::TXN_REF_NO,
                "card callback is missing the transaction reference",
            ));
        }
        let response_code = get(fields::RESPONSE_CODE);
        let rrn = get(fields::RETRIEVAL_REFERENCE_NO);

        Ok(CardCallback {
            txn_ref_no,
            status: codes::classify(&response_code),
            response_message: get(fields::RESPONSE_MESSAGE),
            retrieval_reference_no: Some(rrn).filter(|r| !r.is_empty()),
            response_code,
            fields: posted.clone(),
        })
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::SECURE_HASH_FIELD;
    use crate::payments::types::PaymentStatus;
    use serde_json::json;

    fn client() -> JazzCashClient {
        JazzCashClient::new(JazzCashConfig {
            merchant_id: "MC123".to_string(),
            password: "secret".to_string(),
            integrity_salt: "salt".to_string(),
            return_url: "https://example.com/return".to_string(),
            wallet_payment_url: "https://gw.test/wallet".to_string(),
            card_payment_url: "https://gw.test/card".to_string(),
            status_inquiry_url: "https://gw.test/inquiry".to_string(),
            timeout_secs: 45,
        })
        .expect("client should build")
    }

    fn card_request() -> CardInitiateRequest {
        CardInitiateRequest {
            amount: 150000,
            bill_reference: "BILL1700000000ABC".to_string(),
            txn_ref_no: "GIKITU20250101XYZ".to_string(),
            description: "Wallet Top Up".to_string(),
            txn_date_time: "20250101120000".to_string(),
            txn_expiry_date_time: "20250102120000".to_string(),
        }
    }

    #[test]
    fn same_wallet_and_inquiry_endpoint_is_rejected() {
        let config = JazzCashConfig {
            integrity_salt: "salt".to_string(),
            wallet_payment_url: "https://gw.test/same".to_string(),
            status_inquiry_url: "https://gw.test/same".to_string(),
            ..JazzCashConfig::default()
        };
        assert!(JazzCashClient::new(config).is_err());
    }

    #[test]
    fn wallet_field_set_carries_protocol_constants() {
        let c = client();
        let set = c.wallet_field_set(&WalletInitiateRequest {
            amount: 50000,
            bill_reference: "BILL1".to_string(),
            txn_ref_no: "T1".to_string(),
            description: "Wallet Top Up".to_string(),
            mobile_number: "03001234567".to_string(),
            cnic_last6: "345678".to_string(),
            txn_date_time: "20250101120000".to_string(),
            txn_expiry_date_time: "20250102120000".to_string(),
        });

        assert_eq!(set.get(fields::VERSION), Some("2.0"));
        assert_eq!(set.get(fields::TXN_TYPE), Some("MWALLET"));
        assert_eq!(set.get(fields::LANGUAGE), Some("EN"));
        assert_eq!(set.get(fields::AMOUNT), Some("50000"));
        assert_eq!(set.get(fields::CNIC), Some("345678"));
        assert_eq!(set.len(), 13);
    }

    #[test]
    fn card_redirect_is_signed() {
        let c = client();
        let redirect = c.initiate_card(card_request()).expect("redirect");

        assert_eq!(redirect.post_url, "https://gw.test/card");
        assert_eq!(redirect.fields.get(fields::VERSION).map(String::as_str), Some("1.1"));
        assert_eq!(
            redirect.fields.get(fields::TXN_TYPE).map(String::as_str),
            Some("CARDPAYMENT")
        );
        assert_eq!(
            redirect.return_url.as_deref(),
            Some("https://example.com/return")
        );
        assert!(c.codec().verify_fields(&redirect.fields).is_ok());
    }

    #[test]
    fn inquiry_prefers_payment_response_code() {
        let result = map_inquiry_response(
            json!({
                "pp_ResponseCode": "000",
                "pp_PaymentResponseCode": "157",
                "pp_RetreivalReferenceNo": "RRN42",
            })
            .as_object()
            .cloned()
            .unwrap(),
        );

        assert_eq!(result.status, PaymentStatus::Pending);
        assert_eq!(result.response_code, "000");
        assert_eq!(result.payment_response_code.as_deref(), Some("157"));
        assert_eq!(result.retrieval_reference_no.as_deref(), Some("RRN42"));
    }

    #[test]
    fn inquiry_falls_back_to_response_code() {
        let result = map_inquiry_response(
            json!({ "pp_ResponseCode": "121", "pp_PaymentResponseCode": "" })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(result.status, PaymentStatus::Success);
        assert_eq!(result.message, "Transaction confirmed successfully");
    }

    #[test]
    fn numeric_response_codes_are_classified() {
        let result = map_inquiry_response(
            json!({ "pp_ResponseCode": 0, "pp_PaymentResponseCode": 157, "pp_AuthCode": null })
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(result.response_code, "0");
        assert_eq!(result.payment_response_code.as_deref(), Some("157"));
        assert_eq!(result.status, PaymentStatus::Pending);

        let wallet = map_wallet_response(
            json!({ "pp_ResponseCode": 121 }).as_object().cloned().unwrap(),
        );
        assert_eq!(wallet.status, PaymentStatus::Success);
    }

    #[test]
    fn wallet_response_without_code_is_unknown() {
        let result = map_wallet_response(Map::new());
        assert_eq!(result.status, PaymentStatus::Unknown);
        assert_eq!(result.message, "Transaction failed. Please try again");
    }

    #[test]
    fn card_callback_is_verified_and_classified() {
        let c = client();
        let mut posted: BTreeMap<String, String> = [
            ("pp_TxnRefNo", "GIKITU20250101XYZ"),
            ("pp_ResponseCode", "000"),
            ("pp_ResponseMessage", "Thank you for using JazzCash"),
            ("pp_RetreivalReferenceNo", "998877"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let set: SignedFieldSet = posted.clone().into_iter().collect();
        posted.insert(SECURE_HASH_FIELD.to_string(), c.codec().sign(&set));

        let callback = c.parse_and_verify_card_callback(&posted).expect("callback");
        assert_eq!(callback.status, PaymentStatus::Success);
        assert_eq!(callback.txn_ref_no, "GIKITU20250101XYZ");
        assert_eq!(callback.retrieval_reference_no.as_deref(), Some("998877"));

        posted.insert("pp_ResponseCode".to_string(), "101".to_string());
        let err = c.parse_and_verify_card_callback(&posted).unwrap_err();
        assert!(matches!(err, PaymentError::IntegrityError { .. }));
    }
}
