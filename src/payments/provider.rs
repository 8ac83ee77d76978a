use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CardCallback, CardInitiateRequest, CardRedirect, GatewayResult, WalletInitiateRequest,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Signed operations offered by the payment gateway.
///
/// Every `GatewayResult` returned from an implementation has passed signature
/// verification; unverified payloads surface as `PaymentError::IntegrityError`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit_wallet(&self, request: WalletInitiateRequest) -> PaymentResult<GatewayResult>;

    /// Builds the signed redirect for the hosted card page. No network call.
    fn initiate_card(&self, request: CardInitiateRequest) -> PaymentResult<CardRedirect>;

    async fn inquiry(&self, txn_ref_no: &str) -> PaymentResult<GatewayResult>;

    fn parse_and_verify_card_callback(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> PaymentResult<CardCallback>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use crate::payments::types::PaymentStatus;
    use serde_json::Map;

    struct MockGateway;

    fn result(status: PaymentStatus, code: &str) -> GatewayResult {
        GatewayResult {
            status,
            response_code: code.to_string(),
            payment_response_code: None,
            retrieval_reference_no: None,
            message: String::new(),
            raw: Map::new(),
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn submit_wallet(
            &self,
            _request: WalletInitiateRequest,
        ) -> PaymentResult<GatewayResult> {
            Ok(result(PaymentStatus::Pending, "157"))
        }

        fn initiate_card(&self, request: CardInitiateRequest) -> PaymentResult<CardRedirect> {
            let mut fields = BTreeMap::new();
            fields.insert("pp_TxnRefNo".to_string(), request.txn_ref_no);
            Ok(CardRedirect {
                post_url: "https://example.com/card".to_string(),
                fields,
                return_url: None,
            })
        }

        async fn inquiry(&self, _txn_ref_no: &str) -> PaymentResult<GatewayResult> {
            Ok(result(PaymentStatus::Success, "121"))
        }

        fn parse_and_verify_card_callback(
            &self,
            _fields: &BTreeMap<String, String>,
        ) -> PaymentResult<CardCallback> {
            Err(PaymentError::IntegrityError {
                message: "mock rejects callbacks".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    #[tokio::test]
    async fn trait_objects_are_usable() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);

        let submitted = gateway
            .submit_wallet(WalletInitiateRequest {
                amount: 50000,
                bill_reference: "BILL1".to_string(),
                txn_ref_no: "T1".to_string(),
                description: "Wallet Top Up".to_string(),
                mobile_number: "03001234567".to_string(),
                cnic_last6: "123456".to_string(),
                txn_date_time: "20250101120000".to_string(),
                txn_expiry_date_time: "20250102120000".to_string(),
            })
            .await
            .expect("wallet submit should succeed");
        assert_eq!(submitted.status, PaymentStatus::Pending);

        let inquired = gateway.inquiry("T1").await.expect("inquiry should succeed");
        assert_eq!(inquired.status, PaymentStatus::Success);

        assert!(gateway
            .parse_and_verify_card_callback(&BTreeMap::new())
            .is_err());
        assert_eq!(gateway.name(), "mock");
    }
}
