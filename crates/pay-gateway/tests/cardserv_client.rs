//! CardServClient tests against a local mock provider (httpmock).

use httpmock::prelude::*;
use pay_config::GatewayConfig;
use pay_currency::Currency;
use pay_gateway::{CardDetails, CardServClient, PaymentGateway, PaymentState, SaleRequest};

fn config_for(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: server.base_url(),
        requestor_id: "req-1".to_string(),
        merchant_id: "merch-1".to_string(),
        bearer_token: "tok-test".to_string(),
        result_url: "https://shop.example/success".to_string(),
        webhook_url: "https://shop.example/api/webhook".to_string(),
    }
}

fn sale_request() -> SaleRequest {
    SaleRequest {
        merchant_ref: "mref-42".to_string(),
        email: "buyer@example.com".to_string(),
        amount: 10.0,
        currency: Currency::Gbp,
        description: "Token top-up".to_string(),
        card: CardDetails {
            printed_name: "Ada Lovelace".to_string(),
            number: "4444444411111111".to_string(),
            cvv: "123".to_string(),
            expire_month: "10".to_string(),
            expire_year: "2027".to_string(),
            postal_code: "E1 6AN".to_string(),
            city: "London".to_string(),
            address_line1: "1 Test Street".to_string(),
            country_code: "GB".to_string(),
        },
    }
}

#[tokio::test]
async fn create_sale_normalizes_json_response() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/payments/sale/req-1")
            .header("authorization", "Bearer tok-test")
            .json_body_partial(r#"{"order": {"orderMerchantId": "mref-42"}}"#);
        then.status(200).json_body(serde_json::json!({
            "orderState": "PROCESSING",
            "orderSystemId": "sys-900",
            "redirectUrl": "https://3ds.cardserv.io/challenge/900",
        }));
    });

    let client = CardServClient::new(config_for(&server));
    let res = client.create_sale(&sale_request()).await.unwrap();
    mock.assert();

    assert_eq!(res.merchant_ref, "mref-42");
    assert_eq!(res.system_ref.as_deref(), Some("sys-900"));
    assert_eq!(res.state, PaymentState::Processing);
    assert_eq!(
        res.redirect_url.as_deref(),
        Some("https://3ds.cardserv.io/challenge/900")
    );
}

#[tokio::test]
async fn create_sale_html_body_fail_opens_to_processing() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/payments/sale/req-1");
        then.status(200)
            .header("content-type", "text/html")
            .body("<html><body>please wait…</body></html>");
    });

    let client = CardServClient::new(config_for(&server));
    let res = client.create_sale(&sale_request()).await.unwrap();

    assert_eq!(res.state, PaymentState::Processing);
    assert_eq!(res.redirect_url, None);
    assert_eq!(res.system_ref, None);
    assert!(res.raw["raw"].as_str().unwrap().contains("please wait"));
}

#[tokio::test]
async fn create_sale_non_2xx_is_gateway_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/payments/sale/req-1");
        then.status(503).body("upstream down");
    });

    let client = CardServClient::new(config_for(&server));
    let err = client.create_sale(&sale_request()).await.unwrap_err();
    match err {
        pay_gateway::GatewayError::Http { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "upstream down");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn get_status_sends_both_references() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/payments/status/req-1")
            .header("authorization", "Bearer tok-test")
            .json_body_partial(
                r#"{"orderMerchantId": "mref-42", "orderSystemId": "sys-900"}"#,
            );
        then.status(200).json_body(serde_json::json!({
            "order": { "orderState": "APPROVED", "orderSystemId": "sys-900" },
        }));
    });

    let client = CardServClient::new(config_for(&server));
    let res = client
        .get_status("mref-42", Some("sys-900"), Currency::Gbp)
        .await
        .unwrap();
    mock.assert();

    assert_eq!(res.state, PaymentState::Approved);
    assert_eq!(res.system_ref.as_deref(), Some("sys-900"));
}

#[tokio::test]
async fn get_status_malformed_body_stays_processing() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/payments/status/req-1");
        then.status(200).body("not json at all");
    });

    let client = CardServClient::new(config_for(&server));
    let res = client
        .get_status("mref-42", None, Currency::Eur)
        .await
        .unwrap();

    assert_eq!(res.state, PaymentState::Processing);
    assert_eq!(res.redirect_url, None);
}
