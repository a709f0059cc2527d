use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use gifter_common::{
    Poll,
    RetryError,
    RetryPolicy,
};
use reqwest::{
    Method,
    StatusCode,
};
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::Value;
use url::Url;

pub const API_KEY_HEADER: &str = "x-bitrefill-api-key";
pub const MISSING_KEY_MESSAGE: &str = "Bitrefill API key not set";

/// Bitrefill sends `null` for fields that are not set yet (an undelivered
/// order's `delivered_time`, a product without an `image`); those decode as
/// the field's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductPackage {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    /// Face value; Bitrefill sends either a string or a number.
    pub value: Value,
    /// In thousandths of the product currency.
    #[serde(deserialize_with = "null_as_default")]
    pub price: f64,
}

impl ProductPackage {
    pub fn value_label(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::from("?"),
            other => other.to_string(),
        }
    }

    pub fn display_price(&self) -> f64 {
        self.price / 1_000.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductRange {
    #[serde(deserialize_with = "null_as_default")]
    pub min: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub max: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub step: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub price_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductData {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub country_code: String,
    #[serde(deserialize_with = "null_as_default")]
    pub country_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub recipient_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub image: String,
    #[serde(deserialize_with = "null_as_default")]
    pub in_stock: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub packages: Vec<ProductPackage>,
    pub range: Option<ProductRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductResponse {
    pub meta: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub data: ProductData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Balance,
    Bitcoin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateInvoiceProduct {
    pub product_id: String,
    pub package_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    pub products: Vec<CreateInvoiceProduct>,
    pub auto_pay: bool,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderProduct {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub value: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub image: String,
    #[serde(rename = "_href", deserialize_with = "null_as_default")]
    pub href: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderData {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    pub product: Option<OrderProduct>,
    #[serde(deserialize_with = "null_as_default")]
    pub created_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivered_time: String,
    pub redemption_info: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceUser {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoicePayment {
    #[serde(deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(deserialize_with = "null_as_default")]
    pub commission: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceData {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub created_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub completed_time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    pub user: Option<InvoiceUser>,
    pub payment: Option<InvoicePayment>,
    #[serde(deserialize_with = "null_as_default")]
    pub orders: Vec<OrderData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateInvoiceResponse {
    pub meta: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub data: InvoiceData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceData {
    #[serde(deserialize_with = "null_as_default")]
    pub balance: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceResponse {
    pub meta: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub data: BalanceData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderResponse {
    pub meta: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub data: OrderData,
}

/// Talks to Bitrefill through the mini-app server's `/api/bitrefill` proxy.
#[derive(Clone)]
pub struct BitrefillClient {
    base_url: String,
    http: reqwest::Client,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl BitrefillClient {
    pub fn new(app_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let base_url = app_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .wrap_err("failed to build HTTP client for Bitrefill")?;
        Ok(Self {
            base_url,
            http,
            api_key,
            retry: RetryPolicy::rate_limit(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn set_api_key(&mut self, api_key: Option<String>) {
        self.api_key = api_key;
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/api/bitrefill/", self.base_url))
            .wrap_err("invalid app URL")?;
        url.path_segments_mut()
            .map_err(|_| eyre!("app URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<Value>,
    ) -> Result<T> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| eyre!(MISSING_KEY_MESSAGE))?;
        let url = self.endpoint(segments)?;
        let outcome = self
            .retry
            .poll(|attempt| {
                let mut request = self
                    .http
                    .request(method.clone(), url.clone())
                    .header(API_KEY_HEADER, api_key)
                    .header(reqwest::header::CONTENT_TYPE, "application/json");
                if let Some(body) = &body {
                    request = request.json(body);
                }
                async move {
                    let res = match request.send().await {
                        Ok(res) => res,
                        Err(e) => {
                            return Poll::Failed(eyre!(e).wrap_err("Bitrefill request failed"));
                        }
                    };
                    let status = res.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        tracing::warn!(attempt, "Bitrefill rate limited");
                        return Poll::Pending;
                    }
                    if !status.is_success() {
                        return Poll::Failed(eyre!("Bitrefill request failed with status {status}"));
                    }
                    match res.json::<T>().await {
                        Ok(value) => Poll::Ready(value),
                        Err(e) => {
                            Poll::Failed(eyre!(e).wrap_err("failed to decode Bitrefill response"))
                        }
                    }
                }
            })
            .await;
        match outcome {
            Ok(value) => Ok(value),
            Err(RetryError::Terminal(e)) => Err(e),
            Err(RetryError::Exhausted { attempts }) => Err(eyre!(
                "Bitrefill request failed with status {} after {attempts} attempts",
                StatusCode::TOO_MANY_REQUESTS
            )),
        }
    }

    pub async fn ping(&self) -> Result<Value> {
        self.call(Method::GET, &["ping"], None).await
    }

    pub async fn get_product(&self, product_id: &str) -> Result<ProductResponse> {
        self.call(Method::GET, &["products", product_id], None).await
    }

    pub async fn create_invoice(
        &self,
        request: &CreateInvoiceRequest,
    ) -> Result<CreateInvoiceResponse> {
        let body = serde_json::to_value(request).wrap_err("failed to encode invoice")?;
        self.call(Method::POST, &["invoices"], Some(body)).await
    }

    pub async fn get_balance(&self) -> Result<BalanceResponse> {
        self.call(Method::GET, &["accounts", "balance"], None).await
    }

    pub async fn get_order(&self, order_id: &str) -> Result<OrderResponse> {
        self.call(Method::GET, &["orders", order_id], None).await
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{
        App,
        HttpRequest,
        HttpResponse,
        HttpServer,
        dev::ServerHandle,
        web,
    };
    use serde_json::json;
    use std::{
        net::TcpListener,
        sync::{
            Arc,
            atomic::{
                AtomicU32,
                Ordering,
            },
        },
        time::Duration,
    };

    struct FakeProxy {
        base_url: String,
        handle: ServerHandle,
    }

    impl FakeProxy {
        fn start<F>(configure: F) -> Self
        where
            F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
        {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            let server = HttpServer::new(move || App::new().configure(configure.clone()))
                .workers(1)
                .listen(listener)
                .unwrap()
                .run();
            let handle = server.handle();
            std::thread::spawn(move || {
                let _ = actix_web::rt::System::new().block_on(server);
            });
            Self { base_url, handle }
        }
    }

    impl Drop for FakeProxy {
        fn drop(&mut self) {
            let _ = self.handle.stop(false);
        }
    }

    fn key_of(req: &HttpRequest) -> Option<String> {
        req.headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    async fn product(req: HttpRequest, id: web::Path<String>) -> HttpResponse {
        if key_of(&req).as_deref() != Some("secret") {
            return HttpResponse::Unauthorized().finish();
        }
        HttpResponse::Ok().json(json!({
            "meta": {"id": id.as_str(), "_endpoint": "/products"},
            "data": {
                "id": id.as_str(),
                "name": "Affiliate Tester",
                "currency": "USD",
                "in_stock": true,
                "packages": [{"id": "pkg-1", "value": "5", "price": 5100}],
                "unexpected": {"ignored": true}
            }
        }))
    }

    async fn invoice(body: web::Json<Value>) -> HttpResponse {
        HttpResponse::Ok().json(json!({
            "meta": {"echo": body.into_inner()},
            "data": {
                "id": "inv-1",
                "status": "complete",
                "orders": [{"id": "ord-1", "status": "delivered"}]
            }
        }))
    }

    fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/api/bitrefill/products/{id}", web::get().to(product))
            .route("/api/bitrefill/invoices", web::post().to(invoice))
            .route(
                "/api/bitrefill/accounts/balance",
                web::get().to(|| async {
                    HttpResponse::Ok()
                        .json(json!({"data": {"balance": 12.5, "currency": "USD"}}))
                }),
            );
    }

    #[test]
    fn create_invoice_response__new_invoice_with_nulls__decodes_as_defaults() {
        // given
        let body = r#"{
            "meta": {"_endpoint": "/invoices"},
            "data": {
                "id": "inv-9",
                "created_time": "2025-01-02T10:00:00Z",
                "completed_time": null,
                "status": "unpaid",
                "user": {"id": "u-1", "email": null},
                "payment": {"method": "balance", "address": null, "currency": "USD", "price": 5.1, "status": null, "commission": null},
                "orders": [{
                    "id": "ord-9",
                    "status": "created",
                    "product": {"id": "affiliate-tester", "name": "Affiliate Tester", "value": "5", "currency": "USD", "image": null, "_href": null},
                    "created_time": "2025-01-02T10:00:00Z",
                    "delivered_time": null,
                    "redemption_info": null
                }]
            }
        }"#;

        // when
        let response: CreateInvoiceResponse = serde_json::from_str(body).unwrap();

        // then
        assert_eq!(response.data.id, "inv-9");
        assert_eq!(response.data.completed_time, "");
        let payment = response.data.payment.unwrap();
        assert_eq!(payment.price, 5.1);
        assert_eq!(payment.commission, 0.0);
        let order = &response.data.orders[0];
        assert_eq!(order.delivered_time, "");
        assert_eq!(order.redemption_info, None);
        assert_eq!(order.product.as_ref().unwrap().image, "");
    }

    #[test]
    fn product_response__null_image_and_price__decodes_as_defaults() {
        // given
        let body = r#"{
            "meta": null,
            "data": {
                "id": "affiliate-tester",
                "name": "Affiliate Tester",
                "country_code": null,
                "currency": "USD",
                "image": null,
                "in_stock": null,
                "packages": [{"id": "pkg-1", "value": 5, "price": null}],
                "range": null
            }
        }"#;

        // when
        let product: ProductResponse = serde_json::from_str(body).unwrap();

        // then
        assert_eq!(product.data.image, "");
        assert_eq!(product.data.country_code, "");
        assert!(!product.data.in_stock);
        assert_eq!(product.data.packages[0].value_label(), "5");
        assert_eq!(product.data.packages[0].price, 0.0);
        assert_eq!(product.data.range, None);
    }

    #[test]
    fn order_response__null_data__decodes_as_empty_order() {
        let response: OrderResponse = serde_json::from_str(r#"{"data": null}"#).unwrap();

        assert_eq!(response.data, OrderData::default());
    }

    #[tokio::test]
    async fn call__missing_key__fails_without_request() {
        // given
        let client = BitrefillClient::new("http://127.0.0.1:9", None).unwrap();

        // when
        let err = client.ping().await.unwrap_err();

        // then
        assert_eq!(err.to_string(), MISSING_KEY_MESSAGE);
    }

    #[tokio::test]
    async fn get_product__known_id__decodes_and_ignores_unknown_fields() {
        // given
        let proxy = FakeProxy::start(routes);
        let client =
            BitrefillClient::new(&proxy.base_url, Some("secret".to_string())).unwrap();

        // when
        let product = client.get_product("affiliate-tester").await.unwrap();

        // then
        assert_eq!(product.data.id, "affiliate-tester");
        assert_eq!(product.data.packages[0].id, "pkg-1");
        assert_eq!(product.data.packages[0].value_label(), "5");
        assert_eq!(product.data.packages[0].display_price(), 5.1);
        assert_eq!(product.data.range, None);
    }

    #[tokio::test]
    async fn get_product__id_with_space__is_percent_encoded() {
        let proxy = FakeProxy::start(routes);
        let client =
            BitrefillClient::new(&proxy.base_url, Some("secret".to_string())).unwrap();

        let product = client.get_product("gift card").await.unwrap();

        assert_eq!(product.data.id, "gift card");
    }

    #[tokio::test]
    async fn create_invoice__sends_request_body() {
        // given
        let proxy = FakeProxy::start(routes);
        let client =
            BitrefillClient::new(&proxy.base_url, Some("secret".to_string())).unwrap();
        let request = CreateInvoiceRequest {
            products: vec![CreateInvoiceProduct {
                product_id: "affiliate-tester".to_string(),
                package_id: "pkg-1".to_string(),
                value: None,
                quantity: 1,
            }],
            auto_pay: true,
            payment_method: PaymentMethod::Balance,
        };

        // when
        let response = client.create_invoice(&request).await.unwrap();

        // then
        assert_eq!(response.data.id, "inv-1");
        assert_eq!(response.data.orders[0].status, "delivered");
        assert_eq!(
            response.meta["echo"],
            json!({
                "products": [{"product_id": "affiliate-tester", "package_id": "pkg-1", "quantity": 1}],
                "auto_pay": true,
                "payment_method": "balance"
            })
        );
    }

    #[tokio::test]
    async fn get_balance__returns_amount_and_currency() {
        let proxy = FakeProxy::start(routes);
        let client =
            BitrefillClient::new(&proxy.base_url, Some("secret".to_string())).unwrap();

        let balance = client.get_balance().await.unwrap();

        assert_eq!(balance.data.balance, 12.5);
        assert_eq!(balance.data.currency, "USD");
    }

    #[tokio::test]
    async fn call__rate_limited_then_ok__retries() {
        // given
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let proxy = FakeProxy::start(move |cfg| {
            let counter = counter.clone();
            cfg.route(
                "/api/bitrefill/ping",
                web::get().to(move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            HttpResponse::TooManyRequests().finish()
                        } else {
                            HttpResponse::Ok().json(json!({"message": "pong"}))
                        }
                    }
                }),
            );
        });
        let client = BitrefillClient::new(&proxy.base_url, Some("k".to_string()))
            .unwrap()
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));

        // when
        let pong = client.ping().await.unwrap();

        // then
        assert_eq!(pong["message"], "pong");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn call__rate_limited_forever__returns_error_after_policy_attempts() {
        // given
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let proxy = FakeProxy::start(move |cfg| {
            let counter = counter.clone();
            cfg.route(
                "/api/bitrefill/ping",
                web::get().to(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::TooManyRequests().finish()
                    }
                }),
            );
        });
        let client = BitrefillClient::new(&proxy.base_url, Some("k".to_string()))
            .unwrap()
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));

        // when
        let err = client.ping().await.unwrap_err();

        // then
        assert!(err.to_string().contains("429"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn call__other_error_status__is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let proxy = FakeProxy::start(move |cfg| {
            let counter = counter.clone();
            cfg.route(
                "/api/bitrefill/ping",
                web::get().to(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        HttpResponse::InternalServerError().finish()
                    }
                }),
            );
        });
        let client = BitrefillClient::new(&proxy.base_url, Some("k".to_string()))
            .unwrap()
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));

        assert!(client.ping().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
