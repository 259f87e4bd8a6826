//! In-process fake of the e-commerce service the scenarios target.
//!
//! Every business failure answers 400/409 with a `{ "code", "message" }` body,
//! the shape the outcome classifier expects.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_COUPON_ISSUE: &str = "/api/coupons/issue";
pub const PATH_ORDERS: &str = "/api/orders";
pub const PATH_POINTS_CHARGE: &str = "/api/points/charge";
pub const PATH_PRODUCTS: &str = "/api/products";
pub const PATH_PRODUCTS_POPULAR: &str = "/api/products/popular";
pub const PATH_BROKEN: &str = "/api/broken";

#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Issuable quantity per coupon id.
    pub coupon_stock: u64,
    pub products: u64,
    pub product_stock: i64,
    pub initial_points: i64,
    /// How long a charge waits for the per-user lock before `LOCK_TIMEOUT`.
    pub lock_timeout: Duration,
    /// Time a charge holds the per-user lock.
    pub charge_work: Duration,
    /// Latency of a popular-products cache miss.
    pub cold_ranking: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            coupon_stock: 500,
            products: 10,
            product_stock: 1_000,
            initial_points: 100_000,
            lock_timeout: Duration::from_millis(200),
            charge_work: Duration::from_millis(5),
            cold_ranking: Duration::from_millis(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    coupons_issued: Arc<AtomicU64>,
    orders_created: Arc<AtomicU64>,
    payments: Arc<AtomicU64>,
    charges: Arc<AtomicU64>,
    lock_timeouts: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn coupons_issued(&self) -> u64 {
        self.coupons_issued.load(Ordering::Relaxed)
    }

    pub fn orders_created(&self) -> u64 {
        self.orders_created.load(Ordering::Relaxed)
    }

    pub fn payments(&self) -> u64 {
        self.payments.load(Ordering::Relaxed)
    }

    pub fn charges(&self) -> u64 {
        self.charges.load(Ordering::Relaxed)
    }

    pub fn lock_timeouts(&self) -> u64 {
        self.lock_timeouts.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
}

impl ApiError {
    const fn new(status: StatusCode, code: &'static str, message: &'static str) -> Self {
        Self {
            status,
            code,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "code": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

const COUPON_SOLD_OUT: ApiError =
    ApiError::new(StatusCode::CONFLICT, "COUPON_SOLD_OUT", "coupon sold out");
const COUPON_ALREADY_ISSUED: ApiError = ApiError::new(
    StatusCode::CONFLICT,
    "COUPON_ALREADY_ISSUED",
    "coupon already issued to this user",
);
const COUPON_NOT_FOUND: ApiError =
    ApiError::new(StatusCode::BAD_REQUEST, "COUPON_NOT_FOUND", "coupon not held by user");
const PRODUCT_NOT_FOUND: ApiError =
    ApiError::new(StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND", "product not found");
const STOCK_INSUFFICIENT: ApiError =
    ApiError::new(StatusCode::CONFLICT, "STOCK_INSUFFICIENT", "insufficient stock");
const ORDER_NOT_FOUND: ApiError =
    ApiError::new(StatusCode::NOT_FOUND, "ORDER_NOT_FOUND", "order not found");
const ORDER_ALREADY_PAID: ApiError =
    ApiError::new(StatusCode::BAD_REQUEST, "ORDER_ALREADY_PAID", "order already paid");
const POINT_INSUFFICIENT: ApiError =
    ApiError::new(StatusCode::BAD_REQUEST, "POINT_INSUFFICIENT", "not enough points");
const POINT_INVALID_AMOUNT: ApiError =
    ApiError::new(StatusCode::BAD_REQUEST, "POINT_INVALID_AMOUNT", "invalid amount");
const LOCK_TIMEOUT: ApiError =
    ApiError::new(StatusCode::CONFLICT, "LOCK_TIMEOUT", "lock timeout while charging");

type ApiResult = Result<(StatusCode, Json<Value>), ApiError>;

#[derive(Debug, Default)]
struct CouponState {
    issued: u64,
    holders: HashSet<u64>,
}

#[derive(Debug)]
struct Order {
    user_id: u64,
    amount: i64,
    paid: bool,
}

struct Product {
    name: String,
    price: i64,
    stock: AtomicI64,
    sold: AtomicU64,
}

struct Shop {
    config: TargetConfig,
    stats: TestServerStats,
    coupons: Mutex<HashMap<u64, CouponState>>,
    products: Vec<Product>,
    orders: Mutex<HashMap<u64, Order>>,
    next_order: AtomicU64,
    points: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<i64>>>>,
    ranking_warm: AtomicBool,
}

type AppState = Arc<Shop>;

impl Shop {
    fn new(config: TargetConfig, stats: TestServerStats) -> Self {
        let products = (1..=config.products)
            .map(|id| Product {
                name: format!("product-{id}"),
                price: 1_000 * id as i64,
                stock: AtomicI64::new(config.product_stock),
                sold: AtomicU64::new(0),
            })
            .collect();
        Self {
            config,
            stats,
            coupons: Mutex::default(),
            products,
            orders: Mutex::default(),
            next_order: AtomicU64::new(1),
            points: Mutex::default(),
            ranking_warm: AtomicBool::new(false),
        }
    }

    fn hit(&self) {
        TestServerStats::inc(&self.stats.requests_total);
    }

    fn product(&self, id: u64) -> Option<&Product> {
        id.checked_sub(1)
            .and_then(|i| self.products.get(usize::try_from(i).ok()?))
    }

    fn product_json(&self, id: u64, p: &Product) -> Value {
        json!({
            "id": id,
            "name": p.name,
            "price": p.price,
            "stock": p.stock.load(Ordering::Relaxed),
        })
    }

    fn issue_coupon(&self, coupon_id: u64, user_id: u64) -> ApiResult {
        let mut coupons = self.coupons.lock().unwrap_or_else(|p| p.into_inner());
        let state = coupons.entry(coupon_id).or_default();
        if state.holders.contains(&user_id) {
            return Err(COUPON_ALREADY_ISSUED);
        }
        if state.issued >= self.config.coupon_stock {
            return Err(COUPON_SOLD_OUT);
        }
        state.issued += 1;
        state.holders.insert(user_id);
        TestServerStats::inc(&self.stats.coupons_issued);
        Ok((
            StatusCode::CREATED,
            Json(json!({ "couponId": coupon_id, "userId": user_id, "remaining": self.config.coupon_stock - state.issued })),
        ))
    }

    fn user_lock(&self, user_id: u64) -> Arc<tokio::sync::Mutex<i64>> {
        let mut points = self.points.lock().unwrap_or_else(|p| p.into_inner());
        points
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(self.config.initial_points)))
            .clone()
    }

    async fn charge(&self, user_id: u64, amount: i64) -> ApiResult {
        if amount <= 0 {
            return Err(POINT_INVALID_AMOUNT);
        }
        let lock = self.user_lock(user_id);
        let Ok(mut balance) = tokio::time::timeout(self.config.lock_timeout, lock.lock()).await
        else {
            TestServerStats::inc(&self.stats.lock_timeouts);
            return Err(LOCK_TIMEOUT);
        };
        sleep(self.config.charge_work).await;
        *balance += amount;
        TestServerStats::inc(&self.stats.charges);
        Ok((
            StatusCode::OK,
            Json(json!({ "userId": user_id, "balance": *balance })),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueCouponRequest {
    user_id: u64,
    coupon_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderItemRequest {
    product_id: u64,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderCreateRequest {
    user_id: u64,
    order_items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentRequest {
    #[serde(default)]
    use_point: i64,
    #[serde(default)]
    coupon_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointChargeRequest {
    user_id: u64,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct AmountRequest {
    amount: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    user_id: u64,
    status: &'static str,
    total_amount: i64,
}

async fn handle_issue_coupon(
    State(shop): State<AppState>,
    Json(req): Json<IssueCouponRequest>,
) -> ApiResult {
    shop.hit();
    shop.issue_coupon(req.coupon_id, req.user_id)
}

async fn handle_issue_coupon_by_path(
    State(shop): State<AppState>,
    Path(coupon_id): Path<u64>,
    Query(q): Query<UserQuery>,
) -> ApiResult {
    shop.hit();
    shop.issue_coupon(coupon_id, q.user_id)
}

async fn handle_create_order(
    State(shop): State<AppState>,
    Json(req): Json<OrderCreateRequest>,
) -> ApiResult {
    shop.hit();

    let mut reserved: Vec<(&Product, i64)> = Vec::with_capacity(req.order_items.len());
    let mut total = 0i64;
    let mut failure = None;
    for item in &req.order_items {
        let Some(product) = shop.product(item.product_id) else {
            failure = Some(PRODUCT_NOT_FOUND);
            break;
        };
        let qty = item.quantity.max(1);
        let taken = product
            .stock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s >= qty).then_some(s - qty)
            });
        if taken.is_err() {
            failure = Some(STOCK_INSUFFICIENT);
            break;
        }
        reserved.push((product, qty));
        total += product.price * qty;
    }

    if let Some(err) = failure {
        for (product, qty) in reserved {
            product.stock.fetch_add(qty, Ordering::AcqRel);
        }
        return Err(err);
    }
    for (product, qty) in reserved {
        product.sold.fetch_add(qty.unsigned_abs(), Ordering::Relaxed);
    }

    let order_id = shop.next_order.fetch_add(1, Ordering::Relaxed);
    shop.orders
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .insert(
            order_id,
            Order {
                user_id: req.user_id,
                amount: total,
                paid: false,
            },
        );
    TestServerStats::inc(&shop.stats.orders_created);

    let res = OrderResponse {
        order_id,
        user_id: req.user_id,
        status: "PENDING",
        total_amount: total,
    };
    Ok((StatusCode::CREATED, Json(json!(res))))
}

async fn handle_pay_order(
    State(shop): State<AppState>,
    Path(order_id): Path<u64>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult {
    shop.hit();

    let (user_id, amount) = {
        let orders = shop.orders.lock().unwrap_or_else(|p| p.into_inner());
        let order = orders.get(&order_id).ok_or(ORDER_NOT_FOUND)?;
        if order.paid {
            return Err(ORDER_ALREADY_PAID);
        }
        (order.user_id, order.amount)
    };

    if let Some(coupon_id) = req.coupon_id {
        let coupons = shop.coupons.lock().unwrap_or_else(|p| p.into_inner());
        let held = coupons
            .get(&coupon_id)
            .is_some_and(|c| c.holders.contains(&user_id));
        if !held {
            return Err(COUPON_NOT_FOUND);
        }
    }

    let use_point = req.use_point.max(0);
    if use_point > 0 {
        let lock = shop.user_lock(user_id);
        let mut balance = lock.lock().await;
        if *balance < use_point {
            return Err(POINT_INSUFFICIENT);
        }
        *balance -= use_point;
    }

    {
        let mut orders = shop.orders.lock().unwrap_or_else(|p| p.into_inner());
        match orders.get_mut(&order_id) {
            Some(order) if !order.paid => order.paid = true,
            Some(_) => return Err(ORDER_ALREADY_PAID),
            None => return Err(ORDER_NOT_FOUND),
        }
    }
    TestServerStats::inc(&shop.stats.payments);

    Ok((
        StatusCode::OK,
        Json(json!({
            "orderId": order_id,
            "status": "PAID",
            "paidAmount": (amount - use_point).max(0),
        })),
    ))
}

async fn handle_charge(
    State(shop): State<AppState>,
    Json(req): Json<PointChargeRequest>,
) -> ApiResult {
    shop.hit();
    shop.charge(req.user_id, req.amount).await
}

async fn handle_charge_by_path(
    State(shop): State<AppState>,
    Path(user_id): Path<u64>,
    Json(req): Json<AmountRequest>,
) -> ApiResult {
    shop.hit();
    shop.charge(user_id, req.amount).await
}

async fn handle_balance(State(shop): State<AppState>, Path(user_id): Path<u64>) -> ApiResult {
    shop.hit();
    let lock = shop.user_lock(user_id);
    let balance = *lock.lock().await;
    Ok((
        StatusCode::OK,
        Json(json!({ "userId": user_id, "balance": balance })),
    ))
}

async fn handle_products(State(shop): State<AppState>) -> ApiResult {
    shop.hit();
    let data: Vec<Value> = shop
        .products
        .iter()
        .zip(1u64..)
        .map(|(p, id)| shop.product_json(id, p))
        .collect();
    Ok((StatusCode::OK, Json(json!({ "data": data }))))
}

async fn handle_product(State(shop): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    shop.hit();
    let product = shop.product(id).ok_or(PRODUCT_NOT_FOUND)?;
    Ok((StatusCode::OK, Json(shop.product_json(id, product))))
}

/// Best sellers. The first call after startup pays a cache-miss delay.
async fn handle_popular(State(shop): State<AppState>) -> ApiResult {
    shop.hit();
    if !shop.ranking_warm.swap(true, Ordering::AcqRel) {
        sleep(shop.config.cold_ranking).await;
    }

    let mut ranked: Vec<(u64, &Product)> = (1u64..).zip(shop.products.iter()).collect();
    ranked.sort_by_key(|(id, p)| (std::cmp::Reverse(p.sold.load(Ordering::Relaxed)), *id));
    let data: Vec<Value> = ranked
        .into_iter()
        .take(5)
        .map(|(id, p)| {
            let mut v = shop.product_json(id, p);
            v["sold"] = json!(p.sold.load(Ordering::Relaxed));
            v
        })
        .collect();
    Ok((StatusCode::OK, Json(json!({ "data": data }))))
}

/// Misbehaving upstream: non-JSON error page.
async fn handle_broken(State(shop): State<AppState>) -> (StatusCode, &'static str) {
    shop.hit();
    (StatusCode::BAD_GATEWAY, "<html><body>502 Bad Gateway</body></html>")
}

pub fn router(config: TargetConfig, stats: TestServerStats) -> Router {
    let shop = Arc::new(Shop::new(config, stats));
    Router::new()
        .route(PATH_COUPON_ISSUE, post(handle_issue_coupon))
        .route("/api/coupons/{coupon_id}/issue", post(handle_issue_coupon_by_path))
        .route(PATH_ORDERS, post(handle_create_order))
        .route("/api/orders/{order_id}/payment", post(handle_pay_order))
        .route(PATH_POINTS_CHARGE, post(handle_charge))
        .route("/api/points/users/{user_id}/charge", post(handle_charge_by_path))
        .route("/api/points/{user_id}", get(handle_balance))
        .route(PATH_PRODUCTS, get(handle_products))
        .route(PATH_PRODUCTS_POPULAR, get(handle_popular))
        .route("/api/products/top", get(handle_popular))
        .route("/api/products/{id}", get(handle_product))
        .route(PATH_BROKEN, get(handle_broken))
        .with_state(shop)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(TargetConfig::default()).await
    }

    pub async fn start_with(config: TargetConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(config, stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
