use std::future::Future;
use std::sync::Arc;

use stampede_http::{HttpClient, HttpRequest, HttpResponse};

/// Request/response collaborator. Suspends only the calling VU.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = stampede_http::Result<HttpResponse>> + Send;
}

impl Transport for HttpClient {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = stampede_http::Result<HttpResponse>> + Send {
        self.request(req)
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = stampede_http::Result<HttpResponse>> + Send {
        T::send(self, req)
    }
}
