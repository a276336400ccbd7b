// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tower middleware that drives [`Hooks`] for every HTTP request.
//!
//! Requests are counted under their route template rather than the raw
//! path, so `/api/franchise/1` and `/api/franchise/2` share one series. The
//! template comes from a [`PathTemplate`] request extension set by an outer
//! layer, else from the resolver given to [`TelemetryLayer::with_templates`],
//! else the raw path is used.
//!
//! ```rust,ignore
//! let routes = RouteTemplates::new(["/api/franchise/:franchiseId", "/api/order"]);
//! let service = tower::ServiceBuilder::new()
//!     .layer(TelemetryLayer::new(telemetry.hooks()).with_templates(move |path| routes.resolve(path)))
//!     .service(router);
//! ```

use crate::hooks::{bearer_token, Hooks, RequestHandle};
use hyper::header::AUTHORIZATION;
use hyper::{Request, Response};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tower::{Layer, Service};

/// Route template a request matched, e.g. `/api/franchise/:franchiseId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate(pub String);

type TemplateResolver = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Matches paths against `:param` route templates, segment by segment.
#[derive(Debug, Clone, Default)]
pub struct RouteTemplates {
    templates: Vec<String>,
}

impl RouteTemplates {
    pub fn new<I, T>(templates: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            templates: templates.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the first template matching `path`.
    pub fn resolve(&self, path: &str) -> Option<String> {
        self.templates
            .iter()
            .find(|template| template_matches(template, path))
            .cloned()
    }
}

fn template_matches(template: &str, path: &str) -> bool {
    let mut template_segments = template.trim_end_matches('/').split('/');
    let mut path_segments = path.trim_end_matches('/').split('/');
    loop {
        match (template_segments.next(), path_segments.next()) {
            (None, None) => return true,
            (Some(expected), Some(actual)) => {
                let is_param = expected.starts_with(':') && !actual.is_empty();
                if !is_param && expected != actual {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[derive(Clone)]
pub struct TelemetryLayer {
    hooks: Hooks,
    templates: Option<TemplateResolver>,
}

impl TelemetryLayer {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            hooks,
            templates: None,
        }
    }

    /// Sets the resolver used for requests without a [`PathTemplate`]
    /// extension. Paths it returns `None` for are counted as-is.
    pub fn with_templates<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.templates = Some(Arc::new(resolver));
        self
    }
}

impl fmt::Debug for TelemetryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryLayer")
            .field("hooks", &self.hooks)
            .field("templates", &self.templates.is_some())
            .finish()
    }
}

impl<S> Layer<S> for TelemetryLayer {
    type Service = TelemetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TelemetryService {
            inner,
            hooks: self.hooks.clone(),
            templates: self.templates.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TelemetryService<S> {
    inner: S,
    hooks: Hooks,
    templates: Option<TemplateResolver>,
}

fn route_template<'a, B>(
    templates: Option<&TemplateResolver>,
    req: &'a Request<B>,
) -> Cow<'a, str> {
    if let Some(PathTemplate(template)) = req.extensions().get::<PathTemplate>() {
        return Cow::Borrowed(template);
    }
    let path = req.uri().path();
    match templates.and_then(|resolve| resolve(path)) {
        Some(template) => Cow::Owned(template),
        None => Cow::Borrowed(path),
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TelemetryService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let handle = {
            let template = route_template(self.templates.as_ref(), &req);
            self.hooks.on_request_start(req.method().as_str(), &template)
        };

        if let Some(token) = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
        {
            self.hooks.on_authenticated_request(token);
        }

        ResponseFuture {
            inner: Box::pin(self.inner.call(req)),
            hooks: self.hooks.clone(),
            handle: Some(handle),
        }
    }
}

/// Resolves to the inner response and records the request latency,
/// whether the inner service succeeded or failed. A future dropped before
/// completion, e.g. on client disconnect, records the time until the drop.
pub struct ResponseFuture<F> {
    inner: Pin<Box<F>>,
    hooks: Hooks,
    handle: Option<RequestHandle>,
}

impl<F> ResponseFuture<F> {
    fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.hooks.on_request_finish(handle);
        }
    }
}

impl<F: Future> Future for ResponseFuture<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let output = ready!(self.inner.as_mut().poll(cx));
        self.finish();
        Poll::Ready(output)
    }
}

impl<F> Drop for ResponseFuture<F> {
    fn drop(&mut self) {
        self.finish();
    }
}
