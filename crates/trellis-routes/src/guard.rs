// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Guard chain and state resolver
//!
//! The resolver and the guards are compiled into the front of a route's pre-handler
//! list: resolver first, then guards in registration order, then explicit pre-handlers.
//! Steps run one after another and the first rejection ends the chain.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::{error::HttpError, request::RequestContext};

/// A check that either lets the request through or rejects it
pub type Guard =
    Arc<dyn for<'r> Fn(&'r RequestContext) -> BoxFuture<'r, Result<(), HttpError>> + Send + Sync>;

/// A step run before the handler that may mutate the request
pub type PreHandler =
    Arc<dyn for<'r> Fn(&'r mut RequestContext) -> BoxFuture<'r, Result<(), HttpError>> + Send + Sync>;

/// Wrap a closure as a [`PreHandler`]
pub fn pre_handler<F>(step: F) -> PreHandler
where
    F: for<'r> Fn(&'r mut RequestContext) -> BoxFuture<'r, Result<(), HttpError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(step)
}

/// Wrap a closure as a [`Guard`]
pub fn guard<F>(check: F) -> Guard
where
    F: for<'r> Fn(&'r RequestContext) -> BoxFuture<'r, Result<(), HttpError>> + Send + Sync + 'static,
{
    Arc::new(check)
}

pub(crate) fn guard_step(check: Guard) -> PreHandler {
    pre_handler(move |ctx| check(&*ctx))
}

pub(crate) fn resolver_step<R, F>(resolver: F) -> PreHandler
where
    R: Send + Sync + 'static,
    F: for<'r> Fn(&'r RequestContext) -> BoxFuture<'r, Result<R, HttpError>> + Send + Sync + 'static,
{
    let resolver = Arc::new(resolver);
    pre_handler(move |ctx| {
        let resolver = Arc::clone(&resolver);
        Box::pin(async move {
            let state = resolver(&*ctx).await?;
            ctx.extensions_mut().insert(Arc::new(state));
            Ok(())
        })
    })
}

/// Run the steps in order, stopping at the first rejection
pub(crate) async fn run_chain(
    steps: &[PreHandler],
    ctx: &mut RequestContext,
) -> Result<(), HttpError> {
    for (position, step) in steps.iter().enumerate() {
        if let Err(error) = step(&mut *ctx).await {
            debug!(
                route = %ctx.route(),
                step = position,
                status = error.status().as_u16(),
                "pre-handler chain rejected request"
            );
            return Err(error);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::{Extensions, HeaderMap, Method, StatusCode, Uri};

    use super::*;
    use crate::request::RouteInfo;

    fn context() -> RequestContext {
        RequestContext::new(
            Method::GET,
            Uri::from_static("/api/admin"),
            HeaderMap::new(),
            Arc::new(RouteInfo::new(Method::GET, "/api/admin")),
            Extensions::new(),
        )
    }

    fn counting(counter: &Arc<AtomicUsize>, outcome: Option<StatusCode>) -> PreHandler {
        let counter = Arc::clone(counter);
        guard_step(guard(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match outcome {
                    Some(status) => Err(HttpError::message(status, "rejected")),
                    None => Ok(()),
                }
            })
        }))
    }

    #[tokio::test]
    async fn first_rejection_stops_the_chain() {
        let calls = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];
        let steps = vec![
            counting(&calls[0], None),
            counting(&calls[1], Some(StatusCode::FORBIDDEN)),
            counting(&calls[2], None),
        ];

        let error = run_chain(&steps, &mut context()).await.unwrap_err();
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolver_state_reaches_later_steps() {
        let resolver = resolver_step(|ctx: &RequestContext| {
            let path = ctx.route().path.clone();
            Box::pin(async move { Ok::<_, HttpError>(path) })
        });
        let check = guard_step(guard(|ctx| {
            Box::pin(async move {
                match ctx.resolved::<String>() {
                    Some(path) if path.as_str() == "/api/admin" => Ok(()),
                    _ => Err(HttpError::forbidden("no state")),
                }
            })
        }));

        let mut ctx = context();
        run_chain(&[resolver, check], &mut ctx).await.unwrap();
        assert_eq!(ctx.resolved::<String>().unwrap().as_str(), "/api/admin");
    }
}
