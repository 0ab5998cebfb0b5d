use std::sync::Arc;

use tracing::debug;

use crate::{
    app_context::AppContext,
    core::{Invocation, StatusKind},
    handler::{self, Chain, Handler, ResponseCallback, write_back_err},
    router::SourceInfo,
};

/// Applies route rules to pick the destination version and tags.
#[derive(Debug)]
pub struct RouterHandler {
    ctx: Arc<AppContext>,
}

impl RouterHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for RouterHandler {
    fn name(&self) -> &str {
        handler::ROUTER
    }

    fn handle(&self, chain: &Chain, inv: &mut Invocation, cb: ResponseCallback<'_>) {
        let headers = inv.headers();
        let source = SourceInfo::from_invocation(inv);
        match self.ctx.router.route(&headers, &source, inv) {
            Ok(()) => chain.next(inv, cb),
            Err(e) => {
                let status = self.ctx.status.status(&inv.protocol, StatusKind::ServiceUnavailable);
                write_back_err(e, status, cb);
                // The caller already has its answer; the rest of the chain still runs
                // and its response is dropped.
                chain.next(
                    inv,
                    Box::new(|resp| {
                        debug!(status = resp.status, "Discarding response after route failure")
                    }),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        config::MemoryConfigSource,
        core::Response,
        discovery::StaticDiscovery,
        handler::ServiceType,
    };

    struct Counter(Arc<AtomicUsize>);

    impl Handler for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn handle(&self, _chain: &Chain, _inv: &mut Invocation, cb: ResponseCallback<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            cb(Response::ok(None));
        }
    }

    #[test]
    fn test_route_failure_answers_once_and_continues() {
        let ctx = Arc::new(
            AppContext::builder()
                .config(Arc::new(MemoryConfigSource::new()))
                .discovery(Arc::new(StaticDiscovery::new()))
                .build()
                .unwrap(),
        );
        ctx.router
            .store()
            .load_yaml(
                "routeRule:\n  orders:\n    - match:\n        source: billing\n      route:\n        - tags: {version: \"1.0\"}\n          weight: 100\n",
            )
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let mut chain = Chain::new(ServiceType::Consumer, "test");
        chain.add_handler(Arc::new(RouterHandler::new(Arc::clone(&ctx))));
        chain.add_handler(Arc::new(Counter(Arc::clone(&hits))));

        let mut responses = Vec::new();
        let mut inv = Invocation::new("orders", "", "");
        chain.next(&mut inv, Box::new(|r| responses.push(r.status)));

        assert_eq!(responses, vec![503]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
