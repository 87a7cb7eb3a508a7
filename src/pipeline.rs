//! Event pipeline: discard filters, debouncing, routing, dispatch.
//!
//! The HTTP layer hands every verified, normalized event to
//! [`Pipeline::handle`]. From there:
//!
//! 1. If any top-level filter rule matches, the event is discarded.
//! 2. Review-class events go through the flood debouncer when it is
//!    enabled; the consolidated event re-enters at the delivery step.
//! 3. Delivery announces the event to its channels, routes it, and
//!    dispatches every matching action.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::actions::ActionDispatcher;
use crate::debounce::FloodDebouncer;
use crate::filter::{any_rule_matches, FilterRule};
use crate::hooks::Router;
use crate::report::Reporter;
use crate::webhooks::Event;

struct PipelineInner {
    discard: Vec<FilterRule>,
    router: Router,
    dispatcher: ActionDispatcher,
    debouncer: Option<FloodDebouncer>,
    reporter: Reporter,
}

/// The full event-handling pipeline behind the webhook endpoint.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Builds the pipeline. A debounce window enables flood prevention and
    /// spawns the task that delivers consolidated events.
    pub fn new(
        discard: Vec<FilterRule>,
        router: Router,
        dispatcher: ActionDispatcher,
        reporter: Reporter,
        debounce_window: Option<Duration>,
    ) -> Self {
        let (debouncer, consolidated) = match debounce_window {
            Some(window) => {
                let (debouncer, rx) = FloodDebouncer::new(window);
                (Some(debouncer), Some(rx))
            }
            None => (None, None),
        };

        let pipeline = Pipeline {
            inner: Arc::new(PipelineInner {
                discard,
                router,
                dispatcher,
                debouncer,
                reporter,
            }),
        };

        if let Some(mut rx) = consolidated {
            let delivery = pipeline.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    delivery.deliver(&event).await;
                }
            });
        }

        pipeline
    }

    /// Handles one normalized event end to end.
    pub async fn handle(&self, event: Event) {
        if any_rule_matches(&self.inner.discard, &event.fields) {
            debug!(repo = %event.repo, eventtype = %event.eventtype, "event discarded by filter");
            return;
        }

        if let Some(debouncer) = &self.inner.debouncer {
            if event.is_review_class() {
                if let Some(pr) = event.pr_number() {
                    debouncer.submit(event, pr);
                    return;
                }
            }
        }

        self.deliver(&event).await;
    }

    async fn deliver(&self, event: &Event) {
        self.inner.reporter.event_summary(event);
        let actions: Vec<String> = self
            .inner
            .router
            .route(event)
            .into_iter()
            .map(str::to_string)
            .collect();
        debug!(
            repo = %event.repo,
            hook = %event.hook,
            count = actions.len(),
            "routing event"
        );
        for action in actions {
            self.inner.dispatcher.dispatch(&action, event).await;
        }
    }
}
