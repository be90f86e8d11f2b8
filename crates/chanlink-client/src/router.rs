//! Inbound routing: service messages, correlated replies, consumer pushes.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::PoisonError;

use chanlink_transport::TransportEvent;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::client::Shared;
use crate::envelope::{ConsumerPush, Inbound, Reply, ServiceMessage};
use crate::error::{ClientError, EndpointError, ReportedError};
use crate::events::ConnectionEvent;

impl Shared {
    pub(crate) fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                info!("connected");
                self.connectivity.emit(&ConnectionEvent::Connected);
            }
            TransportEvent::Closed => {
                info!("disconnected");
                self.connectivity.emit(&ConnectionEvent::Disconnected);
            }
            TransportEvent::Message(text) => self.route(&text),
        }
    }

    /// Route one inbound text message.
    pub(crate) fn route(&self, raw: &str) {
        match Inbound::parse(raw) {
            Ok(Inbound::Service(message)) => self.on_service(message),
            Ok(Inbound::Reply(reply)) => self.on_reply(reply),
            Ok(Inbound::UnmatchedReply(cmd_id)) => {
                debug!(%cmd_id, "reply for unknown call ignored");
            }
            Ok(Inbound::Push(push)) => self.on_push(push),
            Err(err) => self.report(err),
        }
    }

    /// Log an error with no owning call and hand it to every error listener.
    pub(crate) fn report(&self, err: ReportedError) {
        error!(error = %err, "chanlink error");
        self.errors.emit(&err);
    }

    fn on_service(&self, message: ServiceMessage) {
        match message.error {
            Some(kind) => self.report(ReportedError::Service(EndpointError::new(
                kind,
                message.error_data,
            ))),
            None => debug!(data = %message.data, "service message"),
        }
    }

    fn on_reply(&self, reply: Reply) {
        let record = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(reply.cmd_id);
        let Some(record) = record else {
            debug!(cmd_id = %reply.cmd_id, "reply for settled call ignored");
            return;
        };

        let elapsed = record.elapsed().as_secs_f64();
        if self.options.debug_logging {
            let endpoint = record.endpoint();
            if self.options.log_response_payloads {
                debug!(
                    cmd_id = %reply.cmd_id,
                    elapsed,
                    error = ?reply.error,
                    data = %reply.data,
                    "<- [{}] {endpoint}",
                    reply.cmd_id
                );
            } else {
                debug!(
                    cmd_id = %reply.cmd_id,
                    elapsed,
                    error = ?reply.error,
                    "<- [{}] {endpoint}",
                    reply.cmd_id
                );
            }
        }

        let result = match reply.error {
            Some(kind) => Err(ClientError::Remote(EndpointError::new(
                kind,
                reply.error_data,
            ))),
            None => Ok(reply.data),
        };
        record.settle(result);
    }

    fn on_push(&self, push: ConsumerPush) {
        for name in push.consumers {
            let handler = self
                .consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .lookup(&name);
            let handler = match handler {
                Ok(handler) => handler,
                Err(_) => {
                    self.report(ReportedError::ConsumerNotFound { name });
                    continue;
                }
            };

            if self.options.debug_logging {
                debug!(consumer = %name, "push");
            }
            let data: Value = push.data.clone();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(data))) {
                self.report(ReportedError::ConsumerPanicked {
                    name,
                    message: panic_message(panic.as_ref()),
                });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
