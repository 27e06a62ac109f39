use std::collections::HashMap;

use super::message::{Event, Incoming, Response};
use crate::error::DispatchError;

type EventHandler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;
type ResponseHandler = Box<dyn FnMut(&Response) -> anyhow::Result<()> + Send>;

/// Caller-side routing of drained messages: events by subscription, responses
/// by method.
#[derive(Default)]
pub struct EventDispatcher {
    channels: HashMap<String, EventHandler>,
    methods: HashMap<String, ResponseHandler>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered for `channel`.
    pub fn register_channel<F>(&mut self, channel: impl Into<String>, handler: F)
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        self.channels.insert(channel.into(), Box::new(handler));
    }

    pub fn register_response<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: FnMut(&Response) -> anyhow::Result<()> + Send + 'static,
    {
        self.methods.insert(method.into(), Box::new(handler));
    }

    pub fn dispatch(&mut self, message: &Incoming) -> Result<(), DispatchError> {
        match message {
            Incoming::Event(event) => {
                let handler = self
                    .channels
                    .get_mut(&event.subscription)
                    .ok_or_else(|| DispatchError::UnregisteredChannel(event.subscription.clone()))?;
                handler(event).map_err(|reason| DispatchError::Handler {
                    route: event.subscription.clone(),
                    reason,
                })
            }
            Incoming::Response(response) => {
                let handler = self
                    .methods
                    .get_mut(&response.method)
                    .ok_or_else(|| DispatchError::UnregisteredMethod(response.method.clone()))?;
                handler(response).map_err(|reason| DispatchError::Handler {
                    route: response.method.clone(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn event(subscription: &str) -> Incoming {
        Incoming::Event(Event {
            subscription: subscription.to_string(),
            channel: None,
            instrument_name: None,
            data: vec![json!({"b": 1.5})],
        })
    }

    #[test]
    fn test_routes_events_and_responses() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        let sink = seen.clone();
        dispatcher.register_channel("ticker.A_B", move |event| {
            sink.lock().unwrap().push(event.data[0]["b"].clone());
            Ok(())
        });
        let sink = seen.clone();
        dispatcher.register_response("public/get-instruments", move |response| {
            sink.lock().unwrap().push(json!(response.id));
            Ok(())
        });

        dispatcher.dispatch(&event("ticker.A_B")).unwrap();
        dispatcher
            .dispatch(&Incoming::Response(Response {
                id: 7,
                method: "public/get-instruments".to_string(),
                code: 0,
                result: None,
                message: None,
            }))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![json!(1.5), json!(7)]);
    }

    #[test]
    fn test_unregistered_and_failing_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let err = dispatcher.dispatch(&event("ticker.X_Y")).unwrap_err();
        assert!(err.is_unregistered());

        dispatcher.register_channel("ticker.X_Y", |_| bail!("bad payload"));
        let err = dispatcher.dispatch(&event("ticker.X_Y")).unwrap_err();
        assert!(!err.is_unregistered());
        assert!(err.to_string().contains("bad payload"));
    }
}
