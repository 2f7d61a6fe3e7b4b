//! Command dispatch: one request in, one reply out.

use anyhow::Result;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use murmur_store::{Aggregator, Store};
use murmur_types::api::{Request, Response, STATUS_OK, STATUS_UNKNOWN};
use murmur_types::events::Broadcast;
use murmur_types::models::{Message, MessageKind, Summary};

use crate::broadcast::{self, BroadcastSink};
use crate::config::ServerConfig;
use crate::error::CommandError;

pub struct CommandServer {
    config: ServerConfig,
    store: Store,
    aggregator: Aggregator,
    sink: Box<dyn BroadcastSink>,
}

impl CommandServer {
    /// Open the data directory named by `config`, creating missing files.
    pub fn open(config: ServerConfig, sink: Box<dyn BroadcastSink>) -> Result<Self> {
        let store = Store::open(config.data_dir.clone())?;
        let aggregator = Aggregator::new(store.reports_dir());
        Ok(Self {
            config,
            store,
            aggregator,
            sink,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn rebuild_summary(&self) -> Result<Summary> {
        self.aggregator.rebuild()
    }

    /// Decode a raw request, handle it and encode the reply. A request that
    /// does not decode still gets an error reply.
    pub fn handle_raw(&mut self, parts: &[Bytes]) -> Result<Vec<u8>> {
        let codec = self.config.codec;
        let decoded = match parts {
            [body] => codec.decode_request(body),
            _ => Err(CommandError::MalformedRequest(format!(
                "expected a single frame, got {}",
                parts.len()
            ))),
        };

        let response = match decoded {
            Ok(request) => self.handle(request),
            Err(e) => {
                warn!("Rejecting request: {}", e);
                Response::new(None, e.to_data())
            }
        };
        codec.encode_response(&response)
    }

    pub fn handle(&mut self, request: Request) -> Response {
        // Files may have been edited since the last request.
        self.store.reload();

        let service = request.service.clone();
        debug!("Handling {:?}", service);

        let result = match service.as_deref() {
            Some("login") => self.login(&request),
            Some("channel") => self.channel(&request),
            Some("users") => Ok(json!({ "users": self.store.users() })),
            Some("channels") => Ok(json!({ "channels": self.store.channels() })),
            Some("publish") => self.publish(&request),
            Some("message") => self.message(&request),
            Some("report") => self.report(),
            _ => {
                warn!("Unknown service {:?}", service);
                Ok(json!({ "status": STATUS_UNKNOWN, "service": service }))
            }
        };

        let data = result.unwrap_or_else(|e| {
            match &e {
                CommandError::Storage(_) => error!("{:?} failed: {}", service, e),
                _ => debug!("{:?} refused: {}", service, e),
            }
            e.to_data()
        });
        Response::new(service, data)
    }

    fn login(&mut self, request: &Request) -> Result<Value, CommandError> {
        let user = required(request, "user")?;
        if self.store.add_user(user).map_err(CommandError::Storage)? {
            debug!("Registered user {}", user);
        }
        Ok(ok())
    }

    fn channel(&mut self, request: &Request) -> Result<Value, CommandError> {
        let channel = required(request, "channel")?;
        if self.store.add_channel(channel).map_err(CommandError::Storage)? {
            debug!("Created channel {}", channel);
        }
        Ok(ok())
    }

    fn publish(&mut self, request: &Request) -> Result<Value, CommandError> {
        let user = required(request, "user")?;
        let channel = required(request, "channel")?;
        let text = required(request, "message")?;

        if self.config.validate_references && !self.store.has_channel(channel) {
            return Err(CommandError::UnknownChannel(channel.to_string()));
        }

        let message = self
            .store
            .append_message(MessageKind::Public, user, channel, text)
            .map_err(CommandError::Storage)?;
        self.after_append(&message);
        Ok(ok())
    }

    fn message(&mut self, request: &Request) -> Result<Value, CommandError> {
        let src = required(request, "src")?;
        let dst = required(request, "dst")?;
        let text = required(request, "message")?;

        if self.config.validate_references && !self.store.has_user(dst) {
            return Err(CommandError::UnknownUser(dst.to_string()));
        }

        let message = self
            .store
            .append_message(MessageKind::Private, src, dst, text)
            .map_err(CommandError::Storage)?;
        self.after_append(&message);
        Ok(ok())
    }

    fn report(&self) -> Result<Value, CommandError> {
        let summary = self
            .aggregator
            .load()
            .map_err(CommandError::SummaryUnreadable)?
            .ok_or(CommandError::SummaryNotFound)?;
        serde_json::to_value(summary).map_err(|e| CommandError::SummaryUnreadable(e.into()))
    }

    /// Runs once the message is on disk.
    fn after_append(&self, message: &Message) {
        let event = Broadcast::from_message(message);
        match broadcast::encode(self.config.broadcast, &event) {
            Ok(parts) => self.sink.send(parts),
            Err(e) => warn!("Dropping broadcast for {}: {:#}", event.topic(), e),
        }

        if self.config.auto_summary {
            if let Err(e) = self.aggregator.rebuild() {
                warn!("Summary rebuild failed: {:#}", e);
            }
        }
    }
}

fn required<'a>(request: &'a Request, name: &'static str) -> Result<&'a str, CommandError> {
    request.field(name).ok_or(CommandError::MissingField(name))
}

fn ok() -> Value {
    json!({ "status": STATUS_OK })
}
