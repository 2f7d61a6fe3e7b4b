#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::Value;
use tokio::net::TcpStream;

use murmur_relay::frame;
use murmur_server::{BroadcastSink, CommandServer, ServerConfig, WireCodec};
use murmur_types::api::{Request, Response};

/// Sink that keeps every broadcast for inspection.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Vec<Bytes>>>>);

impl Recorder {
    pub fn sent(&self) -> Vec<Vec<Bytes>> {
        self.0.lock().unwrap().clone()
    }
}

impl BroadcastSink for Recorder {
    fn send(&self, parts: Vec<Bytes>) {
        self.0.lock().unwrap().push(parts);
    }
}

pub fn config(dir: &Path) -> ServerConfig {
    ServerConfig {
        data_dir: dir.to_path_buf(),
        ..ServerConfig::default()
    }
}

pub fn open(config: ServerConfig) -> (CommandServer, Recorder) {
    let recorder = Recorder::default();
    let server = CommandServer::open(config, Box::new(recorder.clone())).unwrap();
    (server, recorder)
}

pub fn call(server: &mut CommandServer, service: &str, data: Value) -> Response {
    server.handle(Request::new(service, data))
}

/// Minimal request/reply client for the command endpoint.
pub struct CommandClient {
    stream: TcpStream,
    codec: WireCodec,
}

impl CommandClient {
    pub async fn connect(addr: &str, codec: WireCodec) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { stream, codec }
    }

    pub async fn call(&mut self, service: &str, data: Value) -> Response {
        let raw = self.codec.encode_request(&Request::new(service, data)).unwrap();
        let reply = self.call_raw(vec![Bytes::from(raw)]).await;
        self.codec.decode_response(&reply).unwrap()
    }

    pub async fn call_raw(&mut self, parts: Vec<Bytes>) -> Bytes {
        frame::write_message(&mut self.stream, &parts).await.unwrap();
        let mut reply = frame::read_message(&mut self.stream)
            .await
            .unwrap()
            .expect("server closed the connection");
        assert_eq!(reply.len(), 1, "reply must be a single frame");
        reply.remove(0)
    }
}
