//! Dispatcher - validates and routes server-initiated requests

use super::handlers::{ExecuteRequest, Handler, HandlerTable, ReadRequest, WriteRequest};
use super::queue::PathQueues;
use crate::registry::Registry;
use bytes::Bytes;
use futures::FutureExt;
use lwm2m_shared::{
    defaults, Address, Error, Message, NotFound, OperationKind, Request, ResourcePath, Response,
    ResponseCode, Token, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, warn};

type ExchangeKey = (Address, Token);

/// What is known about a request token from a given server
#[derive(Debug, Clone, PartialEq)]
enum Seen {
    New,
    InProgress,
    Answered(Response),
}

/// Memory of recent requests, used to recognise re-sends
///
/// Requests still being handled are always kept. Only answered requests
/// count against `capacity`, oldest answer evicted first.
struct RecentExchanges {
    entries: HashMap<ExchangeKey, Option<Response>>,
    answered: VecDeque<ExchangeKey>,
    capacity: usize,
}

impl RecentExchanges {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            answered: VecDeque::new(),
            capacity,
        }
    }

    /// Look up `key`, marking it in progress if unseen
    fn begin(&mut self, key: &ExchangeKey) -> Seen {
        match self.entries.get(key) {
            Some(Some(response)) => Seen::Answered(response.clone()),
            Some(None) => Seen::InProgress,
            None => {
                self.entries.insert(key.clone(), None);
                Seen::New
            }
        }
    }

    fn finish(&mut self, key: &ExchangeKey, response: &Response) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.replace(response.clone()).is_none() {
            self.answered.push_back(key.clone());
        }
        while self.answered.len() > self.capacity {
            if let Some(oldest) = self.answered.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// Routes requests from servers to the registry and bound handlers
///
/// Requests addressed at the same object instance are handled one at a time
/// in arrival order. A request re-sent with a token that is still being
/// handled is ignored; one that was already answered gets the same answer
/// again.
pub struct Dispatcher {
    registry: Arc<Registry>,
    handlers: Arc<HandlerTable>,
    transport: Arc<dyn Transport>,
    handler_timeout: Duration,
    queues: PathQueues,
    recent: Mutex<RecentExchanges>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        handlers: Arc<HandlerTable>,
        transport: Arc<dyn Transport>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            handlers,
            transport,
            handler_timeout,
            queues: PathQueues::new(),
            recent: Mutex::new(RecentExchanges::new(defaults::DEDUP_CAPACITY)),
        }
    }

    /// Queue an inbound request; its response is sent once it has run
    pub async fn submit(self: &Arc<Self>, source: Address, request: Request) {
        let key = (source.clone(), request.token);
        let seen = self.recent.lock().await.begin(&key);
        match seen {
            Seen::New => {}
            Seen::InProgress => {
                debug!("Ignoring re-sent {} from {} (token {})", request.path, source, request.token);
                return;
            }
            Seen::Answered(response) => {
                debug!("Repeating answer to {} from {} (token {})", request.path, source, request.token);
                self.reply(&source, response).await;
                return;
            }
        }

        // Unknown object types never get a queue
        let parsed = request
            .path
            .parse::<ResourcePath>()
            .and_then(|path| self.known_object(path));
        let path = match parsed {
            Ok(path) => path,
            Err(e) => {
                let response = Response::from_error(request.token, &e);
                self.recent.lock().await.finish(&key, &response);
                self.reply(&source, response).await;
                return;
            }
        };

        let dispatcher = Arc::clone(self);
        let job = async move {
            let response = dispatcher.dispatch(&source, &request).await;
            dispatcher.recent.lock().await.finish(&key, &response);
            dispatcher.reply(&source, response).await;
        };
        self.queues.submit(path.instance_path(), job.boxed()).await;
    }

    fn known_object(&self, path: ResourcePath) -> Result<ResourcePath, Error> {
        match self.registry.schema().object(path.object_id()) {
            Some(_) => Ok(path),
            None => Err(NotFound::Object(path.object_id()).into()),
        }
    }

    /// Handle one request and build its response
    pub async fn dispatch(&self, source: &Address, request: &Request) -> Response {
        match self.execute(source, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} {} from {} failed: {}", request.method, request.path, source, e);
                Response::from_error(request.token, &e)
            }
        }
    }

    async fn execute(&self, source: &Address, request: &Request) -> Result<Response, Error> {
        let path: ResourcePath = request.path.parse()?;
        let kind = OperationKind::classify(request, &path);
        let token = request.token;

        match kind {
            OperationKind::Create => {
                let created = self.registry.create(&path).await?;
                Ok(Response::new(token, ResponseCode::Created).with_location(created.to_string()))
            }
            OperationKind::Delete => {
                if !path.is_instance() {
                    return Err(Error::MethodNotAllowed(format!("delete on {}", path)));
                }
                self.registry.remove(&path).await?;
                Ok(Response::new(token, ResponseCode::Deleted))
            }
            OperationKind::Read | OperationKind::Observe => {
                let target = self.resource_target(kind, &path).await?;
                let value = self.read(source, kind, target).await?;
                Ok(Response::new(token, ResponseCode::Content).with_payload(value))
            }
            OperationKind::Write => {
                let target = self.resource_target(kind, &path).await?;
                if request.payload.is_empty() {
                    return Err(Error::BadRequest(format!("empty value for {}", path)));
                }
                self.write(source, target, request.payload.clone()).await?;
                Ok(Response::new(token, ResponseCode::Changed))
            }
            OperationKind::Execute => {
                let target = self.resource_target(kind, &path).await?;
                self.execute_resource(source, target, request.payload.clone())
                    .await?;
                Ok(Response::new(token, ResponseCode::Changed))
            }
        }
    }

    /// Resolve `path` against the registry and require a resource-level path
    async fn resource_target(
        &self,
        kind: OperationKind,
        path: &ResourcePath,
    ) -> Result<(u16, u16, u16), Error> {
        self.registry.resolve(path).await?;
        match (path.instance_id(), path.resource_id()) {
            (Some(instance), Some(resource)) => Ok((path.object_id(), instance, resource)),
            _ => Err(Error::MethodNotAllowed(format!("{} on {}", kind, path))),
        }
    }

    async fn read(
        &self,
        source: &Address,
        kind: OperationKind,
        (object_type, instance_id, resource_id): (u16, u16, u16),
    ) -> Result<Bytes, Error> {
        let path = ResourcePath::resource(object_type, instance_id, resource_id);
        let stored = self.registry.lookup(&path).await?;

        // Observe falls back to the read handler when none is bound for it
        let mut handler = self.handlers.get(source, kind).await;
        if handler.is_none() && kind == OperationKind::Observe {
            handler = self.handlers.get(source, OperationKind::Read).await;
        }

        match handler {
            Some(Handler::Read(handler)) | Some(Handler::Observe(handler)) => {
                let request = ReadRequest {
                    object_type,
                    instance_id,
                    resource_id,
                    value: stored,
                };
                self.run(&path, handler.read(request)).await
            }
            _ => stored.ok_or_else(|| NotFound::Resource(path).into()),
        }
    }

    async fn write(
        &self,
        source: &Address,
        (object_type, instance_id, resource_id): (u16, u16, u16),
        value: Bytes,
    ) -> Result<(), Error> {
        let path = ResourcePath::resource(object_type, instance_id, resource_id);
        if let Some(Handler::Write(handler)) = self.handlers.get(source, OperationKind::Write).await {
            let request = WriteRequest {
                object_type,
                instance_id,
                resource_id,
                value: value.clone(),
            };
            self.run(&path, handler.write(request)).await?;
        }
        self.registry
            .set_attribute(&path.instance_path(), resource_id, value)
            .await
    }

    async fn execute_resource(
        &self,
        source: &Address,
        (object_type, instance_id, resource_id): (u16, u16, u16),
        arguments: Bytes,
    ) -> Result<(), Error> {
        let path = ResourcePath::resource(object_type, instance_id, resource_id);
        match self.handlers.get(source, OperationKind::Execute).await {
            Some(Handler::Execute(handler)) => {
                let request = ExecuteRequest {
                    object_type,
                    instance_id,
                    resource_id,
                    arguments,
                };
                self.run(&path, handler.execute(request)).await
            }
            _ => Err(Error::MethodNotAllowed(format!("no execute handler for {}", path))),
        }
    }

    /// Run a handler future, turning panics into `Internal` and overruns into
    /// `Timeout`
    async fn run<T>(
        &self,
        path: &ResourcePath,
        handler: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        match timeout(self.handler_timeout, AssertUnwindSafe(handler).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                error!("Handler for {} panicked", path);
                Err(Error::Internal(format!("handler for {} panicked", path)))
            }
            Err(_) => {
                warn!("Handler for {} did not finish within {:?}", path, self.handler_timeout);
                Err(Error::Timeout)
            }
        }
    }

    async fn reply(&self, to: &Address, response: Response) {
        let token = response.token;
        if let Err(e) = self.transport.send(to, Message::Response(response)).await {
            warn!("Failed to send response to {} (token {}): {}", to, token, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lwm2m_shared::{Inbound, MemoryNetwork, Method};
    use tokio::sync::mpsc;

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        registry: Arc<Registry>,
        handlers: Arc<HandlerTable>,
        server: Address,
        server_rx: mpsc::Receiver<Inbound>,
    }

    async fn fixture() -> Fixture {
        let network = MemoryNetwork::new();
        let server = Address::new("server", 5683);
        let (_server_transport, server_rx) = network.bind(server.clone()).await.expect("bind server");
        let (client_transport, _client_rx) = network
            .bind(Address::new("client", 56830))
            .await
            .expect("bind client");

        let registry = Arc::new(Registry::default());
        registry.create(&ResourcePath::instance(3, 6)).await.expect("create");
        let handlers = Arc::new(HandlerTable::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            handlers.clone(),
            Arc::new(client_transport),
            Duration::from_millis(500),
        ));

        Fixture {
            dispatcher,
            registry,
            handlers,
            server,
            server_rx,
        }
    }

    fn request(method: Method, path: &str) -> Request {
        let mut request = Request::new(method, path);
        request.token = Token(7);
        request
    }

    #[tokio::test]
    async fn test_read_without_handler_returns_stored_value() {
        let f = fixture().await;
        f.registry
            .set_attribute(&ResourcePath::instance(3, 6), 2, Bytes::from_static(b"stored"))
            .await
            .expect("set");

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Get, "/3/6/2")).await;
        assert_eq!(response.code, ResponseCode::Content);
        assert_eq!(response.payload, "stored");
        assert_eq!(response.token, Token(7));
    }

    #[tokio::test]
    async fn test_read_handler_receives_stored_value() {
        let f = fixture().await;
        f.registry
            .set_attribute(&ResourcePath::instance(3, 6), 2, Bytes::from_static(b"ValueToBeRead"))
            .await
            .expect("set");
        f.handlers
            .bind(
                &f.server,
                Handler::read(|request: ReadRequest| async move {
                    let stored = request.value.unwrap_or_default();
                    Ok::<_, Error>(Bytes::from([&b"handled:"[..], &stored[..]].concat()))
                }),
            )
            .await;

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Get, "/3/6/2")).await;
        assert_eq!(response.payload, "handled:ValueToBeRead");
    }

    #[tokio::test]
    async fn test_read_errors() {
        let f = fixture().await;
        let cases = [
            ("/3/6/2", ResponseCode::NotFound),   // declared but unset
            ("/3/7/2", ResponseCode::NotFound),   // no such instance
            ("/3/6/999", ResponseCode::NotFound), // undeclared resource
            ("/9/0/0", ResponseCode::NotFound),   // unknown object
            ("/3/6", ResponseCode::MethodNotAllowed),
            ("/3", ResponseCode::MethodNotAllowed),
            ("/x/y", ResponseCode::NotFound),
        ];
        for (path, code) in cases {
            let response = f.dispatcher.dispatch(&f.server, &request(Method::Get, path)).await;
            assert_eq!(response.code, code, "GET {}", path);
        }
    }

    #[tokio::test]
    async fn test_write_through_handler_persists_value() {
        let f = fixture().await;
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        f.handlers
            .bind(
                &f.server,
                Handler::write(move |request: WriteRequest| {
                    let sink = sink.clone();
                    async move {
                        *sink.lock().await = Some(request);
                        Ok::<_, Error>(())
                    }
                }),
            )
            .await;

        let write = request(Method::Put, "/3/6/1").with_payload("TheValue");
        let response = f.dispatcher.dispatch(&f.server, &write).await;
        assert_eq!(response.code, ResponseCode::Changed);

        let seen = seen.lock().await.clone().expect("handler not called");
        assert_eq!(
            (seen.object_type, seen.instance_id, seen.resource_id),
            (3, 6, 1)
        );
        assert_eq!(seen.value, "TheValue");
        assert_eq!(
            f.registry.get(&ResourcePath::instance(3, 6), 1).await.expect("get"),
            "TheValue"
        );
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_stored() {
        let f = fixture().await;
        f.handlers
            .bind(
                &f.server,
                Handler::write(|_: WriteRequest| async {
                    Err::<(), _>(Error::BadRequest("read only".into()))
                }),
            )
            .await;

        let write = request(Method::Put, "/3/6/1").with_payload("TheValue");
        let response = f.dispatcher.dispatch(&f.server, &write).await;
        assert_eq!(response.code, ResponseCode::BadRequest);
        assert!(f.registry.get(&ResourcePath::instance(3, 6), 1).await.is_err());
    }

    #[tokio::test]
    async fn test_write_without_handler_and_empty_write() {
        let f = fixture().await;
        let write = request(Method::Put, "/3/6/1").with_payload("direct");
        assert_eq!(
            f.dispatcher.dispatch(&f.server, &write).await.code,
            ResponseCode::Changed
        );
        assert_eq!(
            f.registry.get(&ResourcePath::instance(3, 6), 1).await.expect("get"),
            "direct"
        );

        let empty = request(Method::Put, "/3/6/1");
        assert_eq!(
            f.dispatcher.dispatch(&f.server, &empty).await.code,
            ResponseCode::BadRequest
        );
    }

    #[tokio::test]
    async fn test_execute() {
        let f = fixture().await;
        let execute = request(Method::Post, "/3/6/4").with_payload("now");
        assert_eq!(
            f.dispatcher.dispatch(&f.server, &execute).await.code,
            ResponseCode::MethodNotAllowed
        );

        let args = Arc::new(Mutex::new(Bytes::new()));
        let sink = args.clone();
        f.handlers
            .bind(
                &f.server,
                Handler::execute(move |request: ExecuteRequest| {
                    let sink = sink.clone();
                    async move {
                        *sink.lock().await = request.arguments;
                        Ok::<_, Error>(())
                    }
                }),
            )
            .await;
        assert_eq!(
            f.dispatcher.dispatch(&f.server, &execute).await.code,
            ResponseCode::Changed
        );
        assert_eq!(*args.lock().await, "now");
    }

    #[tokio::test]
    async fn test_handlers_are_scoped_to_their_server() {
        let f = fixture().await;
        let other = Address::new("other", 5683);
        f.handlers
            .bind(&other, Handler::read(|_: ReadRequest| async { Ok::<_, Error>(Bytes::from_static(b"other")) }))
            .await;

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Get, "/3/6/2")).await;
        assert_eq!(response.code, ResponseCode::NotFound);
        let response = f.dispatcher.dispatch(&other, &request(Method::Get, "/3/6/2")).await;
        assert_eq!(response.payload, "other");
    }

    #[tokio::test]
    async fn test_observe_falls_back_to_read_handler() {
        let f = fixture().await;
        f.handlers
            .bind(&f.server, Handler::read(|_: ReadRequest| async { Ok::<_, Error>(Bytes::from_static(b"read")) }))
            .await;

        let observe = request(Method::Get, "/3/6/2").with_observe();
        assert_eq!(f.dispatcher.dispatch(&f.server, &observe).await.payload, "read");

        f.handlers
            .bind(&f.server, Handler::observe(|_: ReadRequest| async { Ok::<_, Error>(Bytes::from_static(b"observed")) }))
            .await;
        assert_eq!(f.dispatcher.dispatch(&f.server, &observe).await.payload, "observed");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_internal_error() {
        let f = fixture().await;
        f.handlers
            .bind(
                &f.server,
                Handler::read(|request: ReadRequest| async move {
                    if request.resource_id == 2 {
                        panic!("handler bug");
                    }
                    Ok::<_, Error>(Bytes::new())
                }),
            )
            .await;

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Get, "/3/6/2")).await;
        assert_eq!(response.code, ResponseCode::InternalServerError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let f = fixture().await;
        f.handlers
            .bind(
                &f.server,
                Handler::read(|_: ReadRequest| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, Error>(Bytes::new())
                }),
            )
            .await;

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Get, "/3/6/2")).await;
        assert_eq!(response.code, ResponseCode::GatewayTimeout);
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let f = fixture().await;
        let response = f.dispatcher.dispatch(&f.server, &request(Method::Post, "/3")).await;
        assert_eq!(response.code, ResponseCode::Created);
        assert_eq!(response.location.as_deref(), Some("/3/0"));

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Post, "/3/6")).await;
        assert_eq!(response.code, ResponseCode::BadRequest);

        let response = f.dispatcher.dispatch(&f.server, &request(Method::Delete, "/3/6")).await;
        assert_eq!(response.code, ResponseCode::Deleted);
        let response = f.dispatcher.dispatch(&f.server, &request(Method::Delete, "/3/6")).await;
        assert_eq!(response.code, ResponseCode::NotFound);
        let response = f.dispatcher.dispatch(&f.server, &request(Method::Delete, "/3")).await;
        assert_eq!(response.code, ResponseCode::MethodNotAllowed);
    }

    #[tokio::test]
    async fn test_submit_answers_and_repeats_for_resends() {
        let mut f = fixture().await;
        let write = request(Method::Put, "/3/6/1").with_payload("once");

        f.dispatcher.submit(f.server.clone(), write.clone()).await;
        let first = f.server_rx.recv().await.expect("no response");
        f.dispatcher.submit(f.server.clone(), write).await;
        let second = f.server_rx.recv().await.expect("no repeated response");

        assert_eq!(first.message, second.message);
        let Message::Response(response) = first.message else {
            panic!("expected a response");
        };
        assert_eq!(response.code, ResponseCode::Changed);
        assert_eq!(response.token, Token(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_ignores_resend_while_in_progress() {
        let mut f = fixture().await;
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        f.handlers
            .bind(
                &f.server,
                Handler::execute(move |_: ExecuteRequest| {
                    let counter = counter.clone();
                    async move {
                        *counter.lock().await += 1;
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, Error>(())
                    }
                }),
            )
            .await;

        let execute = request(Method::Post, "/3/6/4");
        f.dispatcher.submit(f.server.clone(), execute.clone()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.dispatcher.submit(f.server.clone(), execute).await;

        let inbound = f.server_rx.recv().await.expect("no response");
        assert_eq!(inbound.message.token(), Token(7));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.server_rx.try_recv().is_err());
        assert_eq!(*calls.lock().await, 1);
    }

    #[test]
    fn test_recent_exchanges_evicts_oldest_answer() {
        let mut recent = RecentExchanges::new(2);
        let server = Address::new("server", 5683);
        let keys: Vec<ExchangeKey> = (1..=3).map(|i| (server.clone(), Token(i))).collect();

        for key in &keys {
            assert_eq!(recent.begin(key), Seen::New);
        }
        let response = Response::new(Token(3), ResponseCode::Changed);
        recent.finish(&keys[2], &response);

        assert_eq!(recent.begin(&keys[2]), Seen::Answered(response.clone()));
        assert_eq!(recent.begin(&keys[1]), Seen::InProgress);
        assert_eq!(recent.begin(&keys[0]), Seen::InProgress);

        recent.finish(&keys[0], &response);
        recent.finish(&keys[1], &response);
        assert_eq!(recent.begin(&keys[2]), Seen::New);
        assert_eq!(recent.begin(&keys[0]), Seen::Answered(response.clone()));
        assert_eq!(recent.begin(&keys[1]), Seen::Answered(response));
    }

    #[test]
    fn test_recent_exchanges_keeps_requests_in_progress() {
        let mut recent = RecentExchanges::new(2);
        let server = Address::new("server", 5683);
        let keys: Vec<ExchangeKey> = (1..=10).map(|i| (server.clone(), Token(i))).collect();

        for key in &keys {
            assert_eq!(recent.begin(key), Seen::New);
        }
        // Far more in flight than the capacity, none forgotten
        for key in &keys {
            assert_eq!(recent.begin(key), Seen::InProgress);
        }

        let response = Response::new(Token(1), ResponseCode::Content);
        for key in &keys[..9] {
            recent.finish(key, &response);
        }
        assert_eq!(recent.begin(&keys[9]), Seen::InProgress);
        assert_eq!(recent.begin(&keys[0]), Seen::New);
        assert_eq!(recent.begin(&keys[8]), Seen::Answered(response));
    }

    #[tokio::test]
    async fn test_unknown_objects_are_answered_without_a_queue() {
        let mut f = fixture().await;
        for instance in 0..200u16 {
            let mut read = request(Method::Get, &format!("/9999/{instance}/0"));
            read.token = Token(1000 + u64::from(instance));
            f.dispatcher.submit(f.server.clone(), read).await;

            let inbound = f.server_rx.recv().await.expect("no response");
            let Message::Response(response) = inbound.message else {
                panic!("expected a response");
            };
            assert_eq!(response.code, ResponseCode::NotFound);
        }
        assert_eq!(f.dispatcher.queues.len().await, 0);
    }

    #[tokio::test]
    async fn test_queues_drain_after_requests_finish() {
        let mut f = fixture().await;
        for instance in 0..50u16 {
            let mut read = request(Method::Get, &format!("/3/{instance}/0"));
            read.token = Token(2000 + u64::from(instance));
            f.dispatcher.submit(f.server.clone(), read).await;
            f.server_rx.recv().await.expect("no response");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.dispatcher.queues.len().await, 0);
    }
}
