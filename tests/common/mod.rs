#![allow(dead_code)]

//! Shared fixtures: tracing, recording interceptors, a fake transport,
//! sample components and a raw HTTP client.

pub mod tracing_init {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Install a test-writer subscriber once per test binary.
    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
                )
                .with_test_writer()
                .try_init();
        });
    }
}

pub mod interceptors {
    use std::sync::Arc;
    use std::time::Duration;

    use brrtboot::aspect::CheckOutcome;
    use brrtboot::interceptor::Interceptor;
    use brrtboot::server::{HttpRequest, HttpResponse};
    use parking_lot::Mutex;

    pub type EventLog = Arc<Mutex<Vec<String>>>;

    #[must_use]
    pub fn event_log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Appends `"<name>.before <path>"` / `"<name>.after <status>"` to a shared log.
    pub struct RecordingInterceptor {
        pub name: &'static str,
        pub log: EventLog,
        pub short_circuit: Option<u16>,
        pub fail_after: bool,
        pub panic_before: bool,
    }

    impl RecordingInterceptor {
        pub fn new(name: &'static str, log: &EventLog) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                short_circuit: None,
                fail_after: false,
                panic_before: false,
            }
        }

        pub fn short_circuit(mut self, status: u16) -> Self {
            self.short_circuit = Some(status);
            self
        }

        pub fn fail_after(mut self) -> Self {
            self.fail_after = true;
            self
        }

        pub fn panic_before(mut self) -> Self {
            self.panic_before = true;
            self
        }
    }

    impl Interceptor for RecordingInterceptor {
        fn before(&self, req: &mut HttpRequest) -> CheckOutcome {
            self.log.lock().push(format!("{}.before {}", self.name, req.path));
            if self.panic_before {
                panic!("{} exploded", self.name);
            }
            match self.short_circuit {
                Some(status) => CheckOutcome::reject(status, self.name),
                None => CheckOutcome::Continue,
            }
        }

        fn after(
            &self,
            _req: &HttpRequest,
            resp: &mut HttpResponse,
            _elapsed: Duration,
        ) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}.after {}", self.name, resp.status));
            if self.fail_after {
                anyhow::bail!("{} after failed", self.name);
            }
            resp.set_header(&format!("x-after-{}", self.name), "1");
            Ok(())
        }
    }
}

pub mod transport {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use brrtboot::config::ServerConfig;
    use brrtboot::server::{AppService, Listener, Transport};
    use parking_lot::Mutex;

    /// Records starts and stops, keeps the last service for in-process requests.
    #[derive(Default)]
    pub struct FakeTransport {
        pub starts: Arc<AtomicUsize>,
        pub stops: Arc<AtomicUsize>,
        pub fail: bool,
        pub last_service: Mutex<Option<AppService>>,
        pub last_port: Mutex<Option<u16>>,
    }

    impl FakeTransport {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn service(&self) -> Option<AppService> {
            self.last_service.lock().clone()
        }

        pub fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    struct FakeListener {
        addr: SocketAddr,
        stops: Arc<AtomicUsize>,
    }

    impl Listener for FakeListener {
        fn local_addr(&self) -> Option<SocketAddr> {
            Some(self.addr)
        }

        fn stop(self: Box<Self>) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Transport for FakeTransport {
        fn start(
            &self,
            config: &ServerConfig,
            service: AppService,
        ) -> anyhow::Result<Box<dyn Listener>> {
            if self.fail {
                anyhow::bail!("address already in use");
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_service.lock() = Some(service);
            *self.last_port.lock() = Some(config.port);
            Ok(Box::new(FakeListener {
                addr: SocketAddr::from(([127, 0, 0, 1], config.port)),
                stops: Arc::clone(&self.stops),
            }))
        }
    }
}

pub mod components {
    use std::collections::HashMap;
    use std::sync::Arc;

    use brrtboot::aspect::{
        AuthenticationAspect, CheckOutcome, PermissionsAspect, RequiresAuthentication,
        RequiresPermissions,
    };
    use brrtboot::container::{Component, ComponentDef, Inject, Injector, Registry};
    use brrtboot::cors::CorsPolicy;
    use brrtboot::reply::Reply;
    use brrtboot::router::{
        Action, ActionContext, ActionMeta, Controller, OwnerInfo, ParamType, Routes,
    };
    use brrtboot::server::HttpRequest;
    use parking_lot::Mutex;
    use serde_json::json;

    pub struct PingController;

    impl Component for PingController {}

    impl Controller for PingController {
        fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
            routes.get("/ping", Action::new("ping", |_ctx: &ActionContext<'_>| "pong"));
        }
    }

    pub trait UserDirectory: Send + Sync {
        fn name_of(&self, id: i64) -> Option<String>;
        fn add(&self, name: &str) -> i64;
    }

    pub struct InMemoryUsers {
        users: Mutex<HashMap<i64, String>>,
    }

    impl Default for InMemoryUsers {
        fn default() -> Self {
            let mut users = HashMap::new();
            users.insert(1, "ada".to_string());
            users.insert(2, "grace".to_string());
            Self {
                users: Mutex::new(users),
            }
        }
    }

    impl Component for InMemoryUsers {}

    impl UserDirectory for InMemoryUsers {
        fn name_of(&self, id: i64) -> Option<String> {
            self.users.lock().get(&id).cloned()
        }

        fn add(&self, name: &str) -> i64 {
            let mut users = self.users.lock();
            let id = users.keys().max().copied().unwrap_or(0) + 1;
            users.insert(id, name.to_string());
            id
        }
    }

    pub fn user_directory_def() -> ComponentDef<InMemoryUsers> {
        ComponentDef::new(InMemoryUsers::default())
            .provides::<dyn UserDirectory>(|c| c as Arc<dyn UserDirectory>)
    }

    /// `/users/...` routes over an injected [`UserDirectory`].
    #[derive(Default)]
    pub struct UserController {
        pub users: Inject<dyn UserDirectory>,
    }

    impl Component for UserController {
        fn wire(&self, injector: &mut Injector<'_>) {
            injector.inject(&self.users);
        }
    }

    impl Controller for UserController {
        fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
            routes
                .get(
                    "/users/{id}",
                    Action::bind(&self, "get_user", |this: &UserController, ctx: &ActionContext<'_>| {
                        let id = ctx.int("id").unwrap_or_default();
                        let users = this
                            .users
                            .get()
                            .ok_or_else(|| anyhow::anyhow!("user directory not wired"))?;
                        Ok::<_, anyhow::Error>(match users.name_of(id) {
                            Some(name) => Reply::json(json!({ "id": id, "name": name })),
                            None => Reply::Response(brrtboot::server::HttpResponse::error(
                                404,
                                "no such user",
                            )),
                        })
                    })
                    .param("id", ParamType::Integer),
                )
                .post(
                    "/users",
                    Action::bind(&self, "add_user", |this: &UserController, ctx: &ActionContext<'_>| {
                        let name = ctx.str("name").unwrap_or_default().to_string();
                        let users = this
                            .users
                            .get()
                            .ok_or_else(|| anyhow::anyhow!("user directory not wired"))?;
                        Ok::<_, anyhow::Error>(json!({ "id": users.add(&name), "name": name }))
                    })
                    .param("name", ParamType::String),
                );
        }
    }

    /// Actions that fault on purpose.
    pub struct FaultyController;

    impl Component for FaultyController {}

    impl Controller for FaultyController {
        fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
            routes
                .get(
                    "/fail",
                    Action::new("fail", |_ctx: &ActionContext<'_>| -> anyhow::Result<Reply> {
                        anyhow::bail!("database unavailable")
                    }),
                )
                .get(
                    "/boom",
                    Action::new("boom", |_ctx: &ActionContext<'_>| -> Reply {
                        panic!("handler blew up")
                    }),
                )
                .get("/empty", Action::new("empty", |_ctx: &ActionContext<'_>| ()));
        }
    }

    /// Guarded routes plus controller-level CORS.
    pub struct AdminController;

    impl Component for AdminController {}

    impl Controller for AdminController {
        fn routes(self: Arc<Self>, routes: &mut Routes<'_>) {
            routes
                .get(
                    "/admin/report",
                    Action::new("report", |ctx: &ActionContext<'_>| {
                        let user = ctx
                            .attribute("user")
                            .and_then(|v| v.as_str())
                            .unwrap_or("anonymous")
                            .to_string();
                        json!({ "report": "ok", "user": user })
                    })
                    .requires_authentication()
                    .requires_permissions(RequiresPermissions::all(&["reports:read"])),
                )
                .get(
                    "/admin/open",
                    Action::new("open", |_ctx: &ActionContext<'_>| "open")
                        .cors(CorsPolicy::default().with_origins(&["https://action.example"])),
                );
        }

        fn cors(&self) -> Option<CorsPolicy> {
            Some(CorsPolicy::default().with_origins(&["https://owner.example"]))
        }
    }

    /// Authenticates on an `x-user` header.
    #[derive(Default)]
    pub struct HeaderAuthentication {
        pub seen: Mutex<Vec<String>>,
    }

    impl Component for HeaderAuthentication {}

    impl AuthenticationAspect for HeaderAuthentication {
        fn check(
            &self,
            req: &HttpRequest,
            owner: &OwnerInfo,
            action: &ActionMeta,
            _decl: &RequiresAuthentication,
        ) -> CheckOutcome {
            self.seen
                .lock()
                .push(format!("{}::{}", owner.type_name, action.name));
            match req.get_header("x-user") {
                Some(_) => CheckOutcome::Continue,
                None => CheckOutcome::reject(401, "authentication required"),
            }
        }
    }

    /// Grants the comma-separated permissions of an `x-perms` header.
    #[derive(Default)]
    pub struct HeaderPermissions;

    impl Component for HeaderPermissions {}

    impl PermissionsAspect for HeaderPermissions {
        fn check(
            &self,
            req: &HttpRequest,
            _owner: &OwnerInfo,
            _action: &ActionMeta,
            decl: &RequiresPermissions,
        ) -> CheckOutcome {
            let granted: Vec<&str> = req
                .get_header("x-perms")
                .map(|p| p.split(',').map(str::trim).collect())
                .unwrap_or_default();
            if decl.is_satisfied_by(&granted) {
                CheckOutcome::Continue
            } else {
                CheckOutcome::reject(403, "missing permission")
            }
        }
    }

    /// Register every sample controller and service.
    pub fn register_samples(registry: &mut Registry) {
        registry.register_with(user_directory_def());
        registry.register_controller(PingController);
        registry.register_controller(UserController::default());
        registry.register_controller(FaultyController);
        registry.register_controller(AdminController);
    }

    pub fn register_aspects(registry: &mut Registry) {
        registry.register_with(
            ComponentDef::new(HeaderAuthentication::default())
                .provides::<dyn AuthenticationAspect>(|c| c as Arc<dyn AuthenticationAspect>),
        );
        registry.register_with(
            ComponentDef::new(HeaderPermissions)
                .provides::<dyn PermissionsAspect>(|c| c as Arc<dyn PermissionsAspect>),
        );
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Send a raw request and read until the peer goes quiet.
    pub fn send_request(addr: &SocketAddr, req: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let mut buf = Vec::new();
        loop {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read error: {:?}", e),
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// (status, headers lowercased, body)
    pub fn parse_response(resp: &str) -> (u16, Vec<(String, String)>, String) {
        let (head, body) = resp.split_once("\r\n\r\n").unwrap_or((resp, ""));
        let mut status = 0;
        let mut headers = Vec::new();
        for line in head.lines() {
            if line.starts_with("HTTP/1.1") {
                status = line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("0")
                    .parse()
                    .unwrap_or(0);
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }
        (status, headers, body.to_string())
    }

    pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}
