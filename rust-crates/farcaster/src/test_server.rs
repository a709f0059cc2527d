use actix_web::{
    App,
    HttpServer,
    dev::ServerHandle,
    web,
};
use std::net::TcpListener;

/// Real HTTP server standing in for a third-party API during tests.
pub struct FakeUpstream {
    base_url: String,
    handle: ServerHandle,
}

impl FakeUpstream {
    pub fn start<F>(configure: F) -> Self
    where
        F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = HttpServer::new(move || App::new().configure(configure.clone()))
            .workers(1)
            .listen(listener)
            .unwrap()
            .run();
        let handle = server.handle();
        std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });
        Self { base_url, handle }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        let _ = self.handle.stop(false);
    }
}
