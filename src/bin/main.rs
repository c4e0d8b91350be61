#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate network;

    use std::sync::Arc;

    use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer};
    use network::config;
    use network::core::db::{init_test_data, MemoryStore};

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request, Response};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => Method::Other(other.to_string()),
            };

            let mut builder = Request::builder();
            builder.method(method).uri(req.uri().to_string());
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    builder.header(name.as_str(), val_str);
                }
            }
            builder.body(body.to_vec()).build()
        }

        pub fn spin_to_actix_response(spin_resp: Response) -> actix_web::HttpResponse {
            let status = actix_web::http::StatusCode::from_u16(*spin_resp.status())
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

            let mut response = actix_web::HttpResponse::build(status);
            for (name, value) in spin_resp.headers() {
                response.append_header((name, value.as_bytes().to_vec()));
            }
            response.body(spin_resp.body().to_vec())
        }
    }

    pub async fn run() -> std::io::Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let store = match config::data_file() {
            Some(path) => MemoryStore::open(path).map_err(std::io::Error::other)?,
            None => MemoryStore::new(),
        };
        if config::seed_demo_data() {
            init_test_data(&store).map_err(std::io::Error::other)?;
        }
        let store = web::Data::new(Arc::new(store));

        let addr = config::bind_address();
        log::info!("Server listening on http://{}", addr);

        HttpServer::new(move || {
            App::new()
                .app_data(store.clone())
                .wrap(middleware::Logger::default())
                .default_service(web::route().to(handle_all))
        })
        .bind(addr)?
        .run()
        .await
    }

    async fn handle_all(
        store: web::Data<Arc<MemoryStore>>,
        req: HttpRequest,
        body: web::Bytes,
    ) -> HttpResponse {
        let spin_req = adapter::actix_to_spin_request(&req, body);
        let spin_resp = network::router::handle(store.get_ref().as_ref(), &spin_req);
        adapter::spin_to_actix_response(spin_resp)
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
