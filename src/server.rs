//! Native server: actix-web in front of the same router the Spin component uses.

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use tracing::{error, info};

use crate::config::Config;
use crate::context::MemoryContext;
use crate::{router, telemetry};

mod adapter {
    use actix_web::http::StatusCode;
    use actix_web::HttpResponse;
    use spin_sdk::http::{Method, Request, Response};

    /// Owned response parts, movable across the blocking pool boundary.
    pub struct Parts {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    fn spin_method(method: &str) -> Method {
        match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn to_spin_request(
        method: &str,
        uri: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Request {
        let mut req_builder = Request::builder();
        let method_set = req_builder.method(spin_method(method));
        let uri_set = method_set.uri(uri);

        let mut with_headers = uri_set;
        for (name, value) in headers {
            with_headers = with_headers.header(name.as_str(), value.as_str());
        }

        with_headers.body(body).build()
    }

    pub fn from_spin_response(spin_resp: Response) -> Parts {
        let headers = spin_resp
            .headers()
            .filter_map(|(name, value)| value.as_str().map(|v| (name.to_string(), v.to_string())))
            .collect();

        Parts {
            status: *spin_resp.status(),
            headers,
            body: spin_resp.body().to_vec(),
        }
    }

    pub fn to_actix_response(parts: Parts) -> HttpResponse {
        let mut response = HttpResponse::build(
            StatusCode::from_u16(parts.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        );
        for (name, value) in parts.headers {
            response.append_header((name, value));
        }
        response.body(parts.body)
    }
}

/// Credentialed cross-origin access for the configured frontend. Without one,
/// cross-origin requests are refused.
pub fn cors(config: &Config) -> Cors {
    let Some(origin) = &config.cors_origin else {
        return Cors::default();
    };
    Cors::default()
        .allowed_origin(origin)
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .supports_credentials()
        .max_age(3600)
}

pub fn context(config: Config) -> web::Data<MemoryContext> {
    web::Data::new(MemoryContext::in_memory(config))
}

/// Default service: every request goes through [`router::route`].
pub async fn handle_all(
    ctx: web::Data<MemoryContext>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let method = req.method().as_str().to_string();
    let uri = req.uri().to_string();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    // Password hashing is CPU bound; keep it off the async workers.
    let result = web::block(move || {
        let spin_req = adapter::to_spin_request(&method, &uri, &headers, body.to_vec());
        adapter::from_spin_response(router::route(ctx.get_ref(), spin_req))
    })
    .await;

    match result {
        Ok(parts) => adapter::to_actix_response(parts),
        Err(e) => {
            error!(error = %e, "request handler panicked");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({"success": false, "message": "Internal server error"}))
        }
    }
}

pub async fn run() -> std::io::Result<()> {
    telemetry::init();

    let config = Config::from_env();
    let address = config.bind_address.clone();
    let ctx = context(config);

    info!("Server listening on http://{}", address);
    if let Some(origin) = &ctx.config.cors_origin {
        info!(%origin, "CORS enabled");
    }

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&ctx.config))
            .app_data(ctx.clone())
            .default_service(web::route().to(handle_all))
    })
    .bind(address)?
    .run()
    .await
}
