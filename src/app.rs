use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{self, context::resolve_context};
use crate::error::{method_not_allowed, not_found};
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .route("/health", get(|| async { "ok" }).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_context))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, HeaderMap, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<String>,
        headers: &[(header::HeaderName, &str)],
    ) -> Reply {
        let mut req = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            req = req.header(name.clone(), *value);
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b)),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn post_json(app: &Router, uri: &str, body: Value) -> Reply {
        send(app, Method::POST, uri, Some(body.to_string()), &[]).await
    }

    async fn get_with_bearer(app: &Router, uri: &str, token: &str) -> Reply {
        let auth = format!("Bearer {token}");
        send(app, Method::GET, uri, None, &[(header::AUTHORIZATION, auth.as_str())]).await
    }

    fn ana() -> Value {
        json!({
            "name": "Ana",
            "email": "ana@x.com",
            "cpf": "123.456.789-01",
            "password": "s3cret",
            "role": "Psicologo",
            "crp": "CRP123"
        })
    }

    fn app() -> Router {
        build_app(AppState::fake())
    }

    #[tokio::test]
    async fn register_then_login() {
        let app = app();

        let res = post_json(&app, "/cadastrar_usuario/", ana()).await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["message"], "Cadastro realizado com sucesso!");
        assert!(res.body["token"].as_str().is_some_and(|t| !t.is_empty()));

        let res = post_json(
            &app,
            "/login_usuario/",
            json!({ "email": "ana@x.com", "password": "s3cret" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["message"], "Login bem-sucedido!");
        assert_eq!(res.body["role"], "Psicologo");
        assert!(res.body["token"].is_string());
    }

    #[tokio::test]
    async fn second_registration_with_same_email_is_rejected() {
        let app = app();
        assert_eq!(
            post_json(&app, "/cadastrar_usuario/", ana()).await.status,
            StatusCode::CREATED
        );

        let mut again = ana();
        again["email"] = json!("  ANA@x.com ");
        let res = post_json(&app, "/cadastrar_usuario/", again).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body, json!({ "error": "E-mail já cadastrado." }));
    }

    #[tokio::test]
    async fn registration_validation_failures() {
        let app = app();

        let mut bad_cpf = ana();
        bad_cpf["cpf"] = json!("12345678901");
        let res = post_json(&app, "/cadastrar_usuario/", bad_cpf).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            res.body["error"],
            "CPF inválido. O formato deve ser XXX.XXX.XXX-XX."
        );

        let mut no_crm = ana();
        no_crm["role"] = json!("Psiquiatra");
        let res = post_json(&app, "/cadastrar_usuario/", no_crm).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "O CRM é obrigatório para psiquiatras.");

        let res = post_json(&app, "/cadastrar_usuario/", json!({})).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        // nothing above reached the store
        let res = post_json(
            &app,
            "/login_usuario/",
            json!({ "email": "ana@x.com", "password": "s3cret" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn physician_registers_with_crm() {
        let app = app();
        let body = json!({
            "name": "Caio",
            "email": "caio@x.com",
            "phone": "11 99999-0000",
            "cpf": "987.654.321-00",
            "password": "pw",
            "role": "Medico",
            "crm": "CRM-SP 1234"
        });
        let res = post_json(&app, "/cadastrar_usuario/", body).await;
        assert_eq!(res.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn malformed_json_is_dados_invalidos() {
        let app = app();
        for raw in ["{not json", "", "[1,2]", "\"text\""] {
            let res = send(
                &app,
                Method::POST,
                "/cadastrar_usuario/",
                Some(raw.to_string()),
                &[],
            )
            .await;
            assert_eq!(res.status, StatusCode::BAD_REQUEST, "body {raw:?}");
            assert_eq!(res.body, json!({ "error": "Dados inválidos" }));
        }
    }

    #[tokio::test]
    async fn unsupported_methods_get_405_json() {
        let app = app();
        for (method, uri) in [
            (Method::GET, "/cadastrar_usuario/"),
            (Method::GET, "/login_usuario/"),
            (Method::PUT, "/api/token/"),
            (Method::POST, "/api/protegida/"),
            (Method::DELETE, "/get-csrf-token/"),
        ] {
            let res = send(&app, method.clone(), uri, None, &[]).await;
            assert_eq!(res.status, StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
            assert_eq!(res.body, json!({ "error": "Método não permitido" }));
        }
    }

    #[tokio::test]
    async fn login_failures() {
        let app = app();
        post_json(&app, "/cadastrar_usuario/", ana()).await;

        let res = post_json(
            &app,
            "/login_usuario/",
            json!({ "email": "nobody@x.com", "password": "s3cret" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body, json!({ "error": "Usuário não encontrado" }));

        let res = post_json(
            &app,
            "/login_usuario/",
            json!({ "email": "ana@x.com", "password": "wrong" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body, json!({ "error": "Credenciais inválidas" }));

        let res = post_json(&app, "/login_usuario/", json!({ "email": "ana@x.com" })).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn token_pair_and_refresh() {
        let app = app();
        post_json(&app, "/cadastrar_usuario/", ana()).await;

        let res = post_json(
            &app,
            "/api/token/",
            json!({ "email": "ana@x.com", "password": "s3cret" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["email"], "ana@x.com");
        assert_eq!(res.body["name"], "Ana");
        assert_eq!(res.body["role"], "Psicologo");
        assert!(res.body["user_id"].is_string());
        let access = res.body["access"].as_str().unwrap().to_string();
        let refresh = res.body["refresh"].as_str().unwrap().to_string();

        let res = post_json(&app, "/api/token/refresh/", json!({ "refresh": refresh })).await;
        assert_eq!(res.status, StatusCode::OK);
        let new_access = res.body["access"].as_str().unwrap().to_string();
        assert_eq!(
            get_with_bearer(&app, "/api/protegida/", &new_access).await.status,
            StatusCode::OK
        );

        let res = post_json(&app, "/api/token/refresh/", json!({ "refresh": access })).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        let res = post_json(&app, "/api/token/refresh/", json!({ "refresh": "garbage" })).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_pair_refuses_unknown_email_with_401() {
        let app = app();
        let res = post_json(
            &app,
            "/api/token/",
            json!({ "email": "nobody@x.com", "password": "x" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_route_requires_access_token() {
        let app = app();
        let res = send(&app, Method::GET, "/api/protegida/", None, &[]).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body, json!({ "error": "Não autorizado" }));

        let token = post_json(&app, "/cadastrar_usuario/", ana()).await.body["token"]
            .as_str()
            .unwrap()
            .to_string();
        let res = get_with_bearer(&app, "/api/protegida/", &token).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["user"]["email"], "ana@x.com");
        assert_eq!(res.body["user"]["role"], "Psicologo");

        let res = get_with_bearer(&app, "/api/protegida/", "tampered").await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn csrf_token_is_issued_and_reused() {
        let app = app();
        let res = send(&app, Method::GET, "/get-csrf-token/", None, &[]).await;
        assert_eq!(res.status, StatusCode::OK);
        let token = res.body["csrfToken"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 64);
        let cookie = res.headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with(&format!("csrftoken={token};")));

        let sent = format!("csrftoken={token}");
        let res = send(
            &app,
            Method::GET,
            "/get-csrf-token/",
            None,
            &[(header::COOKIE, sent.as_str())],
        )
        .await;
        assert_eq!(res.body["csrfToken"], token.as_str());
    }

    #[tokio::test]
    async fn google_sign_in_creates_user_once_and_blocks_password_login() {
        let app = app();

        let res = post_json(&app, "/api/auth/google/", json!({ "token": "valid:bia@gmail.com" })).await;
        assert_eq!(res.status, StatusCode::OK);
        let token = res.body["token"].as_str().unwrap().to_string();

        let me = get_with_bearer(&app, "/api/protegida/", &token).await;
        assert_eq!(me.body["user"]["email"], "bia@gmail.com");
        let first_id = me.body["user"]["id"].clone();

        let res = post_json(&app, "/api/auth/google/", json!({ "token": "valid:bia@gmail.com" })).await;
        let token = res.body["token"].as_str().unwrap().to_string();
        let me = get_with_bearer(&app, "/api/protegida/", &token).await;
        assert_eq!(me.body["user"]["id"], first_id);

        let res = post_json(
            &app,
            "/login_usuario/",
            json!({ "email": "bia@gmail.com", "password": "" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let res = post_json(
            &app,
            "/login_usuario/",
            json!({ "email": "bia@gmail.com", "password": "guess" }),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Credenciais inválidas");
    }

    #[tokio::test]
    async fn google_rejections_are_400() {
        let app = app();
        let res = post_json(&app, "/api/auth/google/", json!({ "token": "forged" })).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body, json!({ "error": "Token do Google inválido" }));

        let res = post_json(&app, "/api/auth/google/", json!({ "token": "offline" })).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            res.body["error"],
            "Não foi possível validar o token do Google"
        );

        let res = post_json(&app, "/api/auth/google/", json!({})).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_and_health() {
        let app = app();
        let res = send(&app, Method::GET, "/nope", None, &[]).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body, json!({ "error": "Rota não encontrada" }));

        let res = send(&app, Method::GET, "/health", None, &[]).await;
        assert_eq!(res.status, StatusCode::OK);
    }
}
