//! End-to-end login lifecycle through the BFF router against a stub identity
//! provider: create → codeUrl → callback → me → refresh → clear.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use bff_gateway::oauth::{IdentityClaims, derive_challenge};
use bff_gateway::session::SessionTokens;
use common::{
    REJECTED_REFRESH_TOKEN, StubIdentityProvider, StubUpstream, body_json, bff_app, bff_config,
    cookie_pair, spawn,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

fn request(method: &str, uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn full_login_lifecycle() {
    // GIVEN: a BFF wired to a stub provider
    let idp = StubIdentityProvider::default();
    let idp_addr = spawn(idp.router()).await;
    let upstream = StubUpstream::default();
    let upstream_addr = spawn(upstream.router()).await;
    let config = bff_config(idp_addr, &format!("http://{upstream_addr}"));
    let (app, _store) = bff_app(&config);

    // WHEN: the browser creates a session
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/session/create")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie_pair(&response);
    let body = body_json(response).await;
    assert_eq!(cookie, format!("BFFSESSION={}", body["sessionId"].as_str().unwrap()));

    // AND: asks for the authorize URL
    let response = app
        .clone()
        .oneshot(request("GET", "/v1/auth/session/codeUrl", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let authorize = url::Url::parse(body_json(response).await["url"].as_str().unwrap()).unwrap();
    assert_eq!(authorize.path(), "/tenant/oauth2/v2.0/authorize");
    let challenge = authorize
        .query_pairs()
        .find(|(k, _)| k == "code_challenge")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    // AND: the provider redirects back with a code
    let response = app
        .clone()
        .oneshot(request("GET", "/v1/auth/session/accessToken?code=good-code", &cookie))
        .await
        .unwrap();

    // THEN: the browser lands on the client app
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://localhost:3000"
    );

    // AND: the provider saw the verifier behind the published challenge
    let forms = idp.forms();
    assert_eq!(forms.len(), 1);
    let exchange = &forms[0];
    assert_eq!(exchange["grant_type"], "authorization_code");
    assert_eq!(exchange["code"], "good-code");
    assert_eq!(exchange["client_id"], "client-123");
    assert_eq!(exchange["client_secret"], "s3cret");
    assert_eq!(
        exchange["redirect_uri"],
        "http://127.0.0.1:3001/v1/auth/session/accessToken"
    );
    assert_eq!(derive_challenge(&exchange["code_verifier"]), challenge);

    // AND: the identity is readable
    let response = app
        .clone()
        .oneshot(request("GET", "/v1/auth/me", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "name": "Ada Lovelace", "roles": ["role.alpha", "role.beta"] })
    );

    // WHEN: tokens are refreshed twice and the provider never rotates
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("GET", "/v1/auth/session/refreshToken", &cookie))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // THEN: both refreshes presented the original refresh token
    let forms = idp.forms();
    assert_eq!(forms.len(), 3);
    for refresh in &forms[1..] {
        assert_eq!(refresh["grant_type"], "refresh_token");
        assert_eq!(refresh["refresh_token"], "rt-1");
    }

    // AND: the identity survives a refresh without an id_token
    let response = app
        .clone()
        .oneshot(request("GET", "/v1/auth/me", &cookie))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["name"], "Ada Lovelace");

    // WHEN: the browser logs out
    let response = app
        .clone()
        .oneshot(request("POST", "/v1/auth/session/clear", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["logoutUrl"],
        format!(
            "http://{idp_addr}/tenant/oauth2/v2.0/logout?post_logout_redirect_uri=http%3A%2F%2Flocalhost%3A3000"
        )
    );

    // THEN: the session is gone
    let response = app
        .oneshot(request("GET", "/v1/auth/me", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refreshed_access_token_is_used_by_proxy() {
    let idp = StubIdentityProvider::default();
    let idp_addr = spawn(idp.router()).await;
    let upstream = StubUpstream::default();
    let upstream_addr = spawn(upstream.router()).await;
    let config = bff_config(idp_addr, &format!("http://{upstream_addr}"));
    let (app, store) = bff_app(&config);

    let session = store.create().await;
    let cookie = format!("BFFSESSION={session}");
    app.clone()
        .oneshot(request("GET", "/v1/auth/session/codeUrl", &cookie))
        .await
        .unwrap();
    app.clone()
        .oneshot(request("GET", "/v1/auth/session/accessToken?code=ok", &cookie))
        .await
        .unwrap();
    app.clone()
        .oneshot(request("GET", "/v1/auth/session/refreshToken", &cookie))
        .await
        .unwrap();

    let response = app
        .oneshot(request("GET", "/v1/proxy/data/metrics", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let hits = upstream.hits();
    assert_eq!(hits[0].authorization.as_deref(), Some("Bearer at-2"));
}

#[tokio::test]
async fn rejected_code_relays_provider_error_and_stores_nothing() {
    // GIVEN: a pending login
    let idp = StubIdentityProvider::default();
    let idp_addr = spawn(idp.router()).await;
    let config = bff_config(idp_addr, "http://127.0.0.1:9");
    let (app, store) = bff_app(&config);
    let session = store.create().await;
    let cookie = format!("BFFSESSION={session}");
    app.clone()
        .oneshot(request("GET", "/v1/auth/session/codeUrl", &cookie))
        .await
        .unwrap();

    // WHEN: the provider rejects the code
    let response = app
        .clone()
        .oneshot(request("GET", "/v1/auth/session/accessToken?code=bad", &cookie))
        .await
        .unwrap();

    // THEN: its status and body come back and no tokens are stored
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "error": "invalid_grant" }));
    let stored = store.get(&session).await.unwrap();
    assert!(stored.access_token.is_none());
    assert!(stored.code_verifier.is_none());

    // AND: replaying the callback finds no verifier
    let response = app
        .oneshot(request("GET", "/v1/auth/session/accessToken?code=good", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(idp.forms().len(), 1);
}

#[tokio::test]
async fn second_code_url_supersedes_first_verifier() {
    let idp = StubIdentityProvider::default();
    let idp_addr = spawn(idp.router()).await;
    let config = bff_config(idp_addr, "http://127.0.0.1:9");
    let (app, store) = bff_app(&config);
    let session = store.create().await;
    let cookie = format!("BFFSESSION={session}");

    let mut challenges = Vec::new();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("GET", "/v1/auth/session/codeUrl", &cookie))
            .await
            .unwrap();
        let url = url::Url::parse(body_json(response).await["url"].as_str().unwrap()).unwrap();
        challenges.push(
            url.query_pairs()
                .find(|(k, _)| k == "code_challenge")
                .map(|(_, v)| v.into_owned())
                .unwrap(),
        );
    }
    assert_ne!(challenges[0], challenges[1]);

    app.oneshot(request("GET", "/v1/auth/session/accessToken?code=ok", &cookie))
        .await
        .unwrap();
    let forms = idp.forms();
    assert_eq!(derive_challenge(&forms[0]["code_verifier"]), challenges[1]);
}

#[tokio::test]
async fn unknown_session_cookie_gets_a_fresh_session() {
    let config = bff_config("127.0.0.1:9".parse().unwrap(), "http://127.0.0.1:9");
    let (app, store) = bff_app(&config);

    let response = app
        .oneshot(request("POST", "/v1/auth/session/create", "BFFSESSION=stale"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie_pair(&response);
    assert_ne!(cookie, "BFFSESSION=stale");
    let id = body_json(response).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(store.get(&id.as_str().into()).await.is_some());
}

#[tokio::test]
async fn rejected_refresh_relays_provider_error_and_keeps_tokens() {
    // GIVEN: an authenticated session whose refresh token the provider no longer accepts
    let idp = StubIdentityProvider::default();
    let idp_addr = spawn(idp.router()).await;
    let upstream = StubUpstream::default();
    let upstream_addr = spawn(upstream.router()).await;
    let config = bff_config(idp_addr, &format!("http://{upstream_addr}"));
    let (app, store) = bff_app(&config);
    let session = store.create().await;
    store
        .set_tokens(
            &session,
            SessionTokens {
                access_token: "at-1".to_string(),
                refresh_token: Some(REJECTED_REFRESH_TOKEN.to_string()),
                claims: IdentityClaims {
                    name: Some("Ada".to_string()),
                    roles: vec![],
                },
            },
        )
        .await
        .unwrap();
    let cookie = format!("BFFSESSION={session}");

    // WHEN: the browser asks for a refresh
    let response = app
        .clone()
        .oneshot(request("GET", "/v1/auth/session/refreshToken", &cookie))
        .await
        .unwrap();

    // THEN: the provider's status and body come back
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({ "error": "invalid_grant" }));

    // AND: the stored tokens are untouched
    let stored = store.get(&session).await.unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("at-1"));
    assert_eq!(stored.refresh_token.as_deref(), Some(REJECTED_REFRESH_TOKEN));

    // AND: the proxy keeps presenting the old access token
    let response = app
        .oneshot(request("GET", "/v1/proxy/data/metrics", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.hits()[0].authorization.as_deref(), Some("Bearer at-1"));
}

#[tokio::test]
async fn failed_callback_still_binds_the_session_it_allocated() {
    // GIVEN: a browser with no session cookie
    let config = bff_config("127.0.0.1:9".parse().unwrap(), "http://127.0.0.1:9");
    let (app, store) = bff_app(&config);

    // WHEN: it hits the callback directly
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/auth/session/accessToken?code=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // THEN: the request fails but the new session's cookie is still set
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let cookie = cookie_pair(&response);
    let id = cookie.strip_prefix("BFFSESSION=").unwrap();
    assert!(store.get(&id.into()).await.is_some());
}
