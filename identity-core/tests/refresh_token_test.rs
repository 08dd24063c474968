mod common;

use chrono::Duration;
use common::TestApp;
use identity_core::models::{PrincipalStatus, SessionStatus};
use identity_core::repository::PrincipalRepository;
use identity_core::services::{AuthError, RefreshRequest, SecurityEventType};
use uuid::Uuid;

#[tokio::test]
async fn test_replayed_refresh_token_is_rejected_and_successor_survives() {
    let app = TestApp::spawn().await;
    let t1 = Uuid::new_v4();
    let u1 = app.create_principal(t1, "u1@example.com").await;

    let login = app.login(&u1).await.expect("login failed");
    let refresh1 = login.tokens.refresh_token.clone();

    let pair2 = app
        .core
        .auth
        .refresh(RefreshRequest::new(&refresh1))
        .await
        .expect("first refresh failed");
    assert_ne!(pair2.refresh_token, refresh1);
    assert_ne!(pair2.access_token, login.tokens.access_token);

    let replay = app.core.auth.refresh(RefreshRequest::new(&refresh1)).await;
    assert!(matches!(replay, Err(AuthError::TokenReuseDetected)));
    assert_eq!(app.audit.count(SecurityEventType::TokenReuse), 1);

    // refresh2 is still good for exactly one use.
    let pair3 = app
        .core
        .auth
        .refresh(RefreshRequest::new(&pair2.refresh_token))
        .await
        .expect("successor refresh failed");
    assert!(matches!(
        app.core
            .auth
            .refresh(RefreshRequest::new(&pair2.refresh_token))
            .await,
        Err(AuthError::TokenReuseDetected)
    ));

    let claims = app
        .core
        .auth
        .authenticate(&pair3.access_token)
        .await
        .expect("access token from rotation must verify")
        .claims;
    assert_eq!(claims.sub, u1.id);
    assert_eq!(claims.tenant_id, Some(t1));
}

#[tokio::test]
async fn test_rotation_chain_has_single_live_tail() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "chain@example.com")
        .await;

    let login = app.login(&principal).await.unwrap();
    let first_id = login.tokens.refresh_token_id;
    let mut raw = login.tokens.refresh_token;
    for _ in 0..3 {
        let pair = app
            .core
            .auth
            .refresh(RefreshRequest::new(&raw))
            .await
            .unwrap();
        raw = pair.refresh_token;
    }

    let chain = app.core.refresh.chain(first_id).await.unwrap();
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[0].token_id, first_id);
    assert_eq!(chain.iter().filter(|r| !r.revoked).count(), 1);
    assert!(!chain[3].revoked);
    for pair in chain.windows(2) {
        assert_eq!(pair[0].replaced_by_token_id, Some(pair[1].token_id));
        assert_eq!(pair[1].replaces_token_id, Some(pair[0].token_id));
    }
}

#[tokio::test]
async fn test_concurrent_rotation_has_one_winner() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "race@example.com")
        .await;
    let raw = app.login(&principal).await.unwrap().tokens.refresh_token;

    let (a, b) = tokio::join!(
        app.core.auth.refresh(RefreshRequest::new(&raw)),
        app.core.auth.refresh(RefreshRequest::new(&raw)),
    );

    let results = [a, b];
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AuthError::TokenReuseDetected))));

    let live: Vec<_> = app
        .core
        .refresh
        .list_for_principal(principal.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| !r.revoked)
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].token_id, winners[0].refresh_token_id);
}

#[tokio::test]
async fn test_expired_refresh_token_is_invalid() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "expired@example.com")
        .await;
    let raw = app.login(&principal).await.unwrap().tokens.refresh_token;

    app.clock.advance(Duration::days(8));
    assert!(matches!(
        app.core.auth.refresh(RefreshRequest::new(&raw)).await,
        Err(AuthError::InvalidRefreshToken)
    ));
}

#[tokio::test]
async fn test_garbage_and_access_tokens_are_not_refresh_tokens() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "garbage@example.com")
        .await;
    let login = app.login(&principal).await.unwrap();

    for bad in ["", "not-a-token", login.tokens.access_token.as_str()] {
        let err = app
            .core
            .auth
            .refresh(RefreshRequest::new(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
        assert_eq!(err.public_message(), "Authentication failed");
    }
}

#[tokio::test]
async fn test_suspended_principal_cannot_refresh() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "suspend@example.com")
        .await;
    let raw = app.login(&principal).await.unwrap().tokens.refresh_token;

    let mut suspended = app.reload(principal.id).await;
    suspended.status = PrincipalStatus::Suspended;
    app.store.update_principal(&suspended).await.unwrap();

    assert!(matches!(
        app.core.auth.refresh(RefreshRequest::new(&raw)).await,
        Err(AuthError::AccountNotActive)
    ));
}

#[tokio::test]
async fn test_logout_revokes_token_and_session() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "logout@example.com")
        .await;
    let login = app.login(&principal).await.unwrap();

    app.core
        .auth
        .logout(&login.tokens.refresh_token)
        .await
        .unwrap();

    let session = app.core.sessions.get(login.session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Revoked);
    assert!(matches!(
        app.core
            .auth
            .refresh(RefreshRequest::new(&login.tokens.refresh_token))
            .await,
        Err(AuthError::SessionNotActive)
    ));
}

#[tokio::test]
async fn test_sweep_removes_only_expired_records() {
    let app = TestApp::spawn().await;
    let principal = app
        .create_principal(Uuid::new_v4(), "sweep@example.com")
        .await;
    app.login(&principal).await.unwrap();

    app.clock.advance(Duration::days(6));
    app.login_from(&principal, "Other/1.0", "198.51.100.7")
        .await
        .unwrap();

    app.clock.advance(Duration::days(2));
    let report = app.core.maintenance.run_once().await.unwrap();
    assert_eq!(report.refresh_tokens_deleted, 1);

    let remaining = app
        .core
        .refresh
        .list_for_principal(principal.id)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
}
