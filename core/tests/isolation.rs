#![allow(clippy::unwrap_used)]

//! Tenant isolation and role gating across the chat entry.

use aidesk_core::CoreErr;
use aidesk_core::provider::ProviderClient;
use aidesk_protocol::ChatRequest;
use aidesk_protocol::SecurityPreset;
use aidesk_protocol::TurnEvent;
use core_test_support::chat_fixture;

fn request(message: &str, preset: SecurityPreset) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        security_preset: preset,
        ..Default::default()
    }
}

#[tokio::test]
async fn a_session_created_by_one_team_is_not_found_for_another() {
    let mut fixture = chat_fixture().await;
    fixture
        .service
        .set_provider(ProviderClient::mock_scripted(Vec::new()));

    let mut req = request("hello from team one", SecurityPreset::Safe);
    req.session_id = Some("team-one-session".to_string());
    fixture.service.chat(&fixture.owner, req.clone()).await.unwrap();

    let err = fixture
        .service
        .chat(&fixture.sibling, req)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreErr::NotFound(_)));
}

#[tokio::test]
async fn members_get_dangerous_bits_silently_cleared() {
    let mut fixture = chat_fixture().await;
    fixture
        .service
        .set_provider(ProviderClient::mock_scripted(Vec::new()));

    let response = fixture
        .service
        .chat(&fixture.member, request("hello", SecurityPreset::Power))
        .await
        .unwrap();

    let TurnEvent::SecurityProfile(profile) = &response.events[0] else {
        panic!("first event must be security_profile");
    };
    assert!(profile.requested.shell);
    assert!(profile.effective.is_empty());

    let cleared: Vec<String> = response
        .events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Permission(ev) => Some(ev.capability.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(cleared, vec!["shell", "write", "browser"]);
}

#[tokio::test]
async fn explicit_dangerous_request_is_a_hard_denial() {
    let mut fixture = chat_fixture().await;
    fixture
        .service
        .set_provider(ProviderClient::mock_scripted(Vec::new()));

    let mut req = request("hello", SecurityPreset::Custom);
    req.enable_dangerous = Some(true);
    req.provider = Some("codex".to_string());
    let err = fixture.service.chat(&fixture.owner, req).await.unwrap_err();
    assert!(matches!(err, CoreErr::PermissionDenied(_)));
}

#[tokio::test]
async fn sibling_teams_never_see_each_others_files_or_sessions() {
    let mut fixture = chat_fixture().await;
    fixture
        .service
        .set_provider(ProviderClient::mock_scripted(Vec::new()));

    let mut req = request("note something private", SecurityPreset::Safe);
    req.session_id = Some("private".to_string());
    fixture.service.chat(&fixture.owner, req).await.unwrap();

    let sibling_sessions = fixture
        .service
        .store
        .list_sessions(fixture.sibling.team_id)
        .await
        .unwrap();
    assert!(sibling_sessions.is_empty());

    let sibling_hits = fixture
        .service
        .store
        .search_messages(fixture.sibling.team_id, "private", 10)
        .await
        .unwrap();
    assert!(sibling_hits.is_empty());

    let own_hits = fixture
        .service
        .store
        .search_messages(fixture.owner.team_id, "private", 10)
        .await
        .unwrap();
    assert_eq!(own_hits.len(), 1);
}

#[tokio::test]
async fn deleting_a_session_requires_ownership() {
    let mut fixture = chat_fixture().await;
    fixture
        .service
        .set_provider(ProviderClient::mock_scripted(Vec::new()));

    let mut req = request("to be deleted", SecurityPreset::Safe);
    req.session_id = Some("doomed".to_string());
    fixture.service.chat(&fixture.owner, req).await.unwrap();

    // The sibling cannot delete it, the owner can.
    assert!(!fixture
        .service
        .delete_session(&fixture.sibling, "doomed")
        .await
        .unwrap());
    assert!(fixture
        .service
        .delete_session(&fixture.owner, "doomed")
        .await
        .unwrap());
    assert!(fixture
        .service
        .store
        .get_session(fixture.owner.team_id, "doomed")
        .await
        .unwrap()
        .is_none());
}
