//! E2E federation scenarios between two running servers

mod common;

use common::{TestServer, follow_activity};
use quillpost::data::EntityId;
use reqwest::Method;
use serde_json::{Value, json};

fn create_note(sender: &TestServer, sender_name: &str) -> Value {
    let actor = sender.actor_url(sender_name);
    let note_id = format!("{}/posts/{}", actor, EntityId::new().0);
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/activity", note_id),
        "type": "Create",
        "actor": actor,
        "object": {
            "id": note_id,
            "type": "Note",
            "attributedTo": actor,
            "content": "<p>hello</p>"
        }
    })
}

#[tokio::test]
async fn test_follow_then_post_delivers_note() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    let alice = local.create_account("alice").await;
    let bob = remote.create_account("bob").await;

    // alice@local follows bob@remote
    let response = local
        .admin(Method::POST, "/accounts/alice/follows")
        .json(&json!({"address": remote.address("bob")}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    assert!(
        remote
            .state
            .storage
            .followers
            .get_follower(&bob.id, &local.address("alice"))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        local
            .state
            .storage
            .following
            .get_following(&alice.id, &remote.address("bob"))
            .await
            .unwrap()
            .is_some()
    );

    // bob posts; fan-out delivers the Create to alice
    let response = remote
        .admin(Method::POST, "/accounts/bob/posts")
        .json(&json!({"content": "<p>hello followers</p>"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let published: Value = response.json().await.unwrap();
    assert_eq!(published["delivery"]["queued"], 1);
    assert_eq!(published["delivery"]["failed"], 0);

    let mut notes = Vec::new();
    local
        .state
        .storage
        .notes
        .scan_notes(quillpost::data::TimeRange::all(), &mut |note| {
            notes.push(note);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].account_id, alice.id);
    assert_eq!(notes[0].author_address, remote.address("bob"));

    // A second fan-out of the same activity finds the recipient delivered
    let activity = remote
        .state
        .storage
        .activities
        .get_activity_by_activity_pub_id(published["activity_id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    let report = remote
        .state
        .fanout
        .deliver_to_followers(&activity, &[])
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.queued, 0);
}

#[tokio::test]
async fn test_create_without_following_is_rejected() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    let alice = local.create_account("alice").await;
    remote.create_account("bob").await;

    let response = remote
        .send_signed("bob", &local, "alice", &create_note(&remote, "bob"))
        .await;
    assert_eq!(response.status(), 400);

    let mut count = 0;
    local
        .state
        .storage
        .notes
        .scan_notes(quillpost::data::TimeRange::all(), &mut |note| {
            assert_ne!(note.account_id, alice.id);
            count += 1;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_follow_is_accepted_and_duplicate_rejected() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    let alice = local.create_account("alice").await;
    remote.create_account("bob").await;

    let follow = follow_activity(&remote, "bob", &local, "alice");
    let response = remote.send_signed("bob", &local, "alice", &follow).await;
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/activity+json"
    );
    let accept: Value = response.json().await.unwrap();
    assert_eq!(accept["type"], "Accept");
    assert_eq!(accept["object"], follow["id"]);
    assert_eq!(accept["actor"], local.actor_url("alice"));

    let again = follow_activity(&remote, "bob", &local, "alice");
    let response = remote.send_signed("bob", &local, "alice", &again).await;
    assert_eq!(response.status(), 400);

    assert_eq!(
        local
            .state
            .storage
            .followers
            .count_followers(&alice.id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_follow_undo_follow_leaves_one_edge() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    let alice = local.create_account("alice").await;
    remote.create_account("bob").await;

    let follow = follow_activity(&remote, "bob", &local, "alice");
    let response = remote.send_signed("bob", &local, "alice", &follow).await;
    assert_eq!(response.status(), 200);

    let undo = json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/undos/{}", remote.actor_url("bob"), EntityId::new().0),
        "type": "Undo",
        "actor": remote.actor_url("bob"),
        "object": follow
    });
    let response = remote.send_signed("bob", &local, "alice", &undo).await;
    assert_eq!(response.status(), 200);

    let response = remote.send_signed("bob", &local, "alice", &undo).await;
    assert_eq!(response.status(), 400, "undo without follow is a conflict");

    let follow = follow_activity(&remote, "bob", &local, "alice");
    let response = remote.send_signed("bob", &local, "alice", &follow).await;
    assert_eq!(response.status(), 200);

    assert_eq!(
        local
            .state
            .storage
            .followers
            .count_followers(&alice.id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_actor_must_match_signer() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    local.create_account("alice").await;
    remote.create_account("bob").await;
    remote.create_account("carol").await;

    // Signed by bob, claiming to come from carol
    let follow = follow_activity(&remote, "carol", &local, "alice");
    let response = remote.send_signed("bob", &local, "alice", &follow).await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_unfollow_removes_remote_follower() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    local.create_account("alice").await;
    let bob = remote.create_account("bob").await;

    let response = local
        .admin(Method::POST, "/accounts/alice/follows")
        .json(&json!({"address": remote.address("bob")}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = local
        .admin(
            Method::DELETE,
            &format!("/accounts/alice/follows/{}", remote.address("bob")),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    assert_eq!(
        remote
            .state
            .storage
            .followers
            .count_followers(&bob.id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_follow_of_unknown_remote_account_fails() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    local.create_account("alice").await;

    let response = local
        .admin(Method::POST, "/accounts/alice/follows")
        .json(&json!({"address": remote.address("nobody")}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_boost_reaches_followers_and_author() {
    let local = TestServer::new().await;
    let remote = TestServer::new().await;
    local.create_account("alice").await;
    remote.create_account("bob").await;

    // bob follows alice so alice's boost reaches him as a follower too
    let follow = follow_activity(&remote, "bob", &local, "alice");
    assert_eq!(
        remote.send_signed("bob", &local, "alice", &follow).await.status(),
        200
    );

    let response = local
        .admin(Method::POST, "/accounts/alice/boosts")
        .json(&json!({
            "object": format!("{}/posts/1", remote.actor_url("bob")),
            "author": remote.address("bob")
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let boosted: Value = response.json().await.unwrap();

    // Follower and copy recipient are the same address
    assert_eq!(boosted["delivery"]["recipients"].as_array().unwrap().len(), 1);
}
