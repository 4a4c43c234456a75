//! Tests for `src/authz/` — the default authorization oracle.

use mentorhub::authz::{perm, AuthzOracle, SqliteAuthz};
use mentorhub::messaging::recipient::RecipientDescriptor;
use mentorhub::messaging::ReplyMode;

use crate::fixtures;

#[tokio::test]
async fn staff_and_mentors_may_message_anyone() {
    let pool = fixtures::setup_pool().await;
    let staff = fixtures::user(&pool, "Dana").await;
    fixtures::role(&pool, staff, "staff").await;
    let mentor = fixtures::user(&pool, "Morgan").await;
    fixtures::role(&pool, mentor, "mentor").await;
    let plain = fixtures::user(&pool, "Pat").await;
    let authz = SqliteAuthz::new(pool.clone());

    assert!(authz.can_message(staff, plain, None).await.expect("check should succeed"));
    assert!(authz.can_message(mentor, plain, None).await.expect("check should succeed"));
    // And everyone may reach staff and mentors.
    assert!(authz.can_message(plain, staff, None).await.expect("check should succeed"));
    assert!(authz.can_message(plain, mentor, None).await.expect("check should succeed"));
}

#[tokio::test]
async fn plain_users_may_reach_program_adults_but_not_each_other() {
    let pool = fixtures::setup_pool().await;
    let mentor = fixtures::user(&pool, "Morgan").await;
    fixtures::role(&pool, mentor, "mentor").await;
    let kid = fixtures::user(&pool, "Kid").await;
    fixtures::mentee(&pool, kid, None).await;
    let other_kid = fixtures::user(&pool, "Other Kid").await;
    fixtures::mentee(&pool, other_kid, None).await;
    let authz = SqliteAuthz::new(pool.clone());

    assert!(authz.can_message(kid, mentor, None).await.expect("check should succeed"));
    assert!(!authz
        .can_message(kid, other_kid, None)
        .await
        .expect("check should succeed"));
    // Self-messaging is always allowed.
    assert!(authz.can_message(kid, kid, None).await.expect("check should succeed"));
}

#[tokio::test]
async fn guardian_links_authorize_both_directions() {
    let pool = fixtures::setup_pool().await;
    let kid = fixtures::user(&pool, "Kid").await;
    fixtures::mentee(&pool, kid, None).await;
    let guardian = fixtures::user(&pool, "Parent").await;
    fixtures::guardian_link(&pool, kid, guardian).await;
    let authz = SqliteAuthz::new(pool.clone());

    assert!(authz.can_message(kid, guardian, None).await.expect("check should succeed"));
    assert!(authz.can_message(guardian, kid, None).await.expect("check should succeed"));
}

#[tokio::test]
async fn a_shared_thread_authorizes_otherwise_unreachable_users() {
    let pool = fixtures::setup_pool().await;
    let staff = fixtures::user(&pool, "Dana").await;
    fixtures::role(&pool, staff, "staff").await;
    let kid = fixtures::user(&pool, "Kid").await;
    fixtures::mentee(&pool, kid, None).await;
    let other_kid = fixtures::user(&pool, "Other Kid").await;
    fixtures::mentee(&pool, other_kid, None).await;
    let authz = SqliteAuthz::new(pool.clone());
    let engine = fixtures::engine(&pool);

    assert!(!authz
        .can_message(kid, other_kid, None)
        .await
        .expect("check should succeed"));

    // Staff put both kids in one thread; as co-recipients they may now
    // message each other, in both directions, even though neither
    // authored a message the other received.
    engine
        .compose(
            staff,
            "Team intro",
            "say hi",
            &[
                RecipientDescriptor::User(kid),
                RecipientDescriptor::User(other_kid),
            ],
            ReplyMode::ReplyToAll,
            false,
        )
        .await
        .expect("compose should succeed");
    assert!(authz
        .can_message(kid, other_kid, None)
        .await
        .expect("check should succeed"));
    assert!(authz
        .can_message(other_kid, kid, None)
        .await
        .expect("check should succeed"));
    // And the connection reaches back to the thread author too.
    assert!(authz
        .can_message(kid, staff, None)
        .await
        .expect("check should succeed"));
}

#[tokio::test]
async fn staff_implicitly_hold_the_messaging_permissions() {
    let pool = fixtures::setup_pool().await;
    let staff = fixtures::user(&pool, "Dana").await;
    fixtures::role(&pool, staff, "staff").await;
    let plain = fixtures::user(&pool, "Pat").await;
    let authz = SqliteAuthz::new(pool.clone());

    let (action, resource) = perm::SEND_GROUP_MESSAGE;
    assert!(authz
        .has_permission(staff, action, resource)
        .await
        .expect("check should succeed"));
    assert!(!authz
        .has_permission(plain, action, resource)
        .await
        .expect("check should succeed"));

    // Support inbox membership stays grant-only, even for staff.
    let (action, resource) = perm::READ_SUPPORT_INBOX;
    assert!(!authz
        .has_permission(staff, action, resource)
        .await
        .expect("check should succeed"));
    fixtures::grant(&pool, staff, action, resource).await;
    assert!(authz
        .has_permission(staff, action, resource)
        .await
        .expect("check should succeed"));
}

#[tokio::test]
async fn users_with_permission_lists_explicit_grants() {
    let pool = fixtures::setup_pool().await;
    let s1 = fixtures::user(&pool, "Sasha").await;
    let s2 = fixtures::user(&pool, "Toni").await;
    let (action, resource) = perm::READ_SUPPORT_INBOX;
    fixtures::grant(&pool, s2, action, resource).await;
    fixtures::grant(&pool, s1, action, resource).await;
    let authz = SqliteAuthz::new(pool.clone());

    assert_eq!(
        authz
            .users_with_permission(action, resource)
            .await
            .expect("query should succeed"),
        vec![s1, s2]
    );
}

#[tokio::test]
async fn messageable_users_scope_follows_privilege() {
    let pool = fixtures::setup_pool().await;
    let staff = fixtures::user(&pool, "Dana").await;
    fixtures::role(&pool, staff, "staff").await;
    let kid = fixtures::user(&pool, "Kid").await;
    fixtures::mentee(&pool, kid, None).await;
    let other_kid = fixtures::user(&pool, "Other Kid").await;
    fixtures::mentee(&pool, other_kid, None).await;
    let guardian = fixtures::user(&pool, "Parent").await;
    fixtures::guardian_link(&pool, kid, guardian).await;
    let authz = SqliteAuthz::new(pool.clone());

    // Staff see everyone but themselves.
    assert_eq!(
        authz.messageable_users(staff).await.expect("query should succeed"),
        vec![kid, other_kid, guardian]
    );
    // A mentee sees program adults and their linked guardians, not peers.
    assert_eq!(
        authz.messageable_users(kid).await.expect("query should succeed"),
        vec![staff, guardian]
    );
}
