#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the content coordinator.
//!
//! Every test runs against the in-memory stores wrapped in fault-injecting
//! doubles, so failures can be placed at any step of an operation.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use lectern_kernel::code::CodeRepository;
use lectern_kernel::coordinator::{
    CleanupReason, ContentInput, ContentUpdate, ImageFile, OrphanResource,
};
use lectern_kernel::error::ContentError;
use lectern_kernel::image::ImageRepository;
use lectern_kernel::models::{CodePayload, ContentKind, ContentRef};
use lectern_kernel::notify::EventKind;
use lectern_test_utils::{
    FailingEmitter, Harness, admin, code, gif_file, member, png_file, supervisor,
};
use uuid::Uuid;

async fn image_exists(h: &Harness, public_id: &str) -> bool {
    h.images.exists(public_id).await.unwrap()
}

async fn code_exists(h: &Harness, key: &str) -> bool {
    h.code.get(key).await.unwrap().is_some()
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn created_post_references_resolve_immediately() {
    let h = Harness::new();
    let author = member();

    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("hello")
                .with_code(code("fn main() {}"))
                .with_image(png_file("shot.png")),
        )
        .await
        .unwrap();

    let key = post.post.code_ref.clone().unwrap();
    let image = post.post.image.clone().unwrap();
    assert!(code_exists(&h, &key).await);
    assert!(image_exists(&h, &image.public_id).await);
    assert!(image.public_id.starts_with("lectern-images/posts/"));
    assert_eq!(post.code, Some(code("fn main() {}")));
    assert_eq!(post.post.author_id, author.id);
}

#[tokio::test]
async fn failed_insert_rolls_back_uploads() {
    let h = Harness::new();
    h.store.fail_inserts(true);

    for _ in 0..5 {
        let err = h
            .coordinator
            .create_post(
                &member(),
                Uuid::now_v7(),
                ContentInput::text("doomed")
                    .with_code(code("x"))
                    .with_image(png_file("a.png")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Persistence(_)));
    }

    h.settle().await;
    assert_eq!(h.store.post_count(), 0);
    assert_eq!(h.images.stored(), 0);
    assert!(h.code.is_empty());
    assert!(h.coordinator.cleanup_ledger().is_empty());
}

#[tokio::test]
async fn code_failure_rolls_back_image_and_skips_row() {
    let h = Harness::new();
    h.code.fail_next_puts(3);

    let err = h
        .coordinator
        .create_post(
            &member(),
            Uuid::now_v7(),
            ContentInput::text("hi")
                .with_code(code("x"))
                .with_image(png_file("a.png")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ContentError::Upload { .. }));
    assert_eq!(h.code.puts(), 3);
    assert_eq!(h.store.post_count(), 0);
    h.settle().await;
    assert_eq!(h.images.stored(), 0);
}

#[tokio::test]
async fn code_write_retries_transient_failures() {
    let h = Harness::new();
    h.code.fail_next_puts(2);

    let post = h
        .coordinator
        .create_post(
            &member(),
            Uuid::now_v7(),
            ContentInput::text("").with_code(code("let x = 1;")),
        )
        .await
        .unwrap();

    assert_eq!(h.code.puts(), 3);
    // Every attempt used the same key, so only one snippet exists
    assert_eq!(h.code.len(), 1);
    assert!(code_exists(&h, post.post.code_ref.as_deref().unwrap()).await);
}

#[tokio::test]
async fn image_failure_writes_nothing() {
    let h = Harness::new();
    h.images.fail_uploads(true);

    let err = h
        .coordinator
        .create_post(
            &member(),
            Uuid::now_v7(),
            ContentInput::text("hi")
                .with_code(code("x"))
                .with_image(png_file("a.png")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ContentError::Upload { store: "image", .. }));
    assert_eq!(h.code.puts(), 0);
    assert_eq!(h.store.post_count(), 0);
}

#[tokio::test]
async fn invalid_input_touches_no_store() {
    let h = Harness::new();

    let empty = h
        .coordinator
        .create_post(&member(), Uuid::now_v7(), ContentInput::text("  "))
        .await
        .unwrap_err();
    assert!(matches!(empty, ContentError::Validation(_)));

    let disguised = ImageFile::new(b"#!/bin/sh\nrm -rf /".to_vec(), "image/png", "evil.png");
    let bad_image = h
        .coordinator
        .create_post(
            &member(),
            Uuid::now_v7(),
            ContentInput::text("look").with_image(disguised),
        )
        .await
        .unwrap_err();
    assert!(matches!(bad_image, ContentError::Validation(_)));

    let bad_code = h
        .coordinator
        .create_post(
            &member(),
            Uuid::now_v7(),
            ContentInput::text("x").with_code(CodePayload::new("", "rust")),
        )
        .await
        .unwrap_err();
    assert!(matches!(bad_code, ContentError::Validation(_)));

    assert_eq!(h.images.uploads(), 0);
    assert_eq!(h.code.puts(), 0);
    assert_eq!(h.store.post_count(), 0);
}

#[tokio::test]
async fn comment_on_missing_post_is_not_found() {
    let h = Harness::new();
    let missing = Uuid::now_v7();

    let err = h
        .coordinator
        .create_comment(
            &member(),
            missing,
            ContentInput::text("hi").with_code(code("x")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ContentError::NotFound { kind: ContentKind::Post, id } if id == missing
    ));
    assert_eq!(h.code.puts(), 0);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn comment_notifies_post_author_but_not_self() {
    let h = Harness::new();
    let author = member();
    let other = member();
    let project = Uuid::now_v7();

    let post = h
        .coordinator
        .create_post(&author, project, ContentInput::text("question"))
        .await
        .unwrap();
    let post_id = post.post.id;

    h.coordinator
        .create_comment(&other, post_id, ContentInput::text("answer"))
        .await
        .unwrap();
    h.coordinator
        .create_comment(&author, post_id, ContentInput::text("thanks"))
        .await
        .unwrap();
    h.settle().await;

    let events = h.events.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].kind, EventKind::PostCreated);

    let comments: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::CommentAdded)
        .collect();
    assert_eq!(comments.len(), 2);
    for event in comments {
        assert_eq!(event.post_id, post_id);
        assert_eq!(event.project_id, project);
        if event.actor_id == other.id {
            assert_eq!(event.recipient, Some(author.id));
        } else {
            assert_eq!(event.recipient, None);
        }
    }
}

#[tokio::test]
async fn emitter_failure_does_not_fail_the_operation() {
    let failing = Arc::new(FailingEmitter::default());
    let h = Harness::with_emitter(failing.clone());

    let post = h
        .coordinator
        .create_post(&member(), Uuid::now_v7(), ContentInput::text("hi"))
        .await;
    assert!(post.is_ok());

    h.settle().await;
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn comment_scenario_swaps_code_for_image() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("bug report"))
        .await
        .unwrap();

    let comment = h
        .coordinator
        .create_comment(
            &author,
            post.post.id,
            ContentInput::text("fix bug").with_code(CodePayload::new("x=1", "python")),
        )
        .await
        .unwrap();
    assert_eq!(comment.code, Some(CodePayload::new("x=1", "python")));
    let original_key = comment.comment.code_ref.clone().unwrap();

    let updated = h
        .coordinator
        .update_comment(
            &author,
            comment.comment.id,
            ContentUpdate::default()
                .set_image(png_file("fix.png"))
                .clear_code(),
        )
        .await
        .unwrap();

    assert!(updated.comment.image.is_some());
    assert!(updated.comment.code_ref.is_none());
    assert_eq!(updated.code, None);
    assert_eq!(updated.comment.body, "fix bug");

    h.settle().await;
    assert!(!code_exists(&h, &original_key).await);
}

#[tokio::test]
async fn superseded_image_is_removed_only_after_the_row_moves() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("p"))
        .await
        .unwrap();
    let comment = h
        .coordinator
        .create_comment(
            &author,
            post.post.id,
            ContentInput::text("c").with_image(png_file("a.png")),
        )
        .await
        .unwrap();
    let image_a = comment.comment.image.clone().unwrap();

    let updated = h
        .coordinator
        .update_comment(
            &author,
            comment.comment.id,
            ContentUpdate::default().set_image(gif_file("b.gif")),
        )
        .await
        .unwrap();
    let image_b = updated.comment.image.clone().unwrap();
    assert_ne!(image_a.public_id, image_b.public_id);

    // The row already points at B, and B resolves
    let row = h
        .aggregator
        .list_comments(&[post.post.id])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(row.comment.image.as_ref(), Some(&image_b));
    assert!(image_exists(&h, &image_b.public_id).await);

    h.settle().await;
    assert!(!image_exists(&h, &image_a.public_id).await);
    assert!(image_exists(&h, &image_b.public_id).await);
}

#[tokio::test]
async fn replacement_code_gets_a_fresh_key() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("p").with_code(code("v1")),
        )
        .await
        .unwrap();
    let old_key = post.post.code_ref.clone().unwrap();

    let updated = h
        .coordinator
        .update_post(&author, post.post.id, ContentUpdate::default().set_code(code("v2")))
        .await
        .unwrap();
    let new_key = updated.post.code_ref.clone().unwrap();

    assert_ne!(old_key, new_key);
    assert_eq!(updated.code, Some(code("v2")));
    // Old content is untouched until cleanup runs
    assert_eq!(h.code.get(&old_key).await.unwrap().unwrap().content, "v1");

    h.settle().await;
    assert!(!code_exists(&h, &old_key).await);
    assert!(code_exists(&h, &new_key).await);
}

#[tokio::test]
async fn body_only_update_keeps_attachments() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("draft")
                .with_code(code("x"))
                .with_image(png_file("a.png")),
        )
        .await
        .unwrap();

    let updated = h
        .coordinator
        .update_post(&author, post.post.id, ContentUpdate::default().body("final"))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(updated.post.body, "final");
    assert_eq!(updated.post.code_ref, post.post.code_ref);
    assert_eq!(updated.post.image, post.post.image);
    assert_eq!(updated.code, Some(code("x")));
    assert!(code_exists(&h, post.post.code_ref.as_deref().unwrap()).await);
    assert_eq!(h.images.stored(), 1);
}

#[tokio::test]
async fn update_that_empties_content_is_rejected() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("").with_code(code("x")),
        )
        .await
        .unwrap();

    let err = h
        .coordinator
        .update_post(&author, post.post.id, ContentUpdate::default().clear_code())
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Validation(_)));
}

#[tokio::test]
async fn failed_row_update_discards_new_uploads() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("p").with_code(code("v1")),
        )
        .await
        .unwrap();
    let old_key = post.post.code_ref.clone().unwrap();

    h.store.fail_updates(true);
    let err = h
        .coordinator
        .update_post(
            &author,
            post.post.id,
            ContentUpdate::default()
                .set_code(code("v2"))
                .set_image(png_file("new.png")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Persistence(_)));

    h.settle().await;
    // Only the original snippet survives; the row still points at it
    assert_eq!(h.code.len(), 1);
    assert!(code_exists(&h, &old_key).await);
    assert_eq!(h.images.stored(), 0);
}

#[tokio::test]
async fn update_code_failure_rolls_back_new_image_and_keeps_row() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("p"))
        .await
        .unwrap();
    let comment = h
        .coordinator
        .create_comment(
            &author,
            post.post.id,
            ContentInput::text("c")
                .with_code(code("v1"))
                .with_image(png_file("old.png")),
        )
        .await
        .unwrap();
    let old_key = comment.comment.code_ref.clone().unwrap();
    let old_image = comment.comment.image.clone().unwrap();
    assert!(old_image.public_id.starts_with("lectern-images/comments/"));
    let puts_before = h.code.puts();

    h.code.fail_next_puts(3);
    let err = h
        .coordinator
        .update_comment(
            &author,
            comment.comment.id,
            ContentUpdate::default()
                .set_image(gif_file("new.gif"))
                .set_code(code("v2")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Upload { .. }));
    assert_eq!(h.code.puts() - puts_before, 3);
    // The replacement image landed before the code write gave up
    assert_eq!(h.images.uploads(), 2);

    h.settle().await;
    assert_eq!(h.images.stored(), 1);
    assert!(image_exists(&h, &old_image.public_id).await);
    assert!(code_exists(&h, &old_key).await);
    assert_eq!(h.code.len(), 1);
    assert!(h.coordinator.cleanup_ledger().is_empty());

    let row = h
        .aggregator
        .list_comments(&[post.post.id])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(row.comment, comment.comment);
    assert_eq!(row.code, Some(code("v1")));
}

#[tokio::test]
async fn update_racing_a_delete_is_not_found() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("p"))
        .await
        .unwrap();

    h.store.vanish_before_update(true);
    let err = h
        .coordinator
        .update_post(
            &author,
            post.post.id,
            ContentUpdate::default().set_code(code("late")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::NotFound { kind: ContentKind::Post, .. }));

    h.settle().await;
    assert!(h.code.is_empty());
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn cascade_delete_removes_everything_despite_a_failed_blob_delete() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("p")
                .with_code(code("post code"))
                .with_image(png_file("p.png")),
        )
        .await
        .unwrap();
    let post_id = post.post.id;

    let mut comments = Vec::new();
    for i in 0..3 {
        let comment = h
            .coordinator
            .create_comment(
                &member(),
                post_id,
                ContentInput::text(format!("comment {i}"))
                    .with_code(code(&format!("c{i}")))
                    .with_image(png_file("c.png")),
            )
            .await
            .unwrap();
        comments.push(comment);
    }

    let stuck_key = comments[1].comment.code_ref.clone().unwrap();
    h.code.fail_delete_of(&stuck_key);

    let outcome = h
        .coordinator
        .delete(&author, ContentRef::post(post_id))
        .await
        .unwrap();
    assert_eq!(outcome.rows_deleted, 4);
    assert_eq!(outcome.cleanup_scheduled, 8);

    h.settle().await;
    assert_eq!(h.store.post_count(), 0);
    assert_eq!(h.store.comment_count(), 0);
    assert_eq!(h.images.stored(), 0);
    assert_eq!(h.code.len(), 1);
    assert!(code_exists(&h, &stuck_key).await);

    let failures = h.coordinator.cleanup_ledger().snapshot();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].resource, OrphanResource::Code(stuck_key));
    assert_eq!(failures[0].reason, CleanupReason::Deleted);
    assert_eq!(failures[0].owner, comments[1].comment.content_ref());
    assert!(h.metrics.encode().contains("orphan_cleanup_failures_total"));
}

#[tokio::test]
async fn deleting_twice_is_not_found_without_side_effects() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("p").with_code(code("x")),
        )
        .await
        .unwrap();
    let target = ContentRef::post(post.post.id);

    h.coordinator.delete(&author, target).await.unwrap();
    h.settle().await;
    let deletes = h.code.delete_calls.load(Ordering::SeqCst);
    let events = h.events.events().len();

    let err = h.coordinator.delete(&author, target).await.unwrap_err();
    assert!(matches!(err, ContentError::NotFound { .. }));

    h.settle().await;
    assert_eq!(h.code.delete_calls.load(Ordering::SeqCst), deletes);
    assert_eq!(h.events.events().len(), events);
}

#[tokio::test]
async fn failed_comment_delete_stops_the_cascade() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("p"))
        .await
        .unwrap();
    h.coordinator
        .create_comment(&author, post.post.id, ContentInput::text("c"))
        .await
        .unwrap();

    h.store.fail_comment_deletes(true);
    let err = h
        .coordinator
        .delete(&author, ContentRef::post(post.post.id))
        .await
        .unwrap_err();

    assert!(matches!(err, ContentError::Persistence(_)));
    assert_eq!(h.store.post_count(), 1);
    assert_eq!(h.store.comment_count(), 1);
}

#[tokio::test]
async fn failed_row_delete_keeps_attachments() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(
            &author,
            Uuid::now_v7(),
            ContentInput::text("p").with_image(png_file("keep.png")),
        )
        .await
        .unwrap();

    h.store.fail_post_deletes(true);
    let err = h
        .coordinator
        .delete(&author, ContentRef::post(post.post.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::Persistence(_)));

    h.settle().await;
    assert_eq!(h.images.stored(), 1);
    assert!(h.events.events().iter().all(|e| e.kind != EventKind::PostDeleted));
}

#[tokio::test]
async fn failed_image_cleanup_is_recorded_not_raised() {
    let h = Harness::new();
    let author = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("p"))
        .await
        .unwrap();
    let comment = h
        .coordinator
        .create_comment(
            &author,
            post.post.id,
            ContentInput::text("c").with_image(png_file("c.png")),
        )
        .await
        .unwrap();

    h.images.fail_deletes(true);
    let outcome = h
        .coordinator
        .delete(&author, comment.comment.content_ref())
        .await
        .unwrap();
    assert_eq!(outcome.rows_deleted, 1);
    assert_eq!(outcome.cleanup_scheduled, 1);

    h.settle().await;
    let failures = h.coordinator.cleanup_ledger().drain();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].resource, OrphanResource::Image(_)));
    assert!(h.coordinator.cleanup_ledger().is_empty());
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn only_author_or_privileged_may_modify() {
    let h = Harness::new();
    let author = member();
    let stranger = member();
    let post = h
        .coordinator
        .create_post(&author, Uuid::now_v7(), ContentInput::text("mine"))
        .await
        .unwrap();
    let post_id = post.post.id;

    let err = h
        .coordinator
        .update_post(&stranger, post_id, ContentUpdate::default().body("yours"))
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::PermissionDenied { actor, .. } if actor == stranger.id));

    let err = h
        .coordinator
        .delete(&stranger, ContentRef::post(post_id))
        .await
        .unwrap_err();
    assert!(matches!(err, ContentError::PermissionDenied { .. }));
    assert_eq!(h.store.post_count(), 1);

    let edited = h
        .coordinator
        .update_post(&supervisor(), post_id, ContentUpdate::default().body("moderated"))
        .await
        .unwrap();
    assert_eq!(edited.post.body, "moderated");

    h.coordinator
        .delete(&admin(), ContentRef::post(post_id))
        .await
        .unwrap();
    assert_eq!(h.store.post_count(), 0);
}

#[tokio::test]
async fn operations_are_counted_by_outcome() {
    let h = Harness::new();
    h.coordinator
        .create_post(&member(), Uuid::now_v7(), ContentInput::text("ok"))
        .await
        .unwrap();
    let _ = h
        .coordinator
        .delete(&member(), ContentRef::comment(Uuid::now_v7()))
        .await;

    let output = h.metrics.encode();
    assert!(output.contains("outcome=\"ok\""));
    assert!(output.contains("outcome=\"not_found\""));
}
