//! Comments on posts and the comment like toggle.
//!
//! Comment likes toggle on a single endpoint while post likes use separate
//! like/dislike endpoints. Clients depend on both behaviours, so they stay
//! different.

use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::{error, info};

use crate::auth::require_session;
use crate::config::*;
use crate::context::AppContext;
use crate::core::db::DocumentStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, new_id, now_iso, parse_json_body, require_id, sanitize_text};
use crate::media::MediaHost;
use crate::models::models::{Comment, CommentView};
use crate::posts::load_post;
use crate::users::author_summary;

pub fn load_comment<S: DocumentStore>(store: &S, comment_id: &str) -> Result<Comment, ApiError> {
    store
        .get_json::<Comment>(&comment_key(comment_id))?
        .ok_or_else(|| ApiError::not_found("Comment not found"))
}

pub fn load_comment_view<S: DocumentStore>(store: &S, comment: Comment) -> anyhow::Result<CommentView> {
    let likes = store.members(&comment_likes_key(&comment.id))?;
    Ok(CommentView {
        author: author_summary(store, &comment.user_id)?,
        number_of_likes: likes.len(),
        likes,
        comment,
    })
}

// === Operations ===

/// Two steps: write the comment, then append it to the post's list. If the
/// append fails the comment is deleted again so no unreachable record is left.
pub fn create_comment<S: DocumentStore>(
    store: &S,
    account_id: &str,
    post_id: &str,
    content: &str,
) -> Result<Comment, ApiError> {
    let content = sanitize_text(content.trim());
    if content.is_empty() {
        return Err(ApiError::validation("Text is required"));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ApiError::validation(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_LENGTH
        )));
    }
    load_post(store, post_id)?;

    let comment = Comment {
        id: new_id(),
        user_id: account_id.to_string(),
        post_id: post_id.to_string(),
        content,
        created_at: now_iso(),
    };
    let key = comment_key(&comment.id);
    store.set_json(&key, &comment)?;

    if let Err(e) = store.add_member(&post_comments_key(post_id), &comment.id) {
        error!(comment = %comment.id, post = %post_id, error = ?e, "appending comment to post failed, rolling back");
        let _ = store.delete(&key);
        return Err(e.into());
    }

    info!(comment = %comment.id, post = %post_id, "comment created");
    Ok(comment)
}

/// Existence, then ownership. The post's reference goes first so a failure
/// half way never leaves the post pointing at a deleted comment.
pub fn delete_comment<S: DocumentStore>(
    store: &S,
    account_id: &str,
    comment_id: &str,
) -> Result<Comment, ApiError> {
    let comment = load_comment(store, comment_id)?;
    if comment.user_id != account_id {
        return Err(ApiError::forbidden("Unauthorized to delete this comment"));
    }

    store.remove_member(&post_comments_key(&comment.post_id), comment_id)?;
    let removed = store
        .delete(&comment_key(comment_id))
        .and_then(|_| store.clear_set(&comment_likes_key(comment_id)));
    if let Err(e) = removed {
        error!(comment = %comment_id, error = ?e, "comment unlinked from post but not deleted");
        return Err(e.into());
    }

    info!(comment = %comment_id, post = %comment.post_id, "comment deleted");
    Ok(comment)
}

/// Likes the comment, or unlikes it if this account already did.
/// Returns the updated comment and whether it is now liked.
pub fn toggle_comment_like<S: DocumentStore>(
    store: &S,
    account_id: &str,
    comment_id: &str,
) -> Result<(CommentView, bool), ApiError> {
    let comment = load_comment(store, comment_id)?;
    let liked = store.toggle_member(&comment_likes_key(comment_id), account_id)?;
    Ok((load_comment_view(store, comment)?, liked))
}

// === HTTP Handlers ===

#[derive(Deserialize, Default)]
struct CommentBody {
    #[serde(default)]
    content: String,
}

pub fn handle_create_comment<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    post_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let post_id = require_id(post_id, "post")?;
    let body: CommentBody = parse_json_body(req)?;

    let comment = create_comment(&ctx.store, &account_id, post_id, &body.content)?;

    json_response(
        201,
        &serde_json::json!({
            "success": true,
            "message": "Comment Added",
            "comment": load_comment_view(&ctx.store, comment)?,
        }),
    )
}

pub fn handle_delete_comment<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    comment_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let comment_id = require_id(comment_id, "comment")?;
    delete_comment(&ctx.store, &account_id, comment_id)?;

    json_response(
        200,
        &serde_json::json!({ "success": true, "message": "Comment deleted successfully" }),
    )
}

pub fn handle_like_comment<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    comment_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let comment_id = require_id(comment_id, "comment")?;
    let (comment, liked) = toggle_comment_like(&ctx.store, &account_id, comment_id)?;

    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "message": if liked { "Comment liked" } else { "Comment unliked" },
            "updatedComment": comment,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::{FailingStore, MemoryStore};
    use crate::media::{parse_data_uri, StoreMediaHost};
    use crate::posts::create_post;
    use crate::users::{register, Registration};

    fn account(store: &MemoryStore, email: &str) -> String {
        register(
            store,
            Registration {
                firstname: "Test".into(),
                lastname: "User".into(),
                email: email.into(),
                password: "password123".into(),
                ..Registration::default()
            },
        )
        .unwrap()
        .id
    }

    /// Store with alice, bob and one post by alice.
    fn setup() -> (MemoryStore, String, String, String) {
        let store = MemoryStore::new();
        let media = StoreMediaHost::new(store.clone(), "");
        let alice = account(&store, "alice@example.com");
        let bob = account(&store, "bob@example.com");
        let image = parse_data_uri("data:image/png;base64,iVBORw0KGgo=").unwrap();
        let post = create_post(&store, &media, &alice, "hello", Some(image)).unwrap();
        (store, alice, bob, post.id)
    }

    fn comment_docs(store: &MemoryStore) -> usize {
        store.keys_with_prefix("comment:").unwrap().len()
    }

    #[test]
    fn empty_comment_is_rejected_without_writing() {
        let (store, _, bob, post) = setup();
        for content in ["", "   ", "<b></b>"] {
            let err = create_comment(&store, &bob, &post, content).err().unwrap();
            assert!(matches!(err, ApiError::Validation(_)));
        }
        assert_eq!(comment_docs(&store), 0);
        assert!(store.members(&post_comments_key(&post)).unwrap().is_empty());
    }

    #[test]
    fn comment_on_missing_post_is_not_found() {
        let (store, _, bob, _) = setup();
        let err = create_comment(&store, &bob, &new_id(), "hi").err().unwrap();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(comment_docs(&store), 0);
    }

    #[test]
    fn created_comment_is_appended_to_post() {
        let (store, _, bob, post) = setup();
        let first = create_comment(&store, &bob, &post, "first!").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = create_comment(&store, &bob, &post, "second").unwrap();

        assert_eq!(first.post_id, post);
        assert_eq!(
            store.members(&post_comments_key(&post)).unwrap(),
            vec![first.id, second.id]
        );
    }

    #[test]
    fn deleting_removes_id_from_parent_post() {
        let (store, _, bob, post) = setup();
        let keep = create_comment(&store, &bob, &post, "keep").unwrap();
        let gone = create_comment(&store, &bob, &post, "gone").unwrap();
        toggle_comment_like(&store, &bob, &gone.id).unwrap();

        delete_comment(&store, &bob, &gone.id).unwrap();

        let remaining = store.members(&post_comments_key(&post)).unwrap();
        assert!(!remaining.contains(&gone.id));
        assert!(remaining.contains(&keep.id));
        assert!(matches!(load_comment(&store, &gone.id), Err(ApiError::NotFound(_))));
        assert!(store.members(&comment_likes_key(&gone.id)).unwrap().is_empty());
    }

    #[test]
    fn non_owner_cannot_delete_and_nothing_changes() {
        let (store, alice, bob, post) = setup();
        let comment = create_comment(&store, &bob, &post, "mine").unwrap();

        // Even the post owner cannot delete someone else's comment.
        let err = delete_comment(&store, &alice, &comment.id).err().unwrap();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(load_comment(&store, &comment.id).unwrap().content, "mine");
        assert_eq!(store.members(&post_comments_key(&post)).unwrap(), vec![comment.id]);
    }

    #[test]
    fn missing_comment_is_not_found_before_ownership() {
        let (store, alice, _, _) = setup();
        assert!(matches!(delete_comment(&store, &alice, &new_id()), Err(ApiError::NotFound(_))));
        assert!(matches!(toggle_comment_like(&store, &alice, &new_id()), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn failed_append_deletes_the_new_comment() {
        let (store, _, bob, post) = setup();
        let failing = FailingStore::new(store.clone(), &post_comments_key(&post));

        let err = create_comment(&failing, &bob, &post, "lost").err().unwrap();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(comment_docs(&store), 0);
        assert!(store.members(&post_comments_key(&post)).unwrap().is_empty());
    }

    #[test]
    fn failed_delete_never_leaves_a_dangling_reference() {
        let (store, _, bob, post) = setup();
        let comment = create_comment(&store, &bob, &post, "sticky").unwrap();
        let failing = FailingStore::new(store.clone(), &comment_key(&comment.id));

        let err = delete_comment(&failing, &bob, &comment.id).err().unwrap();
        assert!(matches!(err, ApiError::Internal(_)));

        // The document survives but the post no longer points at it.
        assert!(store.members(&post_comments_key(&post)).unwrap().is_empty());
        assert!(load_comment(&store, &comment.id).is_ok());
    }

    #[test]
    fn like_toggle_alternates_and_count_matches() {
        let (store, alice, bob, post) = setup();
        let comment = create_comment(&store, &bob, &post, "like me").unwrap();

        let (view, liked) = toggle_comment_like(&store, &alice, &comment.id).unwrap();
        assert!(liked);
        assert_eq!(view.likes, vec![alice.clone()]);
        assert_eq!(view.number_of_likes, 1);

        let (view, _) = toggle_comment_like(&store, &bob, &comment.id).unwrap();
        assert_eq!(view.number_of_likes, 2);

        let (view, liked) = toggle_comment_like(&store, &alice, &comment.id).unwrap();
        assert!(!liked);
        assert_eq!(view.likes, vec![bob.clone()]);
        assert_eq!(view.number_of_likes, view.likes.len());

        let (view, liked) = toggle_comment_like(&store, &alice, &comment.id).unwrap();
        assert!(liked);
        assert_eq!(view.number_of_likes, 2);
    }
}
