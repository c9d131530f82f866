use spin_sdk::http::{Request, Response};
use tracing::{error, info};

use crate::auth::require_session;
use crate::comments::load_comment_view;
use crate::config::*;
use crate::context::AppContext;
use crate::core::db::DocumentStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, new_id, now_iso, require_id, sanitize_text};
use crate::core::query_params::{parse_query_params, Page};
use crate::media::{read_upload_form, upload_optional, ImageUpload, MediaHost};
use crate::models::models::{Comment, Post, PostView};
use crate::users::{author_summary, load_account};

fn validate_content(content: &str) -> Result<(), ApiError> {
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::validation(format!(
            "Post content must be at most {} characters",
            MAX_POST_LENGTH
        )));
    }
    Ok(())
}

pub fn load_post<S: DocumentStore>(store: &S, post_id: &str) -> Result<Post, ApiError> {
    store
        .get_json::<Post>(&post_key(post_id))?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

/// Post with its author, comments and likes. `None` if the post is gone.
pub fn load_post_view<S: DocumentStore>(store: &S, post_id: &str) -> anyhow::Result<Option<PostView>> {
    let Some(post) = store.get_json::<Post>(&post_key(post_id))? else {
        return Ok(None);
    };

    let mut comments = Vec::new();
    for comment_id in store.members(&post_comments_key(post_id))? {
        if let Some(comment) = store.get_json::<Comment>(&comment_key(&comment_id))? {
            comments.push(load_comment_view(store, comment)?);
        }
    }
    let likes = store.members(&post_likes_key(post_id))?;

    Ok(Some(PostView {
        author: author_summary(store, &post.user_id)?,
        number_of_likes: likes.len(),
        likes,
        comments,
        post,
    }))
}

fn newest_first<S: DocumentStore>(store: &S, ids: &[String]) -> anyhow::Result<Vec<PostView>> {
    let mut views = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(view) = load_post_view(store, id)? {
            views.push(view);
        }
    }
    views.sort_by(|a, b| b.post.created_at.cmp(&a.post.created_at));
    Ok(views)
}

// === Operations ===

/// Writes the post, then links it into the feed and the owner's post list.
/// Not transactional: if linking fails the post and any link already made
/// are removed again before the error is returned.
pub fn create_post<S: DocumentStore, M: MediaHost>(
    store: &S,
    media: &M,
    account_id: &str,
    content: &str,
    image: Option<ImageUpload>,
) -> Result<Post, ApiError> {
    validate_content(content)?;
    let image = image.ok_or_else(|| ApiError::validation("Image is required"))?;
    load_account(store, account_id)?;

    let image = media.upload(&image.bytes, &image.content_type)?;

    let post = Post {
        id: new_id(),
        user_id: account_id.to_string(),
        content: sanitize_text(content),
        image,
        created_at: now_iso(),
        updated_at: None,
    };
    let key = post_key(&post.id);
    store.set_json(&key, &post)?;

    let linked = store
        .add_member(FEED_KEY, &post.id)
        .and_then(|_| store.add_member(&account_posts_key(account_id), &post.id));
    if let Err(e) = linked {
        error!(post = %post.id, error = ?e, "linking new post failed, rolling back");
        let _ = store.remove_member(FEED_KEY, &post.id);
        let _ = store.delete(&key);
        return Err(e.into());
    }

    info!(post = %post.id, account = %account_id, "post created");
    Ok(post)
}

pub fn list_all_posts<S: DocumentStore>(store: &S, page: Option<Page>) -> anyhow::Result<Vec<PostView>> {
    let ids = store.members(FEED_KEY)?;
    Ok(Page::apply(page, newest_first(store, &ids)?))
}

pub fn list_account_posts<S: DocumentStore>(store: &S, account_id: &str) -> anyhow::Result<Vec<PostView>> {
    let ids = store.members(&account_posts_key(account_id))?;
    newest_first(store, &ids)
}

/// Existence is checked before ownership.
fn owned_post<S: DocumentStore>(store: &S, account_id: &str, post_id: &str) -> Result<Post, ApiError> {
    let post = load_post(store, post_id)?;
    if post.user_id != account_id {
        return Err(ApiError::forbidden("Unauthorized to modify this post"));
    }
    Ok(post)
}

/// Removes the post and every reference to it. Comment documents stay.
pub fn delete_post<S: DocumentStore>(store: &S, account_id: &str, post_id: &str) -> Result<(), ApiError> {
    let post = owned_post(store, account_id, post_id)?;

    store.remove_member(FEED_KEY, post_id)?;
    store.remove_member(&account_posts_key(&post.user_id), post_id)?;
    store.delete(&post_key(post_id))?;
    store.clear_set(&post_likes_key(post_id))?;
    store.clear_set(&post_comments_key(post_id))?;

    info!(post = %post_id, account = %account_id, "post deleted");
    Ok(())
}

#[derive(Default, Debug, Clone)]
pub struct PostUpdate {
    pub content: Option<String>,
    pub image: Option<ImageUpload>,
}

/// The image is only replaced when a new one is supplied and its upload succeeds.
pub fn update_post<S: DocumentStore, M: MediaHost>(
    store: &S,
    media: &M,
    account_id: &str,
    post_id: &str,
    update: PostUpdate,
) -> Result<Post, ApiError> {
    let mut post = owned_post(store, account_id, post_id)?;

    if let Some(content) = &update.content {
        validate_content(content)?;
    }
    let new_image = upload_optional(media, update.image.as_ref())?;

    if let Some(content) = update.content {
        post.content = sanitize_text(&content);
    }
    if let Some(image) = new_image {
        post.image = image;
    }
    post.updated_at = Some(now_iso());
    store.set_json(&post_key(post_id), &post)?;

    info!(post = %post_id, "post updated");
    Ok(post)
}

/// Set-union: liking twice leaves one entry. Returns the like count.
pub fn like_post<S: DocumentStore>(store: &S, account_id: &str, post_id: &str) -> Result<usize, ApiError> {
    load_post(store, post_id)?;
    let key = post_likes_key(post_id);
    store.add_member(&key, account_id)?;
    Ok(store.members(&key)?.len())
}

/// Removes the like if present; disliking an unliked post is a no-op.
pub fn dislike_post<S: DocumentStore>(store: &S, account_id: &str, post_id: &str) -> Result<usize, ApiError> {
    load_post(store, post_id)?;
    let key = post_likes_key(post_id);
    store.remove_member(&key, account_id)?;
    Ok(store.members(&key)?.len())
}

// === HTTP Handlers ===

pub fn handle_create_post<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let mut form = read_upload_form(req)?;
    let content = form.fields.remove("content").unwrap_or_default();

    let post = create_post(&ctx.store, &ctx.media, &account_id, &content, form.image)?;
    let view = load_post_view(&ctx.store, &post.id)?;

    json_response(
        201,
        &serde_json::json!({
            "success": true,
            "message": "Post created successfully",
            "post": view,
        }),
    )
}

pub fn handle_list_posts<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let params = parse_query_params(req.uri());
    let posts = list_all_posts(&ctx.store, Page::from_params(&params))?;

    json_response(200, &serde_json::json!({ "success": true, "posts": posts }))
}

pub fn handle_own_posts<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let posts = list_account_posts(&ctx.store, &account_id)?;

    json_response(200, &serde_json::json!({ "success": true, "posts": posts }))
}

pub fn handle_posts_by_account<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    account_id: &str,
) -> Result<Response, ApiError> {
    if account_id.is_empty() {
        return Err(ApiError::validation("UserId is required to get user post"));
    }
    let account_id = require_id(account_id, "user")?;
    let posts = list_account_posts(&ctx.store, account_id)?;

    json_response(200, &serde_json::json!({ "success": true, "posts": posts }))
}

pub fn handle_delete_post<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    post_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let post_id = require_id(post_id, "post")?;
    delete_post(&ctx.store, &account_id, post_id)?;

    json_response(
        200,
        &serde_json::json!({ "success": true, "message": "Post deleted successfully" }),
    )
}

pub fn handle_update_post<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    post_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let post_id = require_id(post_id, "post")?;
    let mut form = read_upload_form(req)?;
    let update = PostUpdate {
        content: form.fields.remove("content"),
        image: form.image,
    };
    update_post(&ctx.store, &ctx.media, &account_id, post_id, update)?;

    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "message": "Post updated successfully",
            "post": load_post_view(&ctx.store, post_id)?,
        }),
    )
}

pub fn handle_like_post<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    post_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let post_id = require_id(post_id, "post")?;
    let likes = like_post(&ctx.store, &account_id, post_id)?;

    json_response(
        200,
        &serde_json::json!({ "success": true, "message": "Post liked", "likes": likes }),
    )
}

pub fn handle_dislike_post<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    post_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let post_id = require_id(post_id, "post")?;
    let likes = dislike_post(&ctx.store, &account_id, post_id)?;

    json_response(
        200,
        &serde_json::json!({ "success": true, "message": "Post disliked", "likes": likes }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::core::db::FailingStore;
    use crate::media::{parse_data_uri, StoreMediaHost};
    use crate::users::{register, Registration};

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn png() -> ImageUpload {
        parse_data_uri(PNG).unwrap()
    }

    struct BrokenMedia;

    impl MediaHost for BrokenMedia {
        fn upload(&self, _: &[u8], _: &str) -> anyhow::Result<String> {
            anyhow::bail!("asset host unreachable")
        }

        fn fetch(&self, _: &str) -> anyhow::Result<Option<(Vec<u8>, String)>> {
            Ok(None)
        }
    }

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

    fn setup() -> (MemoryStore, StoreMediaHost<MemoryStore>, String, String) {
        let store = MemoryStore::new();
        let media = StoreMediaHost::new(store.clone(), "");
        let alice = account(&store, "alice@example.com");
        let bob = account(&store, "bob@example.com");
        (store, media, alice, bob)
    }

    #[test]
    fn create_requires_an_image() {
        let (store, media, alice, _) = setup();
        let err = create_post(&store, &media, &alice, "hello", None).err().unwrap();
        assert_eq!(err.to_string(), "Image is required");
        assert!(store.members(FEED_KEY).unwrap().is_empty());
    }

    #[test]
    fn created_post_is_linked_into_feed_and_owner_list() {
        let (store, media, alice, _) = setup();
        let post = create_post(&store, &media, &alice, "see https://example.com", Some(png())).unwrap();

        assert_eq!(post.content, "see https://example.com");
        assert!(post.image.starts_with("/media/"));
        assert_eq!(store.members(FEED_KEY).unwrap(), vec![post.id.clone()]);
        assert_eq!(store.members(&account_posts_key(&alice)).unwrap(), vec![post.id]);
    }

    #[test]
    fn content_is_sanitized() {
        let (store, media, alice, _) = setup();
        let post = create_post(&store, &media, &alice, "<script>alert(1)</script>hi", Some(png())).unwrap();
        assert_eq!(post.content, "hi");
    }

    #[test]
    fn saving_returned_content_keeps_it_unchanged() {
        let (store, media, alice, _) = setup();
        let post = create_post(&store, &media, &alice, "see https://example.com?a=1&b=<2>", Some(png())).unwrap();

        let update = PostUpdate { content: Some(post.content.clone()), image: None };
        let updated = update_post(&store, &media, &alice, &post.id, update).unwrap();
        assert_eq!(updated.content, post.content);
        assert!(!updated.content.contains("<a"));
    }

    #[test]
    fn failed_link_leaves_no_post_behind() {
        let (store, media, alice, _) = setup();
        let failing = FailingStore::new(store.clone(), &account_posts_key(&alice));

        let err = create_post(&failing, &media, &alice, "lost", Some(png())).err().unwrap();
        assert!(matches!(err, ApiError::Internal(_)));

        assert!(store.members(FEED_KEY).unwrap().is_empty());
        assert!(store.members(&account_posts_key(&alice)).unwrap().is_empty());
        assert!(store.keys_with_prefix("post:").unwrap().is_empty());
    }

    #[test]
    fn listing_is_newest_first() {
        let (store, media, alice, bob) = setup();
        let first = create_post(&store, &media, &alice, "first", Some(png())).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = create_post(&store, &media, &bob, "second", Some(png())).unwrap();

        let all = list_all_posts(&store, None).unwrap();
        let ids: Vec<_> = all.iter().map(|v| v.post.id.clone()).collect();
        assert_eq!(ids, vec![second.id, first.id.clone()]);
        assert_eq!(all[1].author.as_ref().unwrap().id, alice);

        let alices = list_account_posts(&store, &alice).unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].post.id, first.id);
    }

    #[test]
    fn liking_twice_keeps_one_entry() {
        let (store, media, alice, bob) = setup();
        let post = create_post(&store, &media, &alice, "", Some(png())).unwrap();

        assert_eq!(like_post(&store, &bob, &post.id).unwrap(), 1);
        assert_eq!(like_post(&store, &bob, &post.id).unwrap(), 1);
        assert_eq!(store.members(&post_likes_key(&post.id)).unwrap(), vec![bob.clone()]);

        assert_eq!(dislike_post(&store, &alice, &post.id).unwrap(), 1);
        assert_eq!(dislike_post(&store, &bob, &post.id).unwrap(), 0);
        assert_eq!(dislike_post(&store, &bob, &post.id).unwrap(), 0);
    }

    #[test]
    fn liking_missing_post_is_not_found() {
        let (store, _, alice, _) = setup();
        assert!(matches!(like_post(&store, &alice, &new_id()), Err(ApiError::NotFound(_))));
        assert!(matches!(dislike_post(&store, &alice, &new_id()), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn only_the_owner_may_delete() {
        let (store, media, alice, bob) = setup();
        let post = create_post(&store, &media, &alice, "mine", Some(png())).unwrap();

        let err = delete_post(&store, &bob, &post.id).err().unwrap();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(load_post(&store, &post.id).unwrap().content, "mine");

        assert!(matches!(delete_post(&store, &bob, &new_id()), Err(ApiError::NotFound(_))));

        delete_post(&store, &alice, &post.id).unwrap();
        assert!(matches!(load_post(&store, &post.id), Err(ApiError::NotFound(_))));
        assert!(store.members(FEED_KEY).unwrap().is_empty());
        assert!(store.members(&account_posts_key(&alice)).unwrap().is_empty());
    }

    #[test]
    fn update_without_image_keeps_the_old_one() {
        let (store, media, alice, bob) = setup();
        let post = create_post(&store, &media, &alice, "draft", Some(png())).unwrap();

        let update = PostUpdate { content: Some("final".into()), image: None };
        let updated = update_post(&store, &media, &alice, &post.id, update).unwrap();
        assert_eq!(updated.content, "final");
        assert_eq!(updated.image, post.image);
        assert_eq!(updated.user_id, alice);
        assert!(updated.updated_at.is_some());

        let update = PostUpdate { content: Some("stolen".into()), image: None };
        let err = update_post(&store, &media, &bob, &post.id, update).err().unwrap();
        assert!(matches!(err, ApiError::Forbidden(_)));
        assert_eq!(load_post(&store, &post.id).unwrap().content, "final");
    }

    #[test]
    fn failed_upload_leaves_post_untouched() {
        let (store, media, alice, _) = setup();
        let post = create_post(&store, &media, &alice, "draft", Some(png())).unwrap();

        let update = PostUpdate { content: Some("new".into()), image: Some(png()) };
        let err = update_post(&store, &BrokenMedia, &alice, &post.id, update).err().unwrap();
        assert!(matches!(err, ApiError::Internal(_)));

        let stored = load_post(&store, &post.id).unwrap();
        assert_eq!(stored.content, "draft");
        assert_eq!(stored.image, post.image);
    }
}
