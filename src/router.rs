use spin_sdk::http::{Method, Request, Response};
use tracing::info;

use crate::context::AppContext;
use crate::core::db::DocumentStore;
use crate::core::errors::ApiError;
use crate::media::{serve_media, MediaHost};
use crate::users::Picture;
use crate::{auth, comments, posts, users};

/// Routes are served bare and under the `/api/v1` mount.
const API_PREFIX: &str = "/api/v1";

pub fn route<S: DocumentStore, M: MediaHost>(ctx: &AppContext<S, M>, req: Request) -> Response {
    let path = req.path().to_string();
    let method = req.method();
    let trimmed = path.strip_prefix(API_PREFIX).unwrap_or(&path);
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    let result = match (method, segments.as_slice()) {
        (Method::Post, ["auth", "register"]) => users::create_user(ctx, &req),
        (Method::Post, ["auth", "login"]) => auth::login_user(ctx, &req),
        (Method::Get, ["auth", "logout"]) => auth::logout_user(ctx, &req),
        (Method::Get, ["auth", "profile", id]) => users::get_profile(ctx, id),
        (Method::Put, ["auth", "update", "profile-pic"]) => {
            users::update_picture_handler(ctx, &req, Picture::Profile)
        }
        (Method::Put, ["auth", "update", "cover-pic"]) => {
            users::update_picture_handler(ctx, &req, Picture::Cover)
        }
        (Method::Put, ["auth", "update-intro"]) => users::update_intro(ctx, &req),

        (Method::Post, ["post", "create"]) => posts::handle_create_post(ctx, &req),
        (Method::Get, ["post", "getallpost"]) => posts::handle_list_posts(ctx, &req),
        (Method::Get, ["post", "getuserpost"]) => posts::handle_own_posts(ctx, &req),
        (Method::Delete, ["post", "delete", id]) => posts::handle_delete_post(ctx, &req, id),
        (Method::Put, ["post", "update-post", id]) => posts::handle_update_post(ctx, &req, id),
        (Method::Get, ["post", id, "like"]) => posts::handle_like_post(ctx, &req, id),
        (Method::Get, ["post", id, "dislike"]) => posts::handle_dislike_post(ctx, &req, id),
        (Method::Get, ["post", user_id]) => posts::handle_posts_by_account(ctx, user_id),

        (Method::Post, ["comment", id, "create"]) => comments::handle_create_comment(ctx, &req, id),
        (Method::Delete, ["comment", id, "delete"]) => comments::handle_delete_comment(ctx, &req, id),
        (Method::Post, ["comment", id, "like"]) => comments::handle_like_comment(ctx, &req, id),

        (Method::Get, ["media", file]) => serve_media(&ctx.media, file),

        _ => Err(ApiError::not_found("No route found")),
    };

    let response = result.unwrap_or_else(Response::from);
    info!(method = %method, path = %path, status = *response.status(), "request");
    response
}
