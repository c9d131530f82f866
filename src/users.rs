use serde::Deserialize;
use spin_sdk::http::{Request, Response};
use tracing::info;

use crate::auth::require_session;
use crate::config::*;
use crate::context::AppContext;
use crate::core::db::DocumentStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{
    hash_password, json_response, new_id, now_iso, parse_json_body, require_id, sanitize_text,
};
use crate::media::{read_upload_form, upload_optional, ImageUpload, MediaHost};
use crate::models::models::{Account, AuthorSummary, Bio, ProfileView, PublicAccount};
use crate::posts::load_post_view;

pub fn load_account<S: DocumentStore>(store: &S, id: &str) -> Result<Account, ApiError> {
    store
        .get_json::<Account>(&account_key(id))?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub fn author_summary<S: DocumentStore>(store: &S, id: &str) -> anyhow::Result<Option<AuthorSummary>> {
    Ok(store
        .get_json::<Account>(&account_key(id))?
        .map(|account| AuthorSummary::from(&account)))
}

fn public_account<S: DocumentStore>(store: &S, account: &Account) -> anyhow::Result<PublicAccount> {
    let posts = store.members(&account_posts_key(&account.id))?;
    Ok(PublicAccount::new(account, posts))
}

fn required_name(value: &str, field: &str) -> Result<String, ApiError> {
    let clean = sanitize_text(value.trim());
    if clean.is_empty() {
        return Err(ApiError::validation(format!("{} is required", field)));
    }
    if clean.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::validation(format!(
            "{} must be at most {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(clean)
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| sanitize_text(v.trim()))
        .filter(|v| !v.is_empty())
}

// === Registration ===

#[derive(Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
}

pub fn register<S: DocumentStore>(store: &S, input: Registration) -> Result<Account, ApiError> {
    let firstname = required_name(&input.firstname, "First name")?;
    let lastname = required_name(&input.lastname, "Last name")?;

    let email = input.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if !email.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(ApiError::validation("Email is invalid"));
    }
    if input.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }
    if input.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let email_key = account_email_key(&email);
    if store.exists(&email_key)? {
        return Err(ApiError::Conflict(
            "User with this email already exists".to_string(),
        ));
    }

    let account = Account {
        id: new_id(),
        firstname,
        lastname,
        email,
        password: hash_password(&input.password)?,
        profile_picture: None,
        cover_photo: None,
        gender: optional_text(input.gender),
        date_of_birth: optional_text(input.date_of_birth),
        bio: None,
        created_at: now_iso(),
    };

    store.set_json(&account_key(&account.id), &account)?;
    store.set_json(&email_key, &account.id)?;
    info!(account = %account.id, "account registered");

    Ok(account)
}

// === Profile ===

pub fn load_profile<S: DocumentStore>(store: &S, account_id: &str) -> Result<ProfileView, ApiError> {
    let account = load_account(store, account_id)?;
    let user = public_account(store, &account)?;

    let mut posts = Vec::new();
    for post_id in &user.posts {
        if let Some(view) = load_post_view(store, post_id)? {
            posts.push(view);
        }
    }
    posts.sort_by(|a, b| b.post.created_at.cmp(&a.post.created_at));

    let bio = match &account.bio {
        Some(bio_id) => store.get_json::<Bio>(&bio_key(bio_id))?,
        None => None,
    };

    Ok(ProfileView { user, bio, posts })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Picture {
    Profile,
    Cover,
}

impl Picture {
    fn label(self) -> &'static str {
        match self {
            Picture::Profile => "Profile",
            Picture::Cover => "Cover",
        }
    }
}

/// Replaces the profile or cover picture and returns its new URL.
pub fn update_picture<S: DocumentStore, M: MediaHost>(
    store: &S,
    media: &M,
    account_id: &str,
    picture: Picture,
    image: Option<&ImageUpload>,
) -> Result<String, ApiError> {
    let mut account = load_account(store, account_id)?;
    let url = upload_optional(media, image)?
        .ok_or_else(|| ApiError::validation(format!("{} picture is required", picture.label())))?;

    match picture {
        Picture::Profile => account.profile_picture = Some(url.clone()),
        Picture::Cover => account.cover_photo = Some(url.clone()),
    }
    store.set_json(&account_key(account_id), &account)?;
    info!(account = %account_id, ?picture, "picture updated");

    Ok(url)
}

// === Bio ===

/// Fields left as `None` keep their stored value. An empty string clears one.
#[derive(Deserialize, Default, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BioUpdate {
    pub bio_text: Option<String>,
    pub live_in: Option<String>,
    pub relationship: Option<String>,
    pub workplace: Option<String>,
    pub education: Option<String>,
    pub phone: Option<String>,
    pub hometown: Option<String>,
}

fn apply_field(
    target: &mut Option<String>,
    value: Option<String>,
    name: &str,
    max: usize,
) -> Result<(), ApiError> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.chars().count() > max {
        return Err(ApiError::validation(format!(
            "{} must be at most {} characters",
            name, max
        )));
    }
    *target = optional_text(Some(value));
    Ok(())
}

fn find_bio<S: DocumentStore>(store: &S, account: &Account) -> anyhow::Result<Option<Bio>> {
    if let Some(bio_id) = store.get_json::<String>(&bio_owner_key(&account.id))? {
        if let Some(bio) = store.get_json::<Bio>(&bio_key(&bio_id))? {
            return Ok(Some(bio));
        }
    }
    // Index lost but the account still points at its record.
    if let Some(bio_id) = &account.bio {
        if let Some(bio) = store.get_json::<Bio>(&bio_key(bio_id))? {
            if bio.user_id == account.id {
                return Ok(Some(bio));
            }
        }
    }
    Ok(None)
}

/// Creates the bio on first use, applies only the supplied fields and repairs
/// the account's reference to it.
pub fn upsert_bio<S: DocumentStore>(
    store: &S,
    account_id: &str,
    update: BioUpdate,
) -> Result<Bio, ApiError> {
    let mut account = load_account(store, account_id)?;

    let mut bio = find_bio(store, &account)?.unwrap_or_else(|| Bio {
        id: new_id(),
        user_id: account_id.to_string(),
        ..Bio::default()
    });

    apply_field(&mut bio.bio_text, update.bio_text, "Bio", MAX_BIO_TEXT_LENGTH)?;
    apply_field(&mut bio.live_in, update.live_in, "Live in", MAX_BIO_FIELD_LENGTH)?;
    apply_field(&mut bio.relationship, update.relationship, "Relationship", MAX_BIO_FIELD_LENGTH)?;
    apply_field(&mut bio.workplace, update.workplace, "Workplace", MAX_BIO_FIELD_LENGTH)?;
    apply_field(&mut bio.education, update.education, "Education", MAX_BIO_FIELD_LENGTH)?;
    apply_field(&mut bio.phone, update.phone, "Phone", MAX_BIO_FIELD_LENGTH)?;
    apply_field(&mut bio.hometown, update.hometown, "Hometown", MAX_BIO_FIELD_LENGTH)?;

    store.set_json(&bio_key(&bio.id), &bio)?;
    store.set_json(&bio_owner_key(account_id), &bio.id)?;

    if account.bio.as_deref() != Some(bio.id.as_str()) {
        account.bio = Some(bio.id.clone());
        store.set_json(&account_key(account_id), &account)?;
        info!(account = %account_id, bio = %bio.id, "bio reference set");
    }

    Ok(bio)
}

// === HTTP Handlers ===

pub fn create_user<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let input: Registration = parse_json_body(req)?;
    let account = register(&ctx.store, input)?;

    json_response(
        201,
        &serde_json::json!({
            "success": true,
            "message": "User created successfully",
            "user": public_account(&ctx.store, &account)?,
        }),
    )
}

pub fn get_profile<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    account_id: &str,
) -> Result<Response, ApiError> {
    let account_id = require_id(account_id, "user")?;
    let profile = load_profile(&ctx.store, account_id)?;

    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "user": profile,
        }),
    )
}

pub fn update_picture_handler<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
    picture: Picture,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let form = read_upload_form(req)?;
    let url = update_picture(&ctx.store, &ctx.media, &account_id, picture, form.image.as_ref())?;

    let (message, field) = match picture {
        Picture::Profile => ("Profile photo updated successfully", "profilePicture"),
        Picture::Cover => ("Cover photo updated successfully", "coverPhoto"),
    };
    let mut resp = serde_json::json!({
        "success": true,
        "message": message,
    });
    resp[field] = serde_json::Value::String(url);

    json_response(200, &resp)
}

pub fn update_intro<S: DocumentStore, M: MediaHost>(
    ctx: &AppContext<S, M>,
    req: &Request,
) -> Result<Response, ApiError> {
    let account_id = require_session(ctx, req)?;
    let update: BioUpdate = parse_json_body(req)?;
    let bio = upsert_bio(&ctx.store, &account_id, update)?;

    json_response(
        200,
        &serde_json::json!({
            "success": true,
            "message": "Bio updated successfully",
            "bio": bio,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;
    use crate::media::StoreMediaHost;

    fn registration(email: &str) -> Registration {
        Registration {
            firstname: "Grace".into(),
            lastname: "Hopper".into(),
            email: email.into(),
            password: "cobol-1959".into(),
            gender: Some("female".into()),
            date_of_birth: Some("1906-12-09".into()),
        }
    }

    #[test]
    fn registering_same_email_twice_conflicts() {
        let store = MemoryStore::new();
        register(&store, registration("grace@navy.mil")).unwrap();

        let err = register(&store, registration("Grace@Navy.mil")).err().unwrap();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn registration_validates_required_fields() {
        let store = MemoryStore::new();
        let mut input = registration("grace@navy.mil");
        input.password = "123".into();
        assert!(matches!(register(&store, input), Err(ApiError::Validation(_))));

        let mut input = registration("not-an-email");
        input.email = "not-an-email".into();
        assert!(matches!(register(&store, input), Err(ApiError::Validation(_))));

        let mut input = registration("grace@navy.mil");
        input.firstname = "<b></b>".into();
        assert!(matches!(register(&store, input), Err(ApiError::Validation(_))));

        assert!(store.is_empty());
    }

    #[test]
    fn public_views_never_carry_the_password_hash() {
        let store = MemoryStore::new();
        let account = register(&store, registration("grace@navy.mil")).unwrap();

        let profile = load_profile(&store, &account.id).unwrap();
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains(&account.password));
        assert!(!json.contains("password"));
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(load_profile(&store, &new_id()), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn wire_fields_are_camel_case() {
        let update: BioUpdate =
            serde_json::from_str(r#"{"bioText":"hi","liveIn":"Delhi"}"#).unwrap();
        assert_eq!(update.bio_text.as_deref(), Some("hi"));
        assert_eq!(update.live_in.as_deref(), Some("Delhi"));

        let input: Registration = serde_json::from_str(
            r#"{"firstname":"Grace","lastname":"Hopper","email":"g@navy.mil","password":"cobol-1959","dateOfBirth":"1906-12-09"}"#,
        )
        .unwrap();
        assert_eq!(input.date_of_birth.as_deref(), Some("1906-12-09"));

        let store = MemoryStore::new();
        let account = register(&store, input).unwrap();
        let bio = upsert_bio(&store, &account.id, update).unwrap();
        let json = serde_json::to_value(&bio).unwrap();
        assert_eq!(json["bioText"], "hi");
        assert_eq!(json["liveIn"], "Delhi");
        assert_eq!(json["userId"], account.id.as_str());

        let profile = serde_json::to_value(load_profile(&store, &account.id).unwrap()).unwrap();
        assert_eq!(profile["user"]["dateOfBirth"], "1906-12-09");
    }

    #[test]
    fn bio_upsert_only_touches_supplied_fields() {
        let store = MemoryStore::new();
        let account = register(&store, registration("grace@navy.mil")).unwrap();

        let first = upsert_bio(
            &store,
            &account.id,
            BioUpdate {
                bio_text: Some("Rear admiral".into()),
                workplace: Some("US Navy".into()),
                hometown: Some("New York".into()),
                ..BioUpdate::default()
            },
        )
        .unwrap();

        let second = upsert_bio(
            &store,
            &account.id,
            BioUpdate {
                workplace: Some("Harvard".into()),
                ..BioUpdate::default()
            },
        )
        .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.workplace.as_deref(), Some("Harvard"));
        assert_eq!(second.bio_text.as_deref(), Some("Rear admiral"));
        assert_eq!(second.hometown.as_deref(), Some("New York"));
        assert_eq!(second.phone, None);
    }

    #[test]
    fn empty_string_clears_a_bio_field() {
        let store = MemoryStore::new();
        let account = register(&store, registration("grace@navy.mil")).unwrap();
        upsert_bio(&store, &account.id, BioUpdate { phone: Some("555".into()), ..Default::default() }).unwrap();
        let bio = upsert_bio(&store, &account.id, BioUpdate { phone: Some("".into()), ..Default::default() }).unwrap();
        assert_eq!(bio.phone, None);
    }

    #[test]
    fn bio_reference_is_created_and_self_healed() {
        let store = MemoryStore::new();
        let account = register(&store, registration("grace@navy.mil")).unwrap();
        let bio = upsert_bio(&store, &account.id, BioUpdate::default()).unwrap();
        assert_eq!(load_account(&store, &account.id).unwrap().bio, Some(bio.id.clone()));

        // Break the back-reference; the next update restores it.
        let mut stale = load_account(&store, &account.id).unwrap();
        stale.bio = None;
        store.set_json(&account_key(&account.id), &stale).unwrap();

        let again = upsert_bio(&store, &account.id, BioUpdate { education: Some("Yale".into()), ..Default::default() }).unwrap();
        assert_eq!(again.id, bio.id);
        assert_eq!(load_account(&store, &account.id).unwrap().bio, Some(bio.id));
    }

    #[test]
    fn oversized_bio_field_writes_nothing() {
        let store = MemoryStore::new();
        let account = register(&store, registration("grace@navy.mil")).unwrap();
        let err = upsert_bio(
            &store,
            &account.id,
            BioUpdate {
                bio_text: Some("x".repeat(MAX_BIO_TEXT_LENGTH + 1)),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(ApiError::Validation(_))));
        assert!(store.get_json::<String>(&bio_owner_key(&account.id)).unwrap().is_none());
    }

    #[test]
    fn picture_update_requires_a_file() {
        let store = MemoryStore::new();
        let media = StoreMediaHost::new(store.clone(), "");
        let account = register(&store, registration("grace@navy.mil")).unwrap();

        let err = update_picture(&store, &media, &account.id, Picture::Cover, None).err().unwrap();
        assert_eq!(err.to_string(), "Cover picture is required");

        let image = crate::media::parse_data_uri("data:image/png;base64,iVBORw0KGgo=").unwrap();
        let url = update_picture(&store, &media, &account.id, Picture::Profile, Some(&image)).unwrap();
        let stored = load_account(&store, &account.id).unwrap();
        assert_eq!(stored.profile_picture, Some(url));
        assert_eq!(stored.cover_photo, None);
    }
}
