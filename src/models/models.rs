use serde::{Deserialize, Serialize};

// === Stored documents ===

/// Stored account. Never serialized into a response; use [`PublicAccount`].
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub password: String,
    pub profile_picture: Option<String>,
    pub cover_photo: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bio {
    pub id: String,
    pub user_id: String,
    pub bio_text: Option<String>,
    pub live_in: Option<String>,
    pub relationship: Option<String>,
    pub workplace: Option<String>,
    pub education: Option<String>,
    pub phone: Option<String>,
    pub hometown: Option<String>,
}

/// Comment list and liking-set live in member-sets next to the document.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub post_id: String,
    pub content: String,
    pub created_at: String,
}

// === Response views ===

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSummary {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub profile_picture: Option<String>,
}

impl From<&Account> for AuthorSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            firstname: account.firstname.clone(),
            lastname: account.lastname.clone(),
            profile_picture: account.profile_picture.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicAccount {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub profile_picture: Option<String>,
    pub cover_photo: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub bio: Option<String>,
    pub posts: Vec<String>,
    pub created_at: String,
}

impl PublicAccount {
    pub fn new(account: &Account, posts: Vec<String>) -> Self {
        Self {
            id: account.id.clone(),
            firstname: account.firstname.clone(),
            lastname: account.lastname.clone(),
            email: account.email.clone(),
            profile_picture: account.profile_picture.clone(),
            cover_photo: account.cover_photo.clone(),
            gender: account.gender.clone(),
            date_of_birth: account.date_of_birth.clone(),
            bio: account.bio.clone(),
            posts,
            created_at: account.created_at.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<AuthorSummary>,
    pub likes: Vec<String>,
    pub number_of_likes: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: Option<AuthorSummary>,
    pub comments: Vec<CommentView>,
    pub likes: Vec<String>,
    pub number_of_likes: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub user: PublicAccount,
    pub bio: Option<Bio>,
    pub posts: Vec<PostView>,
}

// === Session ===

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionClaims {
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}
