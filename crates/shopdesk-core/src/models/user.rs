use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, FieldErrors, MultipartBody};

use super::ImageUpload;

/// Minimum password length the backend enforces
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum length of the profile bio
pub const MAX_BIO_LENGTH: usize = 2000;

/// New account details, sent as JSON to the registration endpoint.
#[derive(Clone, Default, Serialize)]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl std::fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl RegistrationForm {
    /// Local checks before hitting the backend. Errors use the backend's field
    /// names so callers can render both the same way.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        if self.first_name.trim().is_empty() {
            errors.add("first_name", "First name is required");
        }
        if self.last_name.trim().is_empty() {
            errors.add("last_name", "Last name is required");
        }

        let email = self.email.trim();
        if email.is_empty() {
            errors.add("email", "Email is required");
        } else if !looks_like_email(email) {
            errors.add("email", "Email is invalid");
        }

        if self.password.is_empty() {
            errors.add("password", "Password is required");
        } else if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            errors.add(
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH),
            );
        }

        if self.confirm_password.is_empty() {
            errors.add("confirm_password", "Please confirm your password");
        } else if self.confirm_password != self.password {
            errors.add("confirm_password", "Passwords do not match");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Something@something.something, no whitespace
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain
                    .split_once('.')
                    .map(|(host, tld)| !host.is_empty() && !tld.is_empty())
                    .unwrap_or(false)
        }
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl UserSummary {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.email.clone()
        } else {
            full.to_string()
        }
    }
}

/// Registration result. The backend also issues tokens here, but they are not
/// kept: the account logs in explicitly afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredUser {
    #[serde(default)]
    pub message: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub bio: String,
    pub profile_picture: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Editable profile fields. Only what is set is sent.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub profile_picture: Option<ImageUpload>,
}

impl ProfileUpdate {
    pub fn bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn profile_picture(mut self, picture: ImageUpload) -> Self {
        self.profile_picture = Some(picture);
        self
    }

    pub fn into_form(self) -> Result<MultipartBody, ApiError> {
        if self.bio.is_none() && self.profile_picture.is_none() {
            return Err(ApiError::InvalidRequest("Nothing to update".to_string()));
        }

        let mut form = MultipartBody::new();
        if let Some(bio) = self.bio {
            if bio.chars().count() > MAX_BIO_LENGTH {
                return Err(ApiError::InvalidRequest(format!(
                    "Bio cannot exceed {} characters",
                    MAX_BIO_LENGTH
                )));
            }
            form = form.text("bio", bio);
        }
        if let Some(picture) = self.profile_picture {
            picture.check_profile_picture()?;
            form = form.file("profile_picture", picture);
        }
        Ok(form)
    }
}
