//! User use-case service.
//!
//! # Responsibility
//! - Register users (validate, hash, create, read back).
//! - Resolve the current user from an authorization value.
//! - Apply partial profile updates for the current user.
//!
//! # Invariants
//! - Plaintext passwords are validated before hashing and never stored.
//! - Update requests only change the fields they carry; `None` keeps the
//!   stored value.

use crate::model::input_error::InputError;
use crate::model::user::{validate_password, User};
use crate::repo::user_repo::{RepoError, UpdateOutcome, UserRepository};
use crate::service::collaborators::{AuthError, Authenticator, HashError, PasswordHasher};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Service error for user use-cases.
#[derive(Debug)]
pub enum ServiceError {
    /// Missing, invalid or expired credentials, or the token's user is gone.
    Unauthorized,
    /// The caller supplied a bad field value.
    Input(InputError),
    Hash(HashError),
    Repo(RepoError),
    /// A write succeeded but its read-back did not.
    InconsistentState(&'static str),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Input(err) => write!(f, "{err}"),
            Self::Hash(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent user state: {details}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Input(err) => Some(err),
            Self::Hash(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Unauthorized | Self::InconsistentState(_) => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Input(err) => Self::Input(err),
            other => Self::Repo(other),
        }
    }
}

impl From<InputError> for ServiceError {
    fn from(value: InputError) -> Self {
        Self::Input(value)
    }
}

impl From<HashError> for ServiceError {
    fn from(value: HashError) -> Self {
        Self::Hash(value)
    }
}

/// Registration input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Partial profile update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    /// `Some("")` clears the image.
    pub image: Option<String>,
    /// `Some("")` clears the bio.
    pub bio: Option<String>,
}

/// Profile view returned to the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub token: String,
}

impl UserProfile {
    pub fn from_user(user: &User, token: impl Into<String>) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            image: user.image().map(str::to_string),
            bio: user.bio().map(str::to_string),
            token: token.into(),
        }
    }
}

/// User service facade over a repository and external collaborators.
pub struct UserService<R: UserRepository, A: Authenticator, H: PasswordHasher> {
    repo: R,
    auth: A,
    hasher: H,
}

impl<R: UserRepository, A: Authenticator, H: PasswordHasher> UserService<R, A, H> {
    pub fn new(repo: R, auth: A, hasher: H) -> Self {
        Self { repo, auth, hasher }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Registers a new user and returns the stored record.
    ///
    /// Username and email are validated before the password is hashed.
    pub fn register(&self, request: &NewUserRequest) -> Result<User, ServiceError> {
        let mut user = User::new(
            request.username.as_str(),
            request.email.as_str(),
            Vec::<u8>::new(),
        );
        user.validate()?;
        validate_password(&request.password)?;
        user.password_hash = self.hasher.hash(&request.password)?;

        self.repo.create_user(&user)?;
        self.repo
            .get_user_by_username(&user.username)
            .map_err(|err| match err {
                RepoError::Input(input) if input.is_not_found() => {
                    ServiceError::InconsistentState("created user not found in read-back")
                }
                other => other.into(),
            })
    }

    /// Returns the user behind `authorization` and the token to echo back.
    pub fn current_user(&self, authorization: &str) -> Result<(User, String), ServiceError> {
        let session = self.auth.verify(authorization).map_err(|AuthError(reason)| {
            warn!("event=current_user module=service status=unauthorized reason={reason}");
            ServiceError::Unauthorized
        })?;

        match self.repo.get_user_by_username(&session.username) {
            Ok(user) => Ok((user, session.token)),
            Err(RepoError::Input(input)) if input.is_not_found() => {
                warn!("event=current_user module=service status=unauthorized reason=user_missing");
                Err(ServiceError::Unauthorized)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Applies `request` to the current user and returns the new profile.
    pub fn update_current_user(
        &self,
        authorization: &str,
        request: &UpdateUserRequest,
    ) -> Result<UserProfile, ServiceError> {
        let (old, token) = self.current_user(authorization)?;

        let mut new = old.clone();
        new.password_hash = Vec::new();
        if let Some(email) = &request.email {
            new.email = email.clone();
        }
        if let Some(image) = &request.image {
            new.image = Some(image.clone()).filter(|image| !image.is_empty());
        }
        if let Some(bio) = &request.bio {
            new.bio = Some(bio.clone()).filter(|bio| !bio.is_empty());
        }
        new.validate()?;
        if let Some(password) = &request.password {
            validate_password(password)?;
            new.password_hash = self.hasher.hash(password)?;
        }

        if let UpdateOutcome::Applied { changed_fields, .. } = self.repo.update_user(&old, &new)? {
            info!(
                "event=user_profile_update module=service status=ok fields={}",
                changed_fields.len()
            );
        }
        Ok(UserProfile::from_user(&new, token))
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<User, ServiceError> {
        Ok(self.repo.get_user_by_email(email)?)
    }

    /// Loads users for display, one entry per requested username.
    pub fn find_users(&self, usernames: &[String]) -> Result<Vec<User>, ServiceError> {
        Ok(self.repo.get_users_by_usernames(usernames)?)
    }
}
