//! User and email-projection records.
//!
//! # Responsibility
//! - Hold the mutable profile fields of a user keyed by `username`.
//! - Provide validators for each externally supplied field.
//! - Translate records to store items and back, attribute by attribute.
//!
//! # Invariants
//! - `password_hash` is opaque; an empty hash means "not provided".
//! - `image`/`bio` set to `Some("")` behave exactly like `None` and are
//!   never written to the store.
//! - Decoding rejects items missing a required attribute or holding an
//!   attribute of the wrong kind.

use crate::model::input_error::{InputError, MSG_INVALID};
use crate::store::{AttributeValue, Item, Key};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const ATTR_USERNAME: &str = "Username";
pub const ATTR_EMAIL: &str = "Email";
pub const ATTR_PASSWORD_HASH: &str = "PasswordHash";
pub const ATTR_IMAGE: &str = "Image";
pub const ATTR_BIO: &str = "Bio";

pub const FIELD_USERNAME: &str = "username";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_IMAGE: &str = "image";
pub const FIELD_BIO: &str = "bio";

const USERNAME_MAX_CHARS: usize = 64;
const EMAIL_MAX_CHARS: usize = 254;
const PASSWORD_MIN_CHARS: usize = 8;
const PASSWORD_MAX_CHARS: usize = 128;
const IMAGE_MAX_CHARS: usize = 2048;
const BIO_MAX_CHARS: usize = 1024;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid username regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));
static IMAGE_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://\S+$").expect("valid image url regex"));

/// A registered user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Primary key; immutable after creation.
    pub username: String,
    /// Unique across all users.
    pub email: String,
    /// Output of the password hasher. Never serialized.
    #[serde(skip)]
    pub password_hash: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            image: None,
            bio: None,
        }
    }

    /// Store key of the user record for `username`.
    pub fn key(username: &str) -> Key {
        Key::new(ATTR_USERNAME, username)
    }

    /// Image URL, treating an empty string as absent.
    pub fn image(&self) -> Option<&str> {
        non_empty(&self.image)
    }

    /// Bio text, treating an empty string as absent.
    pub fn bio(&self) -> Option<&str> {
        non_empty(&self.bio)
    }

    /// Validates the fields a caller may supply on update.
    ///
    /// The password hash is not checked here: an empty hash means the caller
    /// keeps the current password.
    pub fn validate(&self) -> Result<(), InputError> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_image(self.image())?;
        validate_bio(self.bio())
    }

    /// Validates a brand-new user, which must carry a password hash.
    pub fn validate_for_create(&self) -> Result<(), InputError> {
        self.validate()?;
        if self.password_hash.is_empty() {
            return Err(InputError::blank(FIELD_PASSWORD));
        }
        Ok(())
    }

    /// Maps the record to a store item. Empty optional fields are omitted.
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(
            ATTR_USERNAME.to_string(),
            AttributeValue::Text(self.username.clone()),
        );
        item.insert(
            ATTR_EMAIL.to_string(),
            AttributeValue::Text(self.email.clone()),
        );
        if !self.password_hash.is_empty() {
            item.insert(
                ATTR_PASSWORD_HASH.to_string(),
                AttributeValue::Bytes(self.password_hash.clone()),
            );
        }
        if let Some(image) = self.image() {
            item.insert(
                ATTR_IMAGE.to_string(),
                AttributeValue::Text(image.to_string()),
            );
        }
        if let Some(bio) = self.bio() {
            item.insert(ATTR_BIO.to_string(), AttributeValue::Text(bio.to_string()));
        }
        item
    }

    /// Rebuilds a record from a stored item.
    pub fn from_item(item: &Item) -> Result<Self, ItemDecodeError> {
        Ok(Self {
            username: required_text(item, ATTR_USERNAME)?,
            email: required_text(item, ATTR_EMAIL)?,
            password_hash: optional_bytes(item, ATTR_PASSWORD_HASH)?.unwrap_or_default(),
            image: optional_text(item, ATTR_IMAGE)?,
            bio: optional_text(item, ATTR_BIO)?,
        })
    }
}

/// Projection record resolving an email to the username that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailUser {
    pub email: String,
    pub username: String,
}

impl EmailUser {
    pub fn new(email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
        }
    }

    /// Store key of the projection record for `email`.
    pub fn key(email: &str) -> Key {
        Key::new(ATTR_EMAIL, email)
    }

    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(
            ATTR_EMAIL.to_string(),
            AttributeValue::Text(self.email.clone()),
        );
        item.insert(
            ATTR_USERNAME.to_string(),
            AttributeValue::Text(self.username.clone()),
        );
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, ItemDecodeError> {
        Ok(Self {
            email: required_text(item, ATTR_EMAIL)?,
            username: required_text(item, ATTR_USERNAME)?,
        })
    }
}

/// Stored item that does not decode into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDecodeError {
    MissingAttribute(&'static str),
    WrongKind(&'static str),
}

impl Display for ItemDecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAttribute(name) => write!(f, "missing attribute `{name}`"),
            Self::WrongKind(name) => write!(f, "attribute `{name}` has the wrong value kind"),
        }
    }
}

impl Error for ItemDecodeError {}

pub fn validate_username(username: &str) -> Result<(), InputError> {
    if username.trim().is_empty() {
        return Err(InputError::blank(FIELD_USERNAME));
    }
    if username.chars().count() > USERNAME_MAX_CHARS {
        return Err(too_long(FIELD_USERNAME, USERNAME_MAX_CHARS));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(InputError::invalid(FIELD_USERNAME, MSG_INVALID));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), InputError> {
    if email.trim().is_empty() {
        return Err(InputError::blank(FIELD_EMAIL));
    }
    if email.chars().count() > EMAIL_MAX_CHARS {
        return Err(too_long(FIELD_EMAIL, EMAIL_MAX_CHARS));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(InputError::invalid(FIELD_EMAIL, MSG_INVALID));
    }
    Ok(())
}

/// Validates a plaintext password before it is handed to the hasher.
pub fn validate_password(password: &str) -> Result<(), InputError> {
    if password.trim().is_empty() {
        return Err(InputError::blank(FIELD_PASSWORD));
    }
    let chars = password.chars().count();
    if chars < PASSWORD_MIN_CHARS {
        return Err(InputError::invalid(
            FIELD_PASSWORD,
            format!("is too short (minimum is {PASSWORD_MIN_CHARS} characters)"),
        ));
    }
    if chars > PASSWORD_MAX_CHARS {
        return Err(too_long(FIELD_PASSWORD, PASSWORD_MAX_CHARS));
    }
    Ok(())
}

pub fn validate_image(image: Option<&str>) -> Result<(), InputError> {
    let Some(image) = image else {
        return Ok(());
    };
    if image.chars().count() > IMAGE_MAX_CHARS {
        return Err(too_long(FIELD_IMAGE, IMAGE_MAX_CHARS));
    }
    if !IMAGE_URL_RE.is_match(image) {
        return Err(InputError::invalid(FIELD_IMAGE, MSG_INVALID));
    }
    Ok(())
}

pub fn validate_bio(bio: Option<&str>) -> Result<(), InputError> {
    match bio {
        Some(bio) if bio.chars().count() > BIO_MAX_CHARS => Err(too_long(FIELD_BIO, BIO_MAX_CHARS)),
        _ => Ok(()),
    }
}

fn too_long(field: &'static str, max_chars: usize) -> InputError {
    InputError::invalid(
        field,
        format!("is too long (maximum is {max_chars} characters)"),
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn required_text(item: &Item, name: &'static str) -> Result<String, ItemDecodeError> {
    optional_text(item, name)?.ok_or(ItemDecodeError::MissingAttribute(name))
}

fn optional_text(item: &Item, name: &'static str) -> Result<Option<String>, ItemDecodeError> {
    match item.get(name) {
        Some(value) => value
            .as_text()
            .map(|text| Some(text.to_string()))
            .ok_or(ItemDecodeError::WrongKind(name)),
        None => Ok(None),
    }
}

fn optional_bytes(item: &Item, name: &'static str) -> Result<Option<Vec<u8>>, ItemDecodeError> {
    match item.get(name) {
        Some(value) => value
            .as_bytes()
            .map(|bytes| Some(bytes.to_vec()))
            .ok_or(ItemDecodeError::WrongKind(name)),
        None => Ok(None),
    }
}
