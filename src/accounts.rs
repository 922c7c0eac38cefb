use std::fs::{self, OpenOptions};
use std::io;
use std::io::ErrorKind::InvalidData;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::FieldErrors;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserRecord {
    pub id: u32,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub phone_number: String,
    salt: String,
    password_hash: String,
    token: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct RegisterInput {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct LoginInput {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub enum RegisterOutcome {
    Created(UserRecord, String),
    Invalid(FieldErrors),
}

/// User store backed by a single JSON file under the data directory.
///
/// Usernames are derived from the email local part and disambiguated with a
/// numeric suffix. Tokens are opaque, one per user, created on first need.
pub struct Accounts {
    users: Vec<UserRecord>,
    path: PathBuf,
    next_id: u32,
}

impl Accounts {
    pub fn new(base_path: &Path) -> io::Result<Self> {
        let path = base_path.join("users.json");
        let users: Vec<UserRecord> = if path.exists() {
            let file = OpenOptions::new().read(true).open(&path)?;
            serde_json::from_reader(file).map_err(|e| io::Error::new(InvalidData, e))?
        } else {
            Vec::new()
        };
        let next_id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;

        Ok(Self {
            users,
            path,
            next_id,
        })
    }

    pub fn register(&mut self, input: &RegisterInput) -> io::Result<RegisterOutcome> {
        let mut errors = FieldErrors::new();
        require(&mut errors, "email", &input.email);
        require(&mut errors, "full_name", &input.full_name);
        require(&mut errors, "phone_number", &input.phone_number);
        require(&mut errors, "password", &input.password);

        if let Some(email) = &input.email {
            if !email.is_empty() && !email.contains('@') {
                errors
                    .entry("email")
                    .or_default()
                    .push("Enter a valid email address.".to_owned());
            } else if self.users.iter().any(|u| u.email == *email) {
                errors
                    .entry("email")
                    .or_default()
                    .push("user with this email already exists.".to_owned());
            }
        }
        if !errors.is_empty() {
            return Ok(RegisterOutcome::Invalid(errors));
        }

        let email = input.email.clone().unwrap_or_default();
        let username = self.derive_username(&email);
        let salt = generate_salt();
        let password_hash = hash_password(&salt, input.password.as_deref().unwrap_or_default());
        let token = new_token();

        let user = UserRecord {
            id: self.next_id,
            email,
            username,
            full_name: input.full_name.clone().unwrap_or_default(),
            phone_number: input.phone_number.clone().unwrap_or_default(),
            salt,
            password_hash,
            token: Some(token.clone()),
        };
        self.next_id += 1;
        self.users.push(user.clone());
        self.save()?;
        Ok(RegisterOutcome::Created(user, token))
    }

    /// Checks the credentials and hands back the user with their token,
    /// creating the token on first successful login. `None` covers both an
    /// unknown email and a wrong password, on purpose.
    pub fn login(&mut self, email: &str, password: &str) -> io::Result<Option<(UserRecord, String)>> {
        let user = match self.users.iter_mut().find(|u| u.email == email) {
            Some(user) => user,
            None => return Ok(None),
        };
        if hash_password(&user.salt, password) != user.password_hash {
            return Ok(None);
        }

        let token = match &user.token {
            Some(token) => token.clone(),
            None => {
                let token = new_token();
                user.token = Some(token.clone());
                token
            }
        };
        let user = user.clone();
        self.save()?;
        Ok(Some((user, token)))
    }

    fn derive_username(&self, email: &str) -> String {
        let base = email.split('@').next().unwrap_or(email);
        let mut username = base.to_owned();
        let mut counter = 1;
        while self.users.iter().any(|u| u.username == username) {
            username = format!("{}{}", base, counter);
            counter += 1;
        }
        username
    }

    fn save(&self) -> io::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        serde_json::to_writer(file, &self.users).map_err(|e| io::Error::new(InvalidData, e))
    }
}

fn require(errors: &mut FieldErrors, field: &'static str, value: &Option<String>) {
    let message = match value {
        None => "This field is required.",
        Some(v) if v.is_empty() => "This field may not be blank.",
        Some(_) => return,
    };
    errors.entry(field).or_default().push(message.to_owned());
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}
