use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::{is_reasonable_email, normalize_email};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Patient,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "Patient",
            Role::Provider => "Provider",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Patient" => Ok(Role::Patient),
            "Provider" => Ok(Role::Provider),
            other => Err(ProtocolError::UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A row of the user directory, keyed by the auth identity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub name: String,
    pub age: Option<i32>,
    pub sex: Option<String>,
    pub nationality: Option<String>,
    /// Aadhaar number for patients, medical licence number for providers.
    pub national_id: Option<String>,
}

/// Sign-up form, validated before any identity is created.
#[derive(Debug, Clone, Deserialize)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub name: String,
    pub age: Option<i32>,
    pub sex: Option<String>,
    pub nationality: Option<String>,
    pub national_id: Option<String>,
}

impl SignUp {
    /// Checks the form and returns the profile it describes under `id`.
    pub fn into_profile(self, id: Uuid) -> Result<(UserProfile, String), ProtocolError> {
        let email = normalize_email(&self.email);
        if !is_reasonable_email(&email) {
            return Err(ProtocolError::InvalidEmail);
        }
        if self.password.len() < 8 || self.password.len() > 128 {
            return Err(ProtocolError::WeakPassword);
        }
        let name: String = self.name.trim().chars().take(128).collect();
        if name.is_empty() {
            return Err(ProtocolError::MissingField("name"));
        }

        let profile = UserProfile {
            id,
            email,
            role: self.role,
            name,
            age: self.age,
            sex: non_blank(self.sex),
            nationality: non_blank(self.nationality),
            national_id: non_blank(self.national_id),
        };
        Ok((profile, self.password))
    }
}

/// Settings-page edit. Every field is required, as on the form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub age: i32,
    pub sex: String,
    pub nationality: String,
    pub national_id: String,
}

impl ProfileUpdate {
    pub fn validate(self) -> Result<Self, ProtocolError> {
        let checks = [
            ("name", self.name.trim().is_empty()),
            ("age", self.age <= 0),
            ("sex", self.sex.trim().is_empty()),
            ("nationality", self.nationality.trim().is_empty()),
            ("national_id", self.national_id.trim().is_empty()),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, missing)| *missing) {
            return Err(ProtocolError::MissingField(*field));
        }
        Ok(Self {
            name: self.name.trim().to_string(),
            age: self.age,
            sex: self.sex.trim().to_string(),
            nationality: self.nationality.trim().to_string(),
            national_id: self.national_id.trim().to_string(),
        })
    }

    pub fn apply(&self, profile: &mut UserProfile) {
        profile.name = self.name.clone();
        profile.age = Some(self.age);
        profile.sex = Some(self.sex.clone());
        profile.nationality = Some(self.nationality.clone());
        profile.national_id = Some(self.national_id.clone());
    }
}

/// Case-insensitive substring search over the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryQuery {
    pub term: String,
    pub role: Role,
    pub include_email: bool,
    pub limit: Option<usize>,
}

impl DirectoryQuery {
    /// Providers look patients up by name, email or national id.
    pub fn patients(term: &str) -> Option<Self> {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        Some(Self {
            term: term.to_string(),
            role: Role::Patient,
            include_email: true,
            limit: None,
        })
    }

    /// Patients look providers up by name or licence number, two characters
    /// minimum, ten results at most.
    pub fn providers(term: &str) -> Option<Self> {
        let term = term.trim();
        if term.chars().count() < 2 {
            return None;
        }
        Some(Self {
            term: term.to_string(),
            role: Role::Provider,
            include_email: false,
            limit: Some(10),
        })
    }

    pub fn matches(&self, profile: &UserProfile) -> bool {
        if profile.role != self.role {
            return false;
        }
        let needle = self.term.to_lowercase();
        let hit = |value: &str| value.to_lowercase().contains(&needle);

        hit(&profile.name)
            || (self.include_email && hit(&profile.email))
            || profile.national_id.as_deref().is_some_and(hit)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
