//! Application profile rows and the field-level patch semantics used by
//! partial updates. The role is write-once: once a row carries a non-null
//! role it can no longer be changed through the normal update path.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Closed set of application roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Academy,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Academy => "academy",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One profile row, keyed 1:1 by principal id. Created lazily on the first
/// successful reconciliation when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Principal id, primary key.
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub school: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub education_level: Option<String>,
}

impl Profile {
    /// Seed a fresh row from a principal: email copied, display name taken
    /// from the mailbox part of the address, everything else unset.
    pub fn seeded(id: &str, email: &str) -> Self {
        let display = email.split('@').next().unwrap_or(email).to_string();
        Profile {
            id: id.to_string(),
            email: email.to_string(),
            full_name: Some(display),
            phone: None,
            role: None,
            date_of_birth: None,
            school: None,
            skills: Vec::new(),
            education_level: None,
        }
    }
}

/// Per-field patch value: leave the column untouched, store null, or store
/// a new value. `Keep` is the default so callers only name fields they mean
/// to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

// Manual impl: the derive would demand T: Default, which types like
// NaiveDate do not provide.
impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T: Clone> Patch<T> {
    /// Resolve this patch against the current column value.
    pub fn apply(&self, current: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *current = None,
            Patch::Set(v) => *current = Some(v.clone()),
        }
    }
}

/// Partial profile update. Only fields a caller explicitly sets are written;
/// the role is deliberately absent here — it goes through the write-once
/// `update_role` path instead.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Patch<String>,
    pub phone: Patch<String>,
    pub date_of_birth: Patch<NaiveDate>,
    pub school: Patch<String>,
    pub skills: Patch<Vec<String>>,
    pub education_level: Patch<String>,
}

impl ProfileUpdate {
    /// Apply every defined field onto a row in place.
    pub fn apply_to(&self, row: &mut Profile) {
        self.full_name.apply(&mut row.full_name);
        self.phone.apply(&mut row.phone);
        self.date_of_birth.apply(&mut row.date_of_birth);
        self.school.apply(&mut row.school);
        self.education_level.apply(&mut row.education_level);
        match &self.skills {
            Patch::Keep => {}
            Patch::Clear => row.skills.clear(),
            Patch::Set(v) => row.skills = v.clone(),
        }
    }
}

fn has_text(v: &Option<String>) -> bool {
    v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

/// Pure completeness predicate: students need a display name and a date of
/// birth; teachers need name, phone, education level and at least one skill;
/// every other role needs only a display name.
pub fn is_profile_complete(profile: &Profile, role: Role) -> bool {
    let named = has_text(&profile.full_name);
    match role {
        Role::Student => named && profile.date_of_birth.is_some(),
        Role::Teacher => {
            named
                && has_text(&profile.phone)
                && has_text(&profile.education_level)
                && !profile.skills.is_empty()
        }
        Role::Academy => named,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Profile {
        Profile::seeded("p1", "ada@example.com")
    }

    #[test]
    fn seeded_row_uses_mailbox_as_display_name() {
        let p = base();
        assert_eq!(p.full_name.as_deref(), Some("ada"));
        assert_eq!(p.role, None);
    }

    #[test]
    fn student_completeness_requires_dob() {
        let mut p = base();
        assert!(!is_profile_complete(&p, Role::Student));
        p.date_of_birth = NaiveDate::from_ymd_opt(2008, 4, 2);
        assert!(is_profile_complete(&p, Role::Student));
    }

    #[test]
    fn teacher_completeness_requires_all_fields() {
        let mut p = base();
        p.phone = Some("555-0100".into());
        p.education_level = Some("masters".into());
        p.skills = vec!["tennis".into()];
        assert!(is_profile_complete(&p, Role::Teacher));
        p.skills.clear();
        assert!(!is_profile_complete(&p, Role::Teacher));
    }

    #[test]
    fn academy_completeness_requires_name_only() {
        let mut p = base();
        assert!(is_profile_complete(&p, Role::Academy));
        p.full_name = Some("   ".into());
        assert!(!is_profile_complete(&p, Role::Academy));
    }

    #[test]
    fn patch_keep_clear_set() {
        let mut p = base();
        p.phone = Some("old".into());
        let upd = ProfileUpdate {
            phone: Patch::Clear,
            school: Patch::Set("Riverside".into()),
            ..Default::default()
        };
        upd.apply_to(&mut p);
        assert_eq!(p.phone, None);
        assert_eq!(p.school.as_deref(), Some("Riverside"));
        // untouched field
        assert_eq!(p.full_name.as_deref(), Some("ada"));
    }
}
